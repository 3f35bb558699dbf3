//! # Disperse
//!
//! Builds many small static websites from shared templates and publishes
//! them to their hosts over FTP or SFTP, touching only what changed.
//!
//! # Architecture: Build, Then Deploy
//!
//! ```text
//! src/sites/<domain>/       ┐
//! src/templates/<template>/ ├─ build ─→ build/<domain>/ ─ deploy ─→ remote host
//! src/partials/             ┘                 │
//!                                             └─ cache/<domain>.json (SFTP)
//! ```
//!
//! The build is one lazy stream of files per run: select, compose, compress,
//! package, write. The deploy runs every domain concurrently, each over its
//! own set of connections.
//!
//! Both halves are incremental:
//!
//! - **Build** writes a file only when its bytes differ from what is on
//!   disk, and deletes output whose source disappeared.
//! - **Deploy** uploads a file only when it differs from what was deployed:
//!   by remote size for FTP, by content hash for SFTP.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`config`] | `config.toml` loading, `[defaults]` layering, domain selection |
//! | [`types`] | Shared file types and the project directory layout |
//! | [`select`] | Which source files take part in a build, in which order |
//! | [`compose`] | Template cloning per domain and template rendering with partials |
//! | [`assets`] | Minification and `app.min.*` bundling |
//! | [`track`] | Write-if-changed and orphan cleanup for `build/` |
//! | [`pipeline`] | Build orchestration |
//! | [`cache`] | Per-domain SHA-1 hash cache for SFTP deploys |
//! | [`transport`] | FTP and SFTP sessions, upload lanes |
//! | [`deploy`] | Deploy orchestration across domains |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Templates Are Cloned, Not Inherited
//!
//! A file of a shared template is copied into every domain that uses it
//! before rendering. Each copy is rendered with its own domain's data and
//! written to that domain's output, so a template change reaches every
//! subscriber in one build. A file the site provides itself replaces the
//! template's copy of the same path.
//!
//! ## Content Comparison Over Timestamps
//!
//! Neither half looks at modification times. A fresh checkout changes every
//! timestamp without changing any content, and a full re-upload after each
//! clone is exactly what this tool exists to avoid.
//!
//! ## Two Change Detectors for Two Protocols
//!
//! FTP compares remote file sizes, SFTP compares against a local hash cache.
//! The size check misses same-size edits; the hash cache misses changes made
//! on the server behind its back. Both are kept as they are.

pub mod assets;
pub mod cache;
pub mod compose;
pub mod config;
pub mod deploy;
pub mod output;
pub mod pipeline;
pub mod select;
pub mod track;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
