//! Build orchestration.
//!
//! Runs the build as one lazy stream of files:
//!
//! ```text
//! select ─→ read ─→ expand ─→ compose ─→ compress ─→ pack ─→ track/write
//! (globs)   (lazy)  (clone    (render    (html,js,   (app.min.*  (skip identical,
//!                   per       .tpl)      css)        at end)     record path)
//!                   domain)
//! ```
//!
//! Files are read as the stream advances, so rendering of the first file can
//! start before the last one is read. Only the packer holds files back, and
//! only scripts and stylesheets.
//!
//! After the stream ends, orphans are deleted unless the run was filtered.
//!
//! ## Filtered Runs
//!
//! A file-name filter narrows which of a site's own files are rebuilt, but
//! never changes what a written file contains:
//!
//! - A site file shadows its template's copy whether or not the filter
//!   selected it.
//! - Every script and stylesheet of a selected site is read anyway, so an
//!   `app.min.*` bundle is always rebuilt whole.
//!
//! ## Error Policy
//!
//! - A template that fails to render is logged, reported and skipped. Its
//!   previous output stays in place.
//! - Read and write failures abort the build.

use crate::assets::{self, Compressor, Minifier, Packer};
use crate::compose::{Composer, Expander, RenderError};
use crate::config::Config;
use crate::select::{self, SelectError, SourceEntry};
use crate::track::{OutputTree, WriteOutcome};
use crate::types::{Layout, Origin, slash_path};
use std::cell::RefCell;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Source selection failed: {0}")]
    Select(#[from] SelectError),
}

/// Everything one build run needs, scoped to that run.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    pub layout: &'a Layout,
    pub config: &'a Config,
    /// Domains selected by [`crate::config::resolve_domains`].
    pub domains: &'a [String],
    /// File-name glob narrowing each site's sources. Disables orphan cleanup.
    pub filter: Option<&'a str>,
}

/// Progress events for the CLI printer.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildEvent {
    FileBuilt {
        domain: String,
        path: String,
        size: u64,
        original_size: u64,
        written: bool,
    },
    RenderFailed {
        domain: String,
        path: String,
        message: String,
    },
    OrphanDeleted {
        key: String,
    },
}

/// Outcome of a build run.
#[derive(Debug, Default)]
pub struct BuildReport {
    pub written: usize,
    pub unchanged: usize,
    pub deleted: Vec<String>,
    pub failures: Vec<RenderError>,
}

fn emit(events: Option<&Sender<BuildEvent>>, event: BuildEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

/// Build the selected domains with the production minifiers.
pub fn build(
    ctx: &BuildContext<'_>,
    events: Option<&Sender<BuildEvent>>,
) -> Result<BuildReport, BuildError> {
    build_with(ctx, &Minifier, events)
}

/// Build the selected domains with a specific compressor (allows testing
/// with a mock).
#[tracing::instrument(skip_all, fields(domains = ctx.domains.len(), filter = ctx.filter))]
pub fn build_with(
    ctx: &BuildContext<'_>,
    compressor: &dyn Compressor,
    events: Option<&Sender<BuildEvent>>,
) -> Result<BuildReport, BuildError> {
    let mut expander = Expander::new(ctx.config, ctx.domains);
    let entries = select_entries(ctx, &mut expander)?;
    tracing::debug!(files = entries.len(), "sources selected");

    let composer = Composer::new(ctx.layout, ctx.config, ctx.domains);
    let mut tree = OutputTree::scan(&ctx.layout.build_dir(), ctx.domains)?;

    let mut report = BuildReport::default();
    let read_error: RefCell<Option<std::io::Error>> = RefCell::new(None);
    let mut failures = Vec::new();

    {
        let sources = entries.iter().map_while(|entry| match entry.read() {
            Ok(file) => Some(file),
            Err(e) => {
                *read_error.borrow_mut() = Some(e);
                None
            }
        });
        let composed = sources
            .flat_map(|file| expander.expand(file))
            .filter_map(|file| match composer.compose(file)? {
                Ok(built) => Some(built),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping file");
                    emit(
                        events,
                        BuildEvent::RenderFailed {
                            domain: e.domain.clone(),
                            path: slash_path(&e.path),
                            message: e.message.clone(),
                        },
                    );
                    failures.push(e);
                    None
                }
            });
        let compressed = composed.map(|file| assets::compress(compressor, file));

        for file in Packer::new(compressed) {
            // A failed read ends the stream early; don't write partial bundles.
            if read_error.borrow().is_some() {
                break;
            }
            tree.record(&file);
            let outcome = tree.write_if_changed(&file)?;
            match outcome {
                WriteOutcome::Written => report.written += 1,
                WriteOutcome::Unchanged => report.unchanged += 1,
            }
            emit(
                events,
                BuildEvent::FileBuilt {
                    domain: file.domain.clone(),
                    path: slash_path(&file.path),
                    size: file.contents.len() as u64,
                    original_size: file.original_size,
                    written: outcome == WriteOutcome::Written,
                },
            );
        }
    }

    if let Some(e) = read_error.into_inner() {
        return Err(e.into());
    }
    for failure in &failures {
        tree.record_key(failure.output_key());
    }
    report.failures = failures;

    if ctx.filter.is_none() {
        report.deleted = tree.delete_orphans()?;
        for key in &report.deleted {
            emit(events, BuildEvent::OrphanDeleted { key: key.clone() });
        }
    } else {
        tracing::debug!("filtered run, orphan cleanup skipped");
    }

    tracing::info!(
        written = report.written,
        unchanged = report.unchanged,
        deleted = report.deleted.len(),
        failed = report.failures.len(),
        "build finished"
    );
    Ok(report)
}

/// Source entries of a run, in selection order, with every site file
/// registered as shadowing its template's copy.
///
/// Unfiltered runs take the selection as is. Filtered runs keep the
/// selected files plus every script and stylesheet of the selected sites.
fn select_entries(
    ctx: &BuildContext<'_>,
    expander: &mut Expander,
) -> Result<Vec<SourceEntry>, SelectError> {
    let globs = select::source_globs(ctx.layout, ctx.config, ctx.domains, None);
    let all = select::list_sources(&globs)?;
    for entry in &all {
        if let Origin::Site(domain) = &entry.origin {
            expander.shadow(domain, &entry.path);
        }
    }
    let Some(filter) = ctx.filter else {
        return Ok(all);
    };

    let narrowed = select::source_globs(ctx.layout, ctx.config, ctx.domains, Some(filter));
    let selected: HashSet<(Origin, PathBuf)> = select::list_sources(&narrowed)?
        .into_iter()
        .map(|entry| (entry.origin, entry.path))
        .collect();
    let total = all.len();
    let entries: Vec<SourceEntry> = all
        .into_iter()
        .filter(|entry| {
            matches!(entry.origin, Origin::Template(_))
                || assets::is_bundled(&entry.path)
                || selected.contains(&(entry.origin.clone(), entry.path.clone()))
        })
        .collect();
    tracing::debug!(filter, kept = entries.len(), total, "filter applied");
    Ok(entries)
}
