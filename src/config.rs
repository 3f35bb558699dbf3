//! Project configuration.
//!
//! Handles loading `config.toml`, layering the shared `[defaults]` table under
//! every site, and resolving which domains take part in a run.
//!
//! ## Config File Location
//!
//! `config.toml` lives at the project root, next to `src/`, `build/` and
//! `cache/`:
//!
//! ```text
//! project/
//! ├── config.toml
//! ├── src/
//! │   ├── partials/            # Partials shared by every site
//! │   ├── templates/basic/     # Shared template, cloned into each subscriber
//! │   └── sites/example.com/   # Site-specific sources
//! ├── build/example.com/       # Build output
//! └── cache/example.com.json   # Deploy hash cache (SFTP)
//! ```
//!
//! ## Configuration Options
//!
//! ```toml
//! [defaults]                 # Layered under every site below
//! parallel = 4
//!
//! [sites."example.com"]
//! template = "basic"         # Directory under src/templates/ (optional)
//! active = true              # Selected when no --site is given
//! protocol = "sftp"          # "ftp" or "sftp"
//! host = "example.com"       # Defaults to "ftp.<domain>"
//! remote_path = "public_html"
//! user = "deploy"
//! password = "secret"
//! title = "Example"          # Any other key is exposed to templates
//! ```
//!
//! ## Layering
//!
//! Each site table is merged on top of `[defaults]` key by key (see
//! [`merge_toml`]), so a site only needs the values that differ. Typed keys
//! are checked when the merged table is deserialized; unknown keys become
//! template data.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the project configuration file.
pub const CONFIG_FILENAME: &str = "config.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Site not found in configuration: {0}")]
    UnknownSite(String),
    #[error("Site {0} has no protocol (expected \"ftp\" or \"sftp\")")]
    MissingProtocol(String),
    #[error("Site {0} has an empty host")]
    MissingHost(String),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Remote transfer protocol of a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ftp,
    Sftp,
}

impl Protocol {
    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Ftp => 21,
            Protocol::Sftp => 22,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Ftp => f.write_str("ftp"),
            Protocol::Sftp => f.write_str("sftp"),
        }
    }
}

/// Settings of one domain, after `[defaults]` has been layered underneath.
///
/// Serializing a `SiteConfig` yields the template data context, so secrets
/// are never serialized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Shared template directory under `src/templates/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Selected for runs without a `--site` filter.
    #[serde(default)]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    /// Remote host. `None` means `ftp.<domain>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Base directory on the remote host. Normalized to start with `/`.
    #[serde(default)]
    pub remote_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Private key file for SFTP public key authentication.
    #[serde(default, skip_serializing)]
    pub key: Option<PathBuf>,
    /// Parallel transfers per domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel: Option<usize>,
    /// Upper bound on simultaneous connections per domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,
    /// Every other key, exposed verbatim to templates.
    #[serde(flatten)]
    pub data: toml::Table,
}

impl SiteConfig {
    /// Validate values that serde cannot reject on its own.
    pub fn validate(&self, domain: &str) -> Result<(), ConfigError> {
        if self.parallel == Some(0) {
            return Err(ConfigError::Validation(format!(
                "sites.{domain}.parallel must be at least 1"
            )));
        }
        if self.max_connections == Some(0) {
            return Err(ConfigError::Validation(format!(
                "sites.{domain}.max_connections must be at least 1"
            )));
        }
        if let Some(template) = &self.template
            && (template.is_empty() || template.contains(['/', '\\']) || template == "..")
        {
            return Err(ConfigError::Validation(format!(
                "sites.{domain}.template must be a plain directory name"
            )));
        }
        Ok(())
    }
}

/// The whole project configuration, one entry per domain.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub sites: BTreeMap<String, SiteConfig>,
}

/// Shape of `config.toml` before layering. Unknown root tables (such as
/// `providers`) are tolerated.
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    defaults: toml::Table,
    #[serde(default)]
    sites: BTreeMap<String, toml::Table>,
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Parse configuration text, layering `[defaults]` under every site.
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let raw: RawConfig = toml::from_str(content)?;
    let defaults = toml::Value::Table(raw.defaults);
    let mut sites = BTreeMap::new();
    for (domain, table) in raw.sites {
        let merged = merge_toml(defaults.clone(), toml::Value::Table(table));
        let site: SiteConfig = merged.try_into()?;
        site.validate(&domain)?;
        sites.insert(domain, site);
    }
    Ok(Config { sites })
}

/// Load `config.toml` from the given file path.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Select the domains taking part in this run, in lexical order.
///
/// With a `site` filter only that domain is selected, active or not.
/// Otherwise every active domain is. Selected domains get their remote path
/// normalized to start with `/`; nothing else is touched.
pub fn resolve_domains(config: &mut Config, site: Option<&str>) -> Result<Vec<String>, ConfigError> {
    let domains: Vec<String> = match site {
        Some(name) => {
            if !config.sites.contains_key(name) {
                return Err(ConfigError::UnknownSite(name.to_string()));
            }
            vec![name.to_string()]
        }
        None => config
            .sites
            .iter()
            .filter(|(_, site)| site.active)
            .map(|(domain, _)| domain.clone())
            .collect(),
    };

    for domain in &domains {
        let Some(site) = config.sites.get_mut(domain) else {
            continue;
        };
        if site.protocol.is_none() {
            return Err(ConfigError::MissingProtocol(domain.clone()));
        }
        if site.host.as_deref().is_some_and(|h| h.trim().is_empty()) {
            return Err(ConfigError::MissingHost(domain.clone()));
        }
        site.remote_path = normalize_remote_path(&site.remote_path);
    }

    Ok(domains)
}

/// Ensure a remote path is rooted: `public_html` → `/public_html`.
pub fn normalize_remote_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Returns a fully-commented stock `config.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Disperse Configuration
# ======================
# One [sites."<domain>"] table per website. Keys in [defaults] are layered
# under every site, so each site only lists what differs.

# ---------------------------------------------------------------------------
# Defaults shared by all sites
# ---------------------------------------------------------------------------
[defaults]
# Parallel transfers per site during deploy.
parallel = 4

# Upper bound on simultaneous connections per site.
max_connections = 20

# ---------------------------------------------------------------------------
# Sites
# ---------------------------------------------------------------------------
[sites."example.com"]
# Shared template under src/templates/. Its files are cloned into this site.
template = "basic"

# Active sites are built and deployed when no --site is given.
active = true

# "ftp" (size-based sync) or "sftp" (hash-cache sync).
protocol = "sftp"

# Remote host. Defaults to "ftp.<domain>" when omitted.
host = "example.com"
# port = 22

# Base directory on the remote host.
remote_path = "public_html"

user = "deploy"
# password = "secret"
# key = "~/.ssh/id_ed25519"

# Any other key is available to templates, next to `domain`.
title = "Example"
"##
}
