//! Deploy orchestration.
//!
//! Publishes `build/<domain>/` of every selected domain to its remote host.
//!
//! ```text
//! for each domain (in parallel):
//!   TransportConfig ← site settings over defaults
//!   files           ← build/<domain>/**/<filter or *>, lexical order
//!   Transport::{Ftp, Sftp}.sync(files)    lanes, see transport
//!   flush hash cache (SFTP)
//! ```
//!
//! Domains are independent: one failing (bad credentials, unreachable host)
//! is logged and reported while the others carry on. The run as a whole
//! never aborts because of a single domain.

use crate::cache::{CacheError, DeployTracker};
use crate::config::{Config, ConfigError};
use crate::select::{self, SelectError, SourceGlob};
use crate::transport::{
    Connector, FileOutcome, NetworkConnector, SyncReport, Transport, TransportConfig,
    TransportError, UploadFile,
};
use crate::types::{Layout, Origin, slash_path};
use rayon::prelude::*;
use std::sync::mpsc::Sender;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Listing build output failed: {0}")]
    Select(#[from] SelectError),
    #[error("Transfer failed: {0}")]
    Transport(#[from] TransportError),
    #[error("Saving hash cache failed: {0}")]
    Cache(#[from] CacheError),
}

/// Everything one deploy run needs.
#[derive(Debug, Clone, Copy)]
pub struct DeployContext<'a> {
    pub layout: &'a Layout,
    pub config: &'a Config,
    pub domains: &'a [String],
    /// File-name glob narrowing the uploaded files.
    pub filter: Option<&'a str>,
}

/// Progress events for the CLI printer.
#[derive(Debug, Clone, PartialEq)]
pub enum DeployEvent {
    Started {
        domain: String,
        host: String,
        files: usize,
    },
    Uploaded {
        domain: String,
        path: String,
        size: u64,
    },
    Skipped {
        domain: String,
        path: String,
        size: u64,
    },
    Failed {
        domain: String,
        path: String,
        message: String,
    },
    Finished {
        domain: String,
        uploaded: usize,
        skipped: usize,
        failed: usize,
    },
    DomainFailed {
        domain: String,
        message: String,
    },
}

/// Result of one domain's deploy.
#[derive(Debug)]
pub struct DomainDeploy {
    pub domain: String,
    pub result: Result<SyncReport, DeployError>,
}

impl DomainDeploy {
    pub fn is_success(&self) -> bool {
        matches!(&self.result, Ok(report) if report.failed.is_empty())
    }
}

/// Outcome of a deploy run, one entry per domain in selection order.
#[derive(Debug, Default)]
pub struct DeployReport {
    pub domains: Vec<DomainDeploy>,
}

impl DeployReport {
    pub fn has_failures(&self) -> bool {
        self.domains.iter().any(|d| !d.is_success())
    }

    pub fn uploaded(&self) -> usize {
        self.domains
            .iter()
            .filter_map(|d| d.result.as_ref().ok())
            .map(|r| r.uploaded)
            .sum()
    }
}

/// Deploy the selected domains over the network.
pub fn deploy(ctx: &DeployContext<'_>, events: Option<Sender<DeployEvent>>) -> DeployReport {
    deploy_with(ctx, &NetworkConnector, events)
}

/// Deploy the selected domains through a specific connector (allows testing
/// with an in-memory remote).
pub fn deploy_with(
    ctx: &DeployContext<'_>,
    connector: &dyn Connector,
    events: Option<Sender<DeployEvent>>,
) -> DeployReport {
    let tracker = DeployTracker::new(ctx.layout.cache_dir());
    let emit = |event: DeployEvent| {
        if let Some(tx) = &events {
            let _ = tx.send(event);
        }
    };

    let domains: Vec<DomainDeploy> = ctx
        .domains
        .par_iter()
        .map(|domain| {
            let result = deploy_domain(ctx, domain, connector, &tracker, &emit);
            match &result {
                Ok(report) => emit(DeployEvent::Finished {
                    domain: domain.clone(),
                    uploaded: report.uploaded,
                    skipped: report.skipped,
                    failed: report.failed.len(),
                }),
                Err(e) => {
                    tracing::error!(domain = %domain, error = %e, "deploy failed");
                    emit(DeployEvent::DomainFailed {
                        domain: domain.clone(),
                        message: e.to_string(),
                    });
                }
            }
            DomainDeploy {
                domain: domain.clone(),
                result,
            }
        })
        .collect();

    let report = DeployReport { domains };
    tracing::info!(
        domains = report.domains.len(),
        uploaded = report.uploaded(),
        failed = report.has_failures(),
        "deploy finished"
    );
    report
}

#[tracing::instrument(skip_all, fields(domain = %domain))]
fn deploy_domain(
    ctx: &DeployContext<'_>,
    domain: &str,
    connector: &dyn Connector,
    tracker: &DeployTracker,
    emit: &(dyn Fn(DeployEvent) + Sync),
) -> Result<SyncReport, DeployError> {
    let site = ctx
        .config
        .sites
        .get(domain)
        .ok_or_else(|| ConfigError::UnknownSite(domain.to_string()))?;
    let config = TransportConfig::for_site(domain, site)?;
    let files = list_output(ctx.layout, domain, ctx.filter)?;
    tracing::debug!(host = %config.host, protocol = %config.protocol, files = files.len(), "deploying");
    emit(DeployEvent::Started {
        domain: domain.to_string(),
        host: config.host.clone(),
        files: files.len(),
    });

    let progress = |file: &UploadFile, outcome: &FileOutcome| {
        let domain = domain.to_string();
        let path = file.path.clone();
        emit(match outcome {
            FileOutcome::Uploaded => DeployEvent::Uploaded {
                domain,
                path,
                size: file.size,
            },
            FileOutcome::Skipped => DeployEvent::Skipped {
                domain,
                path,
                size: file.size,
            },
            FileOutcome::Failed(message) => DeployEvent::Failed {
                domain,
                path,
                message: message.clone(),
            },
        });
    };

    let transport = Transport::from(config.protocol);
    let synced = transport.sync(&config, files, connector, tracker, &progress);
    // Flush even when the transfer failed: rolled back entries stay as they
    // were, uploads that did succeed are remembered.
    let flushed = tracker.flush(domain);
    let report = synced?;
    flushed?;
    Ok(report)
}

/// Files under `build/<domain>/` matching the file-name filter.
pub fn list_output(
    layout: &Layout,
    domain: &str,
    filter: Option<&str>,
) -> Result<Vec<UploadFile>, SelectError> {
    let glob = SourceGlob {
        origin: Origin::Site(domain.to_string()),
        root: layout.output_dir(domain),
        pattern: format!("**/{}", filter.unwrap_or("*")),
        exclude: Vec::new(),
    };
    select::list_glob(&glob)?
        .into_iter()
        .map(|entry| -> Result<UploadFile, SelectError> {
            let size = entry.absolute.metadata()?.len();
            Ok(UploadFile {
                path: slash_path(&entry.path),
                local: entry.absolute,
                size,
            })
        })
        .collect()
}
