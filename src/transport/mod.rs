//! Remote transfer of a domain's build output.
//!
//! Two protocols with different change detection:
//!
//! | Protocol | Skips a file when                                  |
//! |----------|----------------------------------------------------|
//! | FTP      | the remote file has the same size as the local one  |
//! | SFTP     | the [`DeployTracker`] has seen the same content     |
//!
//! ## Lanes
//!
//! A domain's files are uploaded over `min(parallel, max_connections)`
//! lanes. Each lane opens its own [`Session`] and pulls files from a shared
//! queue until it is empty, so a slow file never holds up the others.
//!
//! ## Failure Policy
//!
//! - A file that fails to upload is reported and the lane moves on.
//! - A file that cannot be read locally is reported the same way and never
//!   touches the hash cache.
//! - A lane that cannot connect leaves its share to the other lanes.
//! - When no lane connects, the whole domain fails with that error.
//!
//! With SFTP, every file that was not uploaded gets its hash cache entry
//! rolled back, so the next run retries it.
//!
//! The [`Connector`] trait is the seam between the sync logic and the
//! network: [`NetworkConnector`] opens real sessions, tests plug in an
//! in-memory one.

pub mod ftp;
pub mod sftp;

use crate::cache::DeployTracker;
use crate::config::{ConfigError, Protocol, SiteConfig};
use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

const DEFAULT_PARALLEL: usize = 4;
const DEFAULT_MAX_CONNECTIONS: usize = 20;
const DEFAULT_USER: &str = "anonymous";

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("FTP error: {0}")]
    Ftp(#[from] suppaftp::FtpError),
    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),
    #[error("Authentication failed for {user}@{host}")]
    Auth { user: String, host: String },
    #[error("Remote error: {0}")]
    Remote(String),
}

/// Connection and transfer settings of one domain, defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub domain: String,
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub key: Option<PathBuf>,
    pub remote_path: String,
    pub parallel: usize,
    pub max_connections: usize,
}

impl TransportConfig {
    /// Layer a site's settings over the transfer defaults.
    pub fn for_site(domain: &str, site: &SiteConfig) -> Result<Self, ConfigError> {
        let protocol = site
            .protocol
            .ok_or_else(|| ConfigError::MissingProtocol(domain.to_string()))?;
        let host = match site.host.as_deref().map(str::trim) {
            Some("") => return Err(ConfigError::MissingHost(domain.to_string())),
            Some(host) => host.to_string(),
            None => format!("ftp.{domain}"),
        };
        Ok(Self {
            domain: domain.to_string(),
            protocol,
            host,
            port: site.port.unwrap_or_else(|| protocol.default_port()),
            user: site.user.clone().unwrap_or_else(|| DEFAULT_USER.to_string()),
            password: site.password.clone(),
            key: site.key.clone(),
            remote_path: site.remote_path.clone(),
            parallel: site.parallel.unwrap_or(DEFAULT_PARALLEL),
            max_connections: site.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS),
        })
    }

    /// Number of simultaneous sessions for this domain.
    pub fn lanes(&self) -> usize {
        self.parallel.min(self.max_connections).max(1)
    }

    /// Absolute remote path of a file relative to the build directory.
    pub fn remote_file(&self, path: &str) -> String {
        format!("{}/{}", self.remote_path.trim_end_matches('/'), path)
    }
}

/// Parent directory of a remote path, `None` at the root.
pub fn remote_parent(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) | None => None,
        Some(i) => Some(&path[..i]),
    }
}

/// One open connection to a remote host.
pub trait Session {
    /// Size of a remote file, `None` when it does not exist.
    fn remote_size(&mut self, path: &str) -> Result<Option<u64>, TransportError>;

    /// Create a remote directory and its missing parents.
    fn ensure_dir(&mut self, path: &str) -> Result<(), TransportError>;

    /// Create or replace a remote file.
    fn put(&mut self, path: &str, contents: &[u8]) -> Result<(), TransportError>;

    /// Close the connection politely.
    fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Opens sessions. Shared by all lanes of all domains.
pub trait Connector: Sync {
    fn connect(&self, config: &TransportConfig) -> Result<Box<dyn Session>, TransportError>;
}

/// Production connector: FTP through `suppaftp`, SFTP through `ssh2`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetworkConnector;

impl Connector for NetworkConnector {
    fn connect(&self, config: &TransportConfig) -> Result<Box<dyn Session>, TransportError> {
        match config.protocol {
            Protocol::Ftp => Ok(Box::new(ftp::FtpSession::connect(config)?)),
            Protocol::Sftp => Ok(Box::new(sftp::SftpSession::connect(config)?)),
        }
    }
}

/// A local file queued for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    /// `/`-separated path relative to `build/<domain>/`.
    pub path: String,
    pub local: PathBuf,
    pub size: u64,
}

/// What happened to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Uploaded,
    Skipped,
    Failed(String),
}

/// Per-domain transfer totals.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub uploaded: usize,
    pub skipped: usize,
    /// Paths that failed, with the error message.
    pub failed: Vec<(String, String)>,
}

impl SyncReport {
    fn record(&mut self, file: &UploadFile, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Uploaded => self.uploaded += 1,
            FileOutcome::Skipped => self.skipped += 1,
            FileOutcome::Failed(message) => self.failed.push((file.path.clone(), message.clone())),
        }
    }

    fn merge(&mut self, other: SyncReport) {
        self.uploaded += other.uploaded;
        self.skipped += other.skipped;
        self.failed.extend(other.failed);
    }
}

/// Progress callback, invoked from lane threads.
pub type Progress<'a> = &'a (dyn Fn(&UploadFile, &FileOutcome) + Sync);

/// Protocol-specific sync strategy, chosen once per domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Ftp,
    Sftp,
}

impl From<Protocol> for Transport {
    fn from(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Ftp => Transport::Ftp,
            Protocol::Sftp => Transport::Sftp,
        }
    }
}

impl Transport {
    /// Upload the files of one domain.
    ///
    /// SFTP consults and updates `tracker`; flushing it is up to the caller.
    pub fn sync(
        &self,
        config: &TransportConfig,
        files: Vec<UploadFile>,
        connector: &dyn Connector,
        tracker: &DeployTracker,
        progress: Progress<'_>,
    ) -> Result<SyncReport, TransportError> {
        let mut report = SyncReport::default();
        let queued = match self {
            Transport::Ftp => files,
            Transport::Sftp => {
                let mut queued = Vec::new();
                for file in files {
                    let contents = match std::fs::read(&file.local) {
                        Ok(contents) => contents,
                        Err(e) => {
                            tracing::warn!(domain = %config.domain, file = %file.path, error = %e, "cannot read file");
                            let outcome = FileOutcome::Failed(e.to_string());
                            report.record(&file, &outcome);
                            progress(&file, &outcome);
                            continue;
                        }
                    };
                    if tracker.has_changed(&config.domain, &file.path, &contents) {
                        queued.push(file);
                    } else {
                        report.record(&file, &FileOutcome::Skipped);
                        progress(&file, &FileOutcome::Skipped);
                    }
                }
                queued
            }
        };
        if queued.is_empty() {
            return Ok(report);
        }

        let result = self.run_lanes(config, &queued, connector, progress);
        if *self == Transport::Sftp {
            let uploaded: HashSet<&str> = match &result {
                Ok((_, uploaded)) => uploaded.iter().map(String::as_str).collect(),
                Err(_) => HashSet::new(),
            };
            for file in queued.iter().filter(|f| !uploaded.contains(f.path.as_str())) {
                tracker.rollback(&config.domain, &file.path);
            }
        }
        let (lanes_report, _) = result?;
        report.merge(lanes_report);
        Ok(report)
    }

    fn run_lanes(
        &self,
        config: &TransportConfig,
        files: &[UploadFile],
        connector: &dyn Connector,
        progress: Progress<'_>,
    ) -> Result<(SyncReport, Vec<String>), TransportError> {
        let lanes = config.lanes().min(files.len());
        let queue = Mutex::new(files.iter());
        tracing::debug!(domain = %config.domain, lanes, files = files.len(), "starting lanes");

        let results: Vec<Result<LaneResult, TransportError>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..lanes)
                .map(|lane| {
                    let queue = &queue;
                    s.spawn(move || self.run_lane(lane, config, queue, connector, progress))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join()
                        .unwrap_or_else(|_| Err(TransportError::Remote("upload lane panicked".into())))
                })
                .collect()
        });

        let mut report = SyncReport::default();
        let mut uploaded = Vec::new();
        let mut first_error = None;
        let mut connected = 0;
        for result in results {
            match result {
                Ok(lane) => {
                    connected += 1;
                    report.merge(lane.report);
                    uploaded.extend(lane.uploaded);
                }
                Err(e) => {
                    tracing::warn!(domain = %config.domain, error = %e, "upload lane failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) if connected == 0 => Err(e),
            _ => Ok((report, uploaded)),
        }
    }

    fn run_lane(
        &self,
        lane: usize,
        config: &TransportConfig,
        queue: &Mutex<std::slice::Iter<'_, UploadFile>>,
        connector: &dyn Connector,
        progress: Progress<'_>,
    ) -> Result<LaneResult, TransportError> {
        let mut session = connector.connect(config)?;
        tracing::debug!(domain = %config.domain, lane, "lane connected");
        let mut result = LaneResult::default();
        let mut known_dirs = HashSet::new();

        loop {
            let next = queue.lock().unwrap_or_else(|e| e.into_inner()).next();
            let Some(file) = next else { break };
            let outcome = match self.transfer(session.as_mut(), config, file, &mut known_dirs) {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(domain = %config.domain, file = %file.path, error = %e, "upload failed");
                    FileOutcome::Failed(e.to_string())
                }
            };
            if outcome == FileOutcome::Uploaded {
                result.uploaded.push(file.path.clone());
            }
            result.report.record(file, &outcome);
            progress(file, &outcome);
        }

        if let Err(e) = session.close() {
            tracing::debug!(domain = %config.domain, lane, error = %e, "closing session failed");
        }
        Ok(result)
    }

    fn transfer(
        &self,
        session: &mut dyn Session,
        config: &TransportConfig,
        file: &UploadFile,
        known_dirs: &mut HashSet<String>,
    ) -> Result<FileOutcome, TransportError> {
        let remote = config.remote_file(&file.path);
        if *self == Transport::Ftp && session.remote_size(&remote)? == Some(file.size) {
            return Ok(FileOutcome::Skipped);
        }
        if let Some(dir) = remote_parent(&remote)
            && !known_dirs.contains(dir)
        {
            session.ensure_dir(dir)?;
            known_dirs.insert(dir.to_string());
        }
        let contents = std::fs::read(&file.local)?;
        session.put(&remote, &contents)?;
        Ok(FileOutcome::Uploaded)
    }
}

#[derive(Debug, Default)]
struct LaneResult {
    report: SyncReport,
    uploaded: Vec<String>,
}
