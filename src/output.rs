//! CLI output formatting for build and deploy runs.
//!
//! Every formatter is a pure function from an event to display lines, so the
//! output can be tested without capturing stdout. The `print_*` wrappers and
//! the printer threads in `main.rs` do the actual writing.
//!
//! # Output Format
//!
//! ## Build
//!
//! One line per produced file: size after compression, change against the
//! source size, then `domain/file`. A domain label is green the first time
//! it appears and dimmed afterwards, so each domain's block stands out.
//!
//! ```text
//! 1.2 KB     (-38%) example.com/index.html
//! 348 B             example.com/robots.txt
//! 14.0 KB    (-52%) example.com/app.min.js
//! deleted           example.com/old.html
//! failed            example.org/broken.tpl: unknown variable `missing`
//! ```
//!
//! Unchanged files (already identical on disk) are printed like the others;
//! the summary line tells how many were written.
//!
//! ## Deploy
//!
//! ```text
//! example.com → ftp.example.com (3 files)
//!     uploaded  index.html (1.2 KB)
//!     skipped   robots.txt (348 B)
//!     failed    app.min.js: 550 permission denied
//! example.com: 1 uploaded, 1 skipped, 1 failed
//! ```

use crate::assets::size_delta_percent;
use crate::deploy::{DeployEvent, DeployReport};
use crate::pipeline::{BuildEvent, BuildReport};
use bytesize::ByteSize;
use owo_colors::OwoColorize;
use std::collections::HashSet;

/// Tracks which domains already got a highlighted label.
///
/// Scoped to one run; the printer thread owns it.
#[derive(Debug, Default)]
pub struct DomainLabels {
    seen: HashSet<String>,
    color: bool,
}

impl DomainLabels {
    pub fn new(color: bool) -> Self {
        Self {
            seen: HashSet::new(),
            color,
        }
    }

    /// Labels without ANSI escapes.
    pub fn plain() -> Self {
        Self::new(false)
    }

    /// `domain/`, green on first use and dimmed afterwards.
    pub fn label(&mut self, domain: &str) -> String {
        let first = self.seen.insert(domain.to_string());
        let text = format!("{domain}/");
        match (self.color, first) {
            (false, _) => text,
            (true, true) => text.green().to_string(),
            (true, false) => text.dimmed().to_string(),
        }
    }
}

/// `(-38%)`, or empty when the size did not change.
fn format_change(original: u64, size: u64) -> String {
    match size_delta_percent(original, size) {
        Some(pct) if pct > 0 => format!("(+{pct:>2}%)"),
        Some(pct) => format!("({pct:>2}%)"),
        None => String::new(),
    }
}

/// File name part of a `/`-separated path.
fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

// ============================================================================
// Build
// ============================================================================

pub fn format_build_event(event: &BuildEvent, labels: &mut DomainLabels) -> Vec<String> {
    match event {
        BuildEvent::FileBuilt {
            domain,
            path,
            size,
            original_size,
            ..
        } => {
            let size_str = ByteSize::b(*size).to_string();
            vec![format!(
                "{:<9} {:>6} {}{}",
                size_str,
                format_change(*original_size, *size),
                labels.label(domain),
                base_name(path)
            )]
        }
        BuildEvent::RenderFailed {
            domain,
            path,
            message,
        } => vec![format!(
            "{:<9} {:>6} {}{}: {}",
            "failed",
            "",
            labels.label(domain),
            path,
            message
        )],
        BuildEvent::OrphanDeleted { key } => {
            let (domain, path) = key.split_once('/').unwrap_or((key.as_str(), ""));
            vec![format!(
                "{:<9} {:>6} {}{}",
                "deleted",
                "",
                labels.label(domain),
                path
            )]
        }
    }
}

pub fn format_build_summary(report: &BuildReport) -> String {
    let mut summary = format!(
        "Built: {} written, {} unchanged",
        report.written, report.unchanged
    );
    if !report.deleted.is_empty() {
        summary.push_str(&format!(", {} deleted", report.deleted.len()));
    }
    if !report.failures.is_empty() {
        summary.push_str(&format!(", {} failed", report.failures.len()));
    }
    summary
}

pub fn print_build_summary(report: &BuildReport) {
    println!("{}", format_build_summary(report));
}

// ============================================================================
// Deploy
// ============================================================================

pub fn format_deploy_event(event: &DeployEvent) -> Vec<String> {
    match event {
        DeployEvent::Started {
            domain,
            host,
            files,
        } => vec![format!("{domain} → {host} ({files} files)")],
        DeployEvent::Uploaded { path, size, .. } => {
            vec![format!("    uploaded  {} ({})", path, ByteSize::b(*size))]
        }
        DeployEvent::Skipped { path, size, .. } => {
            vec![format!("    skipped   {} ({})", path, ByteSize::b(*size))]
        }
        DeployEvent::Failed { path, message, .. } => {
            vec![format!("    failed    {path}: {message}")]
        }
        DeployEvent::Finished {
            domain,
            uploaded,
            skipped,
            failed,
        } => {
            let mut line = format!("{domain}: {uploaded} uploaded, {skipped} skipped");
            if *failed > 0 {
                line.push_str(&format!(", {failed} failed"));
            }
            vec![line]
        }
        DeployEvent::DomainFailed { domain, message } => {
            vec![format!("{domain}: deploy failed: {message}")]
        }
    }
}

pub fn format_deploy_summary(report: &DeployReport) -> String {
    let failed = report.domains.iter().filter(|d| !d.is_success()).count();
    let mut summary = format!(
        "Deployed: {} domains, {} files uploaded",
        report.domains.len(),
        report.uploaded()
    );
    if failed > 0 {
        summary.push_str(&format!(", {failed} with failures"));
    }
    summary
}

pub fn print_deploy_summary(report: &DeployReport) {
    println!("{}", format_deploy_summary(report));
}
