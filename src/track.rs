//! Local change tracking for the build output tree.
//!
//! Two jobs:
//!
//! - **Write filter**: a built file is written only when its bytes differ
//!   from what is already on disk. Timestamps are never consulted, so a
//!   rebuild that produces identical output touches nothing.
//! - **Orphan cleanup**: paths present under `build/<domain>/` when the run
//!   started but not produced by the run are deleted at the end. Only full
//!   runs clean up; a filtered run sees a subset of the sources and would
//!   otherwise delete everything it did not see.
//!
//! Output tree keys are `<domain>/<relative path>` with `/` separators.

use crate::select::{SelectError, list_tree};
use crate::types::BuiltFile;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// What [`OutputTree::write_if_changed`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    Unchanged,
}

/// Snapshot of the output tree at run start plus the paths produced so far.
#[derive(Debug)]
pub struct OutputTree {
    build_dir: PathBuf,
    previous: BTreeSet<String>,
    current: BTreeSet<String>,
}

impl OutputTree {
    /// Record every file currently under `build/<domain>/` for the given
    /// domains. Other domains' output is never considered.
    pub fn scan(build_dir: &Path, domains: &[String]) -> Result<Self, SelectError> {
        let mut previous = BTreeSet::new();
        for domain in domains {
            for path in list_tree(&build_dir.join(domain))? {
                previous.insert(format!("{domain}/{path}"));
            }
        }
        Ok(Self {
            build_dir: build_dir.to_path_buf(),
            previous,
            current: BTreeSet::new(),
        })
    }

    pub fn previous(&self) -> &BTreeSet<String> {
        &self.previous
    }

    /// Mark a built file as produced by this run.
    pub fn record(&mut self, file: &BuiltFile) {
        self.record_key(file.key());
    }

    /// Mark an output key as still backed by a source, whether or not it
    /// was written this run. Keeps the last good output of a file that
    /// failed to build.
    pub fn record_key(&mut self, key: String) {
        self.current.insert(key);
    }

    fn disk_path(&self, key: &str) -> PathBuf {
        self.build_dir.join(key)
    }

    /// Write a built file unless the on-disk copy is byte-identical.
    pub fn write_if_changed(&self, file: &BuiltFile) -> io::Result<WriteOutcome> {
        let target = self.disk_path(&file.key());
        match fs::read(&target) {
            Ok(existing) if existing == file.contents => return Ok(WriteOutcome::Unchanged),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, &file.contents)?;
        Ok(WriteOutcome::Written)
    }

    /// Keys present at run start but not produced by this run.
    pub fn orphans(&self) -> Vec<String> {
        self.previous.difference(&self.current).cloned().collect()
    }

    /// Delete every orphan and any directory it leaves empty.
    ///
    /// Returns the deleted keys. A file that vanished in the meantime is not
    /// an error.
    pub fn delete_orphans(&self) -> io::Result<Vec<String>> {
        let mut deleted = Vec::new();
        for key in self.orphans() {
            let path = self.disk_path(&key);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            }
            tracing::debug!(file = %key, "deleted orphan");
            self.prune_empty_parents(&path);
            deleted.push(key);
        }
        Ok(deleted)
    }

    /// Remove empty directories from `path`'s parent up to (excluding) the
    /// build directory.
    fn prune_empty_parents(&self, path: &Path) {
        let mut dir = path.parent();
        while let Some(current) = dir {
            if current == self.build_dir || !current.starts_with(&self.build_dir) {
                break;
            }
            if fs::remove_dir(current).is_err() {
                break;
            }
            dir = current.parent();
        }
    }
}
