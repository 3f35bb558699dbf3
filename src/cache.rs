//! Deploy hash cache for incremental uploads.
//!
//! SFTP deploys skip files whose content was already uploaded. What counts as
//! "already uploaded" is decided by this cache alone: the remote side is
//! never listed and modification times are never compared.
//!
//! # Design
//!
//! One cache per domain maps the file's path (relative to `build/<domain>/`)
//! to the SHA-1 of the content last uploaded there:
//!
//! ```json
//! {
//!   "css/app.min.css": "0a4d55a8d778e5022fab701977c5d840bbc486d0",
//!   "index.html": "2ef7bde608ce5404e97d5f042f95f89f1c232871"
//! }
//! ```
//!
//! ## Lifecycle
//!
//! - **Lazy load**: a domain's cache is read on its first comparison, under
//!   that domain's lock only.
//! - **Compare**: a changed (or new) file gets its entry updated and is
//!   reported for upload. Identical content leaves the cache untouched.
//! - **Rollback**: entries of files whose upload failed are restored, so the
//!   next run tries them again.
//! - **Flush**: written once per domain when its deploy ends, via a temp
//!   file + rename so a crash never leaves a half-written cache.
//!
//! An unreadable or corrupt cache is treated as empty, which means every
//! file of that domain is uploaded again. That is slow but never wrong.
//!
//! ## Storage
//!
//! `cache/<domain>.json`, pretty-printed, keys sorted.

use sha1::{Digest, Sha1};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt hash cache: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to replace hash cache: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Lowercase hex SHA-1 of a byte slice.
pub fn hash_content(contents: &[u8]) -> String {
    format!("{:x}", Sha1::digest(contents))
}

/// Hash cache of a single domain.
#[derive(Debug, Clone, Default)]
pub struct HashCache {
    entries: BTreeMap<String, String>,
    /// Entry values before this run changed them, for rollback.
    previous: HashMap<String, Option<String>>,
    dirty: bool,
}

impl HashCache {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load a cache file. A missing file is an empty cache.
    pub fn load(path: &Path) -> Result<Self, CacheError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::empty()),
            Err(e) => return Err(e.into()),
        };
        let entries: BTreeMap<String, String> = serde_json::from_str(&content)?;
        Ok(Self {
            entries,
            ..Self::default()
        })
    }

    /// Load a cache file, falling back to an empty cache on any error.
    pub fn load_or_empty(path: &Path) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!(cache = %path.display(), error = %e, "ignoring unreadable hash cache");
            Self::empty()
        })
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Compare `contents` against the cached hash for `path`.
    ///
    /// Returns `true` (upload needed) when the hash differs or is absent, in
    /// which case the entry is updated to the new hash.
    pub fn check(&mut self, path: &str, contents: &[u8]) -> bool {
        self.check_hash(path, hash_content(contents))
    }

    /// Same as [`HashCache::check`] with the hash already computed.
    pub fn check_hash(&mut self, path: &str, hash: String) -> bool {
        if self.entries.get(path) == Some(&hash) {
            return false;
        }
        let old = self.entries.insert(path.to_string(), hash);
        self.previous.entry(path.to_string()).or_insert(old);
        self.dirty = true;
        true
    }

    /// Restore the entry for `path` to its value before this run.
    pub fn rollback(&mut self, path: &str) {
        match self.previous.remove(path) {
            Some(Some(old)) => {
                self.entries.insert(path.to_string(), old);
            }
            Some(None) => {
                self.entries.remove(path);
            }
            None => {}
        }
    }

    /// Write the cache atomically, creating the parent directory.
    pub fn save(&self, path: &Path) -> Result<(), CacheError> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let json = serde_json::to_string_pretty(&self.entries)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(path)?;
        Ok(())
    }
}

/// A domain's cache, loaded on first use.
type CacheSlot = Arc<Mutex<Option<HashCache>>>;

/// Per-domain hash caches for one deploy run.
///
/// Each domain has its own lock, so loading and comparing one domain's
/// cache never waits on another domain. Content is hashed before any lock
/// is taken.
#[derive(Debug)]
pub struct DeployTracker {
    cache_dir: PathBuf,
    caches: Mutex<HashMap<String, CacheSlot>>,
}

impl DeployTracker {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            caches: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache_path(&self, domain: &str) -> PathBuf {
        self.cache_dir.join(format!("{domain}.json"))
    }

    fn slot(&self, domain: &str) -> CacheSlot {
        let mut caches = self.caches.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(caches.entry(domain.to_string()).or_default())
    }

    fn with_cache<T>(&self, domain: &str, f: impl FnOnce(&mut HashCache) -> T) -> T {
        let slot = self.slot(domain);
        let mut slot = slot.lock().unwrap_or_else(|e| e.into_inner());
        let cache = slot.get_or_insert_with(|| HashCache::load_or_empty(&self.cache_path(domain)));
        f(cache)
    }

    /// True when `path` of `domain` must be uploaded. Updates the cache.
    pub fn has_changed(&self, domain: &str, path: &str, contents: &[u8]) -> bool {
        let hash = hash_content(contents);
        self.with_cache(domain, |cache| cache.check_hash(path, hash))
    }

    /// Forget this run's update of `path`, e.g. after a failed upload.
    pub fn rollback(&self, domain: &str, path: &str) {
        self.with_cache(domain, |cache| cache.rollback(path));
    }

    /// Write a domain's cache if it changed and release it.
    ///
    /// Returns whether anything was written.
    pub fn flush(&self, domain: &str) -> Result<bool, CacheError> {
        let slot = {
            let mut caches = self.caches.lock().unwrap_or_else(|e| e.into_inner());
            caches.remove(domain)
        };
        let cache = slot.and_then(|slot| slot.lock().unwrap_or_else(|e| e.into_inner()).take());
        match cache {
            Some(cache) if cache.is_dirty() => {
                cache.save(&self.cache_path(domain))?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn hash_is_lowercase_hex_sha1() {
        assert_eq!(hash_content(b"abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn changed_content_marked_and_entry_updated() {
        let mut cache = HashCache::empty();
        cache.check("x.css", b"v1");
        let v1 = hash_content(b"v1");
        assert_eq!(cache.get("x.css"), Some(v1.as_str()));

        assert!(cache.check("x.css", b"v2"));
        assert_eq!(cache.get("x.css"), Some(hash_content(b"v2").as_str()));
    }

    #[test]
    fn identical_content_not_marked() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("d.json");
        fs::write(
            &path,
            format!(r#"{{"x.css": "{}"}}"#, hash_content(b"v1")),
        )
        .unwrap();

        let mut cache = HashCache::load(&path).unwrap();
        assert!(!cache.check("x.css", b"v1"));
        assert!(!cache.is_dirty());
        assert_eq!(cache.get("x.css"), Some(hash_content(b"v1").as_str()));
    }

    #[test]
    fn new_path_is_changed() {
        let mut cache = HashCache::empty();
        assert!(cache.check("new.html", b"<p>"));
        assert!(cache.is_dirty());
    }

    #[test]
    fn rollback_restores_previous_value() {
        let mut cache = HashCache::empty();
        cache.check("a.html", b"1");
        let mut cache = {
            // Simulate a fresh run starting from the saved state
            let tmp = TempDir::new().unwrap();
            let path = tmp.path().join("d.json");
            cache.save(&path).unwrap();
            HashCache::load(&path).unwrap()
        };
        cache.check("a.html", b"2");
        cache.check("b.html", b"new");
        cache.rollback("a.html");
        cache.rollback("b.html");
        assert_eq!(cache.get("a.html"), Some(hash_content(b"1").as_str()));
        assert_eq!(cache.get("b.html"), None);
    }

    #[test]
    fn save_writes_pretty_sorted_json() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cache/d.json");
        let mut cache = HashCache::empty();
        cache.check("z.html", b"z");
        cache.check("a.html", b"a");
        cache.save(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("{\n  \"a.html\""));
        let loaded = HashCache::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn load_missing_file_returns_empty() {
        let tmp = TempDir::new().unwrap();
        let cache = HashCache::load(&tmp.path().join("nope.json")).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn corrupt_cache_is_error_but_loads_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("d.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(HashCache::load(&path), Err(CacheError::Json(_))));
        assert!(HashCache::load_or_empty(&path).is_empty());
    }

    #[test]
    fn tracker_loads_lazily_and_flushes_once() {
        let tmp = TempDir::new().unwrap();
        let tracker = DeployTracker::new(tmp.path());
        let cache_file = tracker.cache_path("d.example");

        assert!(tracker.has_changed("d.example", "index.html", b"<p>"));
        assert!(!tracker.has_changed("d.example", "index.html", b"<p>"));
        assert!(!cache_file.exists());

        assert!(tracker.flush("d.example").unwrap());
        assert!(cache_file.exists());
        // Released after flush; nothing left to write
        assert!(!tracker.flush("d.example").unwrap());

        let reloaded = DeployTracker::new(tmp.path());
        assert!(!reloaded.has_changed("d.example", "index.html", b"<p>"));
    }

    #[test]
    fn tracker_keeps_domains_apart() {
        let tmp = TempDir::new().unwrap();
        let tracker = DeployTracker::new(tmp.path());
        assert!(tracker.has_changed("a.example", "index.html", b"same"));
        assert!(tracker.has_changed("b.example", "index.html", b"same"));
    }

    #[test]
    fn tracker_concurrent_updates_not_lost() {
        let tmp = TempDir::new().unwrap();
        let tracker = DeployTracker::new(tmp.path());
        std::thread::scope(|s| {
            for t in 0..4 {
                let tracker = &tracker;
                s.spawn(move || {
                    for i in 0..50 {
                        tracker.has_changed("d.example", &format!("{t}/{i}.html"), b"x");
                    }
                });
            }
        });
        tracker.flush("d.example").unwrap();
        let cache = HashCache::load(&tracker.cache_path("d.example")).unwrap();
        assert_eq!(cache.len(), 200);
    }

    #[test]
    fn rolled_back_entries_not_persisted() {
        let tmp = TempDir::new().unwrap();
        let tracker = DeployTracker::new(tmp.path());
        tracker.has_changed("d.example", "a.html", b"a");
        tracker.rollback("d.example", "a.html");
        tracker.flush("d.example").unwrap();
        let cache = HashCache::load(&tracker.cache_path("d.example")).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn precomputed_hash_compares_like_content() {
        let mut cache = HashCache::empty();
        assert!(cache.check("a.html", b"a"));
        assert!(!cache.check_hash("a.html", hash_content(b"a")));
        assert!(cache.check_hash("a.html", hash_content(b"b")));
    }

    #[test]
    fn tracker_domains_updated_concurrently() {
        let tmp = TempDir::new().unwrap();
        let tracker = DeployTracker::new(tmp.path());
        let domains = ["a.example", "b.example", "c.example", "d.example"];
        std::thread::scope(|s| {
            for domain in domains {
                let tracker = &tracker;
                s.spawn(move || {
                    for i in 0..50 {
                        assert!(tracker.has_changed(domain, &format!("{i}.html"), domain.as_bytes()));
                    }
                    tracker.flush(domain).unwrap();
                });
            }
        });
        for domain in domains {
            let cache = HashCache::load(&tracker.cache_path(domain)).unwrap();
            assert_eq!(cache.len(), 50);
            assert_eq!(cache.get("0.html"), Some(hash_content(domain.as_bytes()).as_str()));
        }
    }
}
