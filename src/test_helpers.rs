//! Shared test utilities for the disperse test suite.
//!
//! Filesystem fixtures are built file by file inside a `TempDir`, so each
//! test states exactly the project it runs against.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! write_file(&tmp.path().join("src/sites/a.example/index.tpl"), "{{ domain }}");
//! // ... run a build ...
//! assert_eq!(tree(&tmp.path().join("build")), vec!["a.example/index.html"]);
//! ```

use std::path::Path;

/// Write `contents` to `path`, creating parent directories.
pub fn write_file(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}

/// Read a file as UTF-8. Panics with the path on failure.
pub fn read(path: &Path) -> String {
    std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("failed to read {}: {e}", path.display()))
}

/// Every file under `root` as sorted `/`-separated relative paths.
pub fn tree(root: &Path) -> Vec<String> {
    crate::select::list_tree(root).unwrap()
}
