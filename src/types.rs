//! File records and project layout shared by all pipeline stages.
//!
//! Stages never mutate a record in place: a stage consumes a file and
//! produces a new one, so a template file cloned into two domains yields two
//! independent records.

use std::path::{Path, PathBuf};

/// Where a source file came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Origin {
    /// `src/sites/<domain>/...`
    Site(String),
    /// `src/templates/<template>/...`
    Template(String),
}

/// A file read from the source tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub origin: Origin,
    /// Path relative to the origin root, e.g. `css/site.css`.
    pub path: PathBuf,
    pub contents: Vec<u8>,
    /// Size as first read from disk, kept for compression reporting.
    pub original_size: u64,
}

impl SourceFile {
    pub fn new(origin: Origin, path: impl Into<PathBuf>, contents: Vec<u8>) -> Self {
        let original_size = contents.len() as u64;
        Self {
            origin,
            path: path.into(),
            contents,
            original_size,
        }
    }
}

/// A file produced for one domain's output tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltFile {
    pub domain: String,
    /// Path relative to `build/<domain>/`.
    pub path: PathBuf,
    pub contents: Vec<u8>,
    /// Pre-compression size (sum of members for packages).
    pub original_size: u64,
}

impl BuiltFile {
    /// Lowercase extension without the dot, or `""`.
    pub fn extension(&self) -> String {
        extension_of(&self.path)
    }

    /// Final component of the path.
    pub fn file_name(&self) -> &str {
        self.path.file_name().and_then(|n| n.to_str()).unwrap_or("")
    }

    /// Same file with new contents; everything else is carried over.
    pub fn with_contents(&self, contents: Vec<u8>) -> Self {
        Self {
            domain: self.domain.clone(),
            path: self.path.clone(),
            contents,
            original_size: self.original_size,
        }
    }

    /// `<domain>/<path>` with forward slashes, used as the output tree key.
    pub fn key(&self) -> String {
        format!("{}/{}", self.domain, slash_path(&self.path))
    }
}

/// Lowercase extension of a path without the dot, or `""`.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// Render a relative path with `/` separators regardless of platform.
pub fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Directory layout of a project, rooted at the directory holding
/// `config.toml`.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sources_dir(&self) -> PathBuf {
        self.root.join("src")
    }

    pub fn sites_dir(&self) -> PathBuf {
        self.sources_dir().join("sites")
    }

    pub fn site_dir(&self, domain: &str) -> PathBuf {
        self.sites_dir().join(domain)
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.sources_dir().join("templates")
    }

    pub fn template_dir(&self, template: &str) -> PathBuf {
        self.templates_dir().join(template)
    }

    /// Partials shared by every site.
    pub fn partials_dir(&self) -> PathBuf {
        self.sources_dir().join("partials")
    }

    pub fn build_dir(&self) -> PathBuf {
        self.root.join("build")
    }

    pub fn output_dir(&self, domain: &str) -> PathBuf {
        self.build_dir().join(domain)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_file_key_uses_forward_slashes() {
        let file = BuiltFile {
            domain: "a.example".into(),
            path: Path::new("css").join("site.css"),
            contents: vec![],
            original_size: 0,
        };
        assert_eq!(file.key(), "a.example/css/site.css");
        assert_eq!(file.extension(), "css");
        assert_eq!(file.file_name(), "site.css");
    }

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(extension_of(Path::new("js/App.JS")), "js");
        assert_eq!(extension_of(Path::new("Page.Tpl")), "tpl");
        assert_eq!(extension_of(Path::new("Makefile")), "");
    }

    #[test]
    fn with_contents_keeps_original_size() {
        let file = BuiltFile {
            domain: "a.example".into(),
            path: PathBuf::from("app.js"),
            contents: b"var  a = 1;".to_vec(),
            original_size: 11,
        };
        let smaller = file.with_contents(b"var a=1;".to_vec());
        assert_eq!(smaller.original_size, 11);
        assert_eq!(smaller.contents, b"var a=1;");
        assert_eq!(file.contents, b"var  a = 1;");
    }

    #[test]
    fn source_file_records_original_size() {
        let file = SourceFile::new(Origin::Template("basic".into()), "x.tpl", b"abc".to_vec());
        assert_eq!(file.original_size, 3);
    }

    #[test]
    fn layout_paths() {
        let layout = Layout::new("/p");
        assert_eq!(layout.site_dir("a"), PathBuf::from("/p/src/sites/a"));
        assert_eq!(layout.template_dir("t"), PathBuf::from("/p/src/templates/t"));
        assert_eq!(layout.output_dir("a"), PathBuf::from("/p/build/a"));
        assert_eq!(layout.cache_dir(), PathBuf::from("/p/cache"));
    }
}
