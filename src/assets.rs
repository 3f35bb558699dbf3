//! Asset pipeline: selective compression and per-domain bundling.
//!
//! ## Compression
//!
//! Markup, scripts and stylesheets are compressed unless their file name
//! marks them as already minified (`.min.` anywhere in the name):
//!
//! ```text
//! index.html     → compressed (whitespace collapsed)
//! js/app.js      → compressed
//! js/app.min.js  → untouched
//! img/logo.svg   → untouched
//! ```
//!
//! The minifiers themselves sit behind [`Compressor`]; this module only
//! decides which files are eligible and keeps the size bookkeeping.
//!
//! ## Bundling
//!
//! After compression every script and stylesheet is appended to the
//! [`Package`] for its `(domain, extension)`. Packages are emitted once the
//! input is exhausted, named `app.min.<ext>` in the directory of their first
//! member:
//!
//! ```text
//! a.example/js/a.js ─┐
//! a.example/js/b.js ─┴→ a.example/js/app.min.js  (a.js bytes, then b.js bytes)
//! ```
//!
//! Member order is the order files arrive in, which [`crate::select`] keeps
//! lexical.

use crate::types::{BuiltFile, extension_of};
use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Base name of emitted bundles.
pub const PACKAGE_STEM: &str = "app.min";

#[derive(Error, Debug)]
#[error("Failed to compress {kind:?} content: {message}")]
pub struct CompressError {
    pub kind: AssetKind,
    pub message: String,
}

/// Kinds of files the pipeline knows how to compress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Markup,
    Script,
    Stylesheet,
}

impl AssetKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "html" | "htm" => Some(AssetKind::Markup),
            "js" => Some(AssetKind::Script),
            "css" => Some(AssetKind::Stylesheet),
            _ => None,
        }
    }
}

/// Byte-level minifier used by the pipeline.
pub trait Compressor {
    fn compress(&self, kind: AssetKind, contents: &[u8]) -> Result<Vec<u8>, CompressError>;
}

/// Production compressor: `minify-html` for markup, `minifier` for scripts
/// and stylesheets.
#[derive(Debug, Default, Clone, Copy)]
pub struct Minifier;

impl Compressor for Minifier {
    fn compress(&self, kind: AssetKind, contents: &[u8]) -> Result<Vec<u8>, CompressError> {
        match kind {
            AssetKind::Markup => {
                let cfg = minify_html::Cfg::new();
                Ok(minify_html::minify(contents, &cfg))
            }
            AssetKind::Script => {
                let source = utf8(kind, contents)?;
                Ok(minifier::js::minify(source).to_string().into_bytes())
            }
            AssetKind::Stylesheet => {
                let source = utf8(kind, contents)?;
                minifier::css::minify(source)
                    .map(|css| css.to_string().into_bytes())
                    .map_err(|message| CompressError {
                        kind,
                        message: message.to_string(),
                    })
            }
        }
    }
}

fn utf8(kind: AssetKind, contents: &[u8]) -> Result<&str, CompressError> {
    std::str::from_utf8(contents).map_err(|e| CompressError {
        kind,
        message: e.to_string(),
    })
}

/// True when a file should go through the compressor.
pub fn is_compressible(file: &BuiltFile) -> bool {
    AssetKind::from_extension(&file.extension()).is_some() && !file.file_name().contains(".min.")
}

/// True when a file is bundled into its domain's package.
pub fn is_packable(file: &BuiltFile) -> bool {
    is_bundled(&file.path)
}

/// True for paths whose files end up in a package: scripts and stylesheets.
pub fn is_bundled(path: &Path) -> bool {
    matches!(
        AssetKind::from_extension(&extension_of(path)),
        Some(AssetKind::Script | AssetKind::Stylesheet)
    )
}

/// Compress a file if it is eligible, otherwise return it unchanged.
///
/// A compressor failure is logged and the file passes through as-is.
pub fn compress(compressor: &dyn Compressor, file: BuiltFile) -> BuiltFile {
    if !is_compressible(&file) {
        return file;
    }
    let Some(kind) = AssetKind::from_extension(&file.extension()) else {
        return file;
    };
    match compressor.compress(kind, &file.contents) {
        Ok(contents) => file.with_contents(contents),
        Err(e) => {
            tracing::warn!(file = %file.key(), error = %e, "compression failed, keeping original");
            file
        }
    }
}

/// Signed size change in percent, `None` when the size did not change.
///
/// `1000 → 600` is `-40`, `0 → n` has no meaningful ratio and yields `None`.
pub fn size_delta_percent(original: u64, current: u64) -> Option<i64> {
    if original == current || original == 0 {
        return None;
    }
    let delta = (current as f64 - original as f64) * 100.0 / original as f64;
    Some(delta.round() as i64)
}

/// One concatenated bundle for a `(domain, extension)` pair.
#[derive(Debug, Clone, Default)]
pub struct Package {
    contents: Vec<u8>,
    /// Output byte range → originating source path.
    source_map: Vec<(Range<usize>, PathBuf)>,
    original_size: u64,
}

impl Package {
    pub fn add(&mut self, file: &BuiltFile) {
        let start = self.contents.len();
        self.contents.extend_from_slice(&file.contents);
        self.source_map
            .push((start..self.contents.len(), file.path.clone()));
        self.original_size += file.original_size;
    }

    pub fn is_empty(&self) -> bool {
        self.source_map.is_empty()
    }

    pub fn source_map(&self) -> &[(Range<usize>, PathBuf)] {
        &self.source_map
    }

    /// Source path the output byte at `offset` came from.
    pub fn source_at(&self, offset: usize) -> Option<&PathBuf> {
        self.source_map
            .iter()
            .find(|(range, _)| range.contains(&offset))
            .map(|(_, path)| path)
    }

    /// Emitted path: the first member's directory + `app.min.<ext>`.
    pub fn output_path(&self, extension: &str) -> Option<PathBuf> {
        let (_, first) = self.source_map.first()?;
        Some(first.with_file_name(format!("{PACKAGE_STEM}.{extension}")))
    }

    /// Finish the package as a built file. Empty packages yield nothing.
    pub fn into_file(self, domain: &str, extension: &str) -> Option<BuiltFile> {
        let path = self.output_path(extension)?;
        Some(BuiltFile {
            domain: domain.to_string(),
            path,
            contents: self.contents,
            original_size: self.original_size,
        })
    }
}

/// Bundling state of a [`Packer`].
#[derive(Debug)]
enum PackerState {
    /// Absorbing packable files from the input.
    Collecting(BTreeMap<(String, String), Package>),
    /// Input exhausted; emitting the finished packages.
    Flushed(std::vec::IntoIter<BuiltFile>),
}

/// Iterator adaptor that absorbs scripts and stylesheets into packages and
/// emits the packages after its input ends. Other files pass straight
/// through.
pub struct Packer<I> {
    inner: I,
    state: PackerState,
}

impl<I> Packer<I>
where
    I: Iterator<Item = BuiltFile>,
{
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            state: PackerState::Collecting(BTreeMap::new()),
        }
    }
}

impl<I> Iterator for Packer<I>
where
    I: Iterator<Item = BuiltFile>,
{
    type Item = BuiltFile;

    fn next(&mut self) -> Option<BuiltFile> {
        loop {
            match &mut self.state {
                PackerState::Collecting(packages) => match self.inner.next() {
                    Some(file) if is_packable(&file) => {
                        let key = (file.domain.clone(), file.extension());
                        packages.entry(key).or_default().add(&file);
                    }
                    Some(file) => return Some(file),
                    None => {
                        let finished: Vec<BuiltFile> = std::mem::take(packages)
                            .into_iter()
                            .filter_map(|((domain, ext), package)| package.into_file(&domain, &ext))
                            .collect();
                        self.state = PackerState::Flushed(finished.into_iter());
                    }
                },
                PackerState::Flushed(finished) => return finished.next(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::path::Path;

    /// Compressor that records what it was asked to compress and strips
    /// spaces.
    #[derive(Default)]
    struct RecordingCompressor {
        seen: RefCell<Vec<AssetKind>>,
    }

    impl Compressor for RecordingCompressor {
        fn compress(&self, kind: AssetKind, contents: &[u8]) -> Result<Vec<u8>, CompressError> {
            self.seen.borrow_mut().push(kind);
            Ok(contents.iter().copied().filter(|b| *b != b' ').collect())
        }
    }

    struct FailingCompressor;

    impl Compressor for FailingCompressor {
        fn compress(&self, kind: AssetKind, _: &[u8]) -> Result<Vec<u8>, CompressError> {
            Err(CompressError {
                kind,
                message: "unterminated comment".into(),
            })
        }
    }

    fn file(domain: &str, path: &str, contents: &str) -> BuiltFile {
        BuiltFile {
            domain: domain.into(),
            path: PathBuf::from(path),
            contents: contents.as_bytes().to_vec(),
            original_size: contents.len() as u64,
        }
    }

    #[test]
    fn minified_name_never_compressed() {
        let compressor = RecordingCompressor::default();
        let out = compress(&compressor, file("d", "js/app.min.js", "var a = 1;"));
        assert_eq!(out.contents, b"var a = 1;");
        assert!(compressor.seen.borrow().is_empty());
    }

    #[test]
    fn plain_script_compressed() {
        let compressor = RecordingCompressor::default();
        let out = compress(&compressor, file("d", "app.js", "var a = 1;"));
        assert_eq!(out.contents, b"vara=1;");
        assert_eq!(out.original_size, 10);
        assert_eq!(*compressor.seen.borrow(), vec![AssetKind::Script]);
    }

    #[test]
    fn eligibility_by_extension() {
        assert!(is_compressible(&file("d", "index.html", "")));
        assert!(is_compressible(&file("d", "site.css", "")));
        assert!(!is_compressible(&file("d", "site.min.css", "")));
        assert!(!is_compressible(&file("d", "logo.svg", "")));
        assert!(is_packable(&file("d", "site.min.css", "")));
        assert!(!is_packable(&file("d", "index.html", "")));
    }

    #[test]
    fn uppercase_extensions_still_eligible() {
        assert!(is_compressible(&file("d", "js/App.JS", "")));
        assert!(is_packable(&file("d", "js/App.JS", "")));
        assert!(is_compressible(&file("d", "Site.CSS", "")));

        let input = vec![file("d", "js/A.JS", "A;"), file("d", "js/b.js", "B;")];
        let out: Vec<BuiltFile> = Packer::new(input.into_iter()).collect();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].path, Path::new("js/app.min.js"));
        assert_eq!(out[0].contents, b"A;B;");
    }

    #[test]
    fn compressor_failure_keeps_original() {
        let out = compress(&FailingCompressor, file("d", "site.css", "a { }"));
        assert_eq!(out.contents, b"a { }");
    }

    #[test]
    fn size_delta_rounds() {
        assert_eq!(size_delta_percent(1000, 600), Some(-40));
        assert_eq!(size_delta_percent(3, 4), Some(33));
        assert_eq!(size_delta_percent(10, 10), None);
        assert_eq!(size_delta_percent(0, 10), None);
    }

    #[test]
    fn concatenation_is_ordered_and_named_after_first_member() {
        let input = vec![
            file("d", "js/a.js", "A;"),
            file("d", "js/b.js", "B;"),
            file("d", "index.html", "<p>"),
        ];
        let out: Vec<BuiltFile> = Packer::new(input.into_iter()).collect();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].path, Path::new("index.html"));
        assert_eq!(out[1].path, Path::new("js/app.min.js"));
        assert_eq!(out[1].contents, b"A;B;");
        assert_eq!(out[1].original_size, 4);
    }

    #[test]
    fn packages_split_by_domain_and_extension() {
        let input = vec![
            file("d1", "a.js", "1"),
            file("d2", "b.js", "2"),
            file("d1", "css/a.css", "x"),
            file("d1", "c.js", "3"),
        ];
        let out: Vec<BuiltFile> = Packer::new(input.into_iter()).collect();
        let keys: Vec<String> = out.iter().map(|f| f.key()).collect();
        assert_eq!(
            keys,
            vec!["d1/css/app.min.css", "d1/app.min.js", "d2/app.min.js"]
        );
        assert_eq!(out[1].contents, b"13");
    }

    #[test]
    fn no_packable_files_no_packages() {
        let input = vec![file("d", "index.html", "<p>")];
        let out: Vec<BuiltFile> = Packer::new(input.into_iter()).collect();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn empty_package_not_emitted() {
        assert!(Package::default().into_file("d", "js").is_none());
    }

    #[test]
    fn source_map_recovers_members() {
        let mut package = Package::default();
        package.add(&file("d", "js/a.js", "AAA"));
        package.add(&file("d", "js/b.js", "BB"));
        assert_eq!(package.source_at(0), Some(&PathBuf::from("js/a.js")));
        assert_eq!(package.source_at(3), Some(&PathBuf::from("js/b.js")));
        assert_eq!(package.source_at(5), None);
        assert_eq!(package.source_map()[1].0, 3..5);
    }

    #[test]
    fn minifier_collapses_markup_whitespace() {
        let out = Minifier
            .compress(AssetKind::Markup, b"<p>\n    hello   world\n</p>")
            .unwrap();
        assert!(out.len() < 26);
    }

    #[test]
    fn minifier_shrinks_script_and_stylesheet() {
        let js = b"function add(a, b) {\n    return a + b;\n}\n";
        let css = b"body {\n    color: red;\n}\n";
        assert!(Minifier.compress(AssetKind::Script, js).unwrap().len() < js.len());
        assert!(Minifier.compress(AssetKind::Stylesheet, css).unwrap().len() < css.len());
    }
}
