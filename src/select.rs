//! Source selection.
//!
//! Computes which files make up a build's input set and lists them in a
//! stable order.
//!
//! ## Globs
//!
//! ```text
//! templates/<T>/**/*        one per distinct template of the selected domains,
//!                           minus template.toml, LICENSE*, README*
//! sites/<domain>/**/<F>     one per selected domain, F = --filter or *
//! ```
//!
//! ## Ordering
//!
//! Template globs come first, in the order their first subscriber was
//! selected, then one glob per domain. Within a glob, files are sorted by
//! their `/`-separated relative path. Concatenated bundles depend on this
//! order, so it must not depend on filesystem iteration order.

use crate::config::Config;
use crate::types::{Layout, Origin, SourceFile, slash_path};
use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Files at a template root that describe the template rather than belong
/// to it.
const TEMPLATE_METADATA: &[&str] = &["template.toml", "LICENSE*", "README*"];

#[derive(Error, Debug)]
pub enum SelectError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid glob pattern: {0}")]
    Glob(#[from] globset::Error),
    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),
}

/// One declarative input pattern, rooted at a template or site directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceGlob {
    pub origin: Origin,
    pub root: PathBuf,
    /// Pattern matched against paths relative to `root`.
    pub pattern: String,
    /// Patterns removed from the match set.
    pub exclude: Vec<String>,
}

/// A file matched by a [`SourceGlob`], not yet read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub origin: Origin,
    /// Path relative to the origin root.
    pub path: PathBuf,
    pub absolute: PathBuf,
}

impl SourceEntry {
    pub fn read(&self) -> std::io::Result<SourceFile> {
        let contents = fs::read(&self.absolute)?;
        Ok(SourceFile::new(self.origin.clone(), self.path.clone(), contents))
    }
}

/// Build the glob set for the selected domains.
///
/// `filter` narrows each domain's own tree to matching file names; template
/// globs are never narrowed.
pub fn source_globs(
    layout: &Layout,
    config: &Config,
    domains: &[String],
    filter: Option<&str>,
) -> Vec<SourceGlob> {
    let mut globs: Vec<SourceGlob> = Vec::new();

    for domain in domains {
        let Some(template) = config.sites.get(domain).and_then(|s| s.template.as_ref()) else {
            continue;
        };
        let origin = Origin::Template(template.clone());
        if globs.iter().any(|g| g.origin == origin) {
            continue;
        }
        globs.push(SourceGlob {
            origin,
            root: layout.template_dir(template),
            pattern: "**/*".to_string(),
            exclude: TEMPLATE_METADATA.iter().map(|p| p.to_string()).collect(),
        });
    }

    for domain in domains {
        globs.push(SourceGlob {
            origin: Origin::Site(domain.clone()),
            root: layout.site_dir(domain),
            pattern: format!("**/{}", filter.unwrap_or("*")),
            exclude: Vec::new(),
        });
    }

    globs
}

fn compile(pattern: &str) -> Result<Glob, globset::Error> {
    GlobBuilder::new(pattern).literal_separator(true).build()
}

fn compile_set(patterns: &[String]) -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(compile(pattern)?);
    }
    builder.build()
}

/// List every file matched by `glob`, sorted by relative path.
///
/// A missing root yields no files.
pub fn list_glob(glob: &SourceGlob) -> Result<Vec<SourceEntry>, SelectError> {
    if !glob.root.is_dir() {
        tracing::debug!(root = %glob.root.display(), "source root missing, skipping");
        return Ok(Vec::new());
    }
    let include = compile(&glob.pattern)?.compile_matcher();
    let exclude = compile_set(&glob.exclude)?;

    let mut entries = Vec::new();
    for entry in WalkDir::new(&glob.root).follow_links(true) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = relative_to(entry.path(), &glob.root);
        if include.is_match(&relative) && !exclude.is_match(&relative) {
            entries.push(SourceEntry {
                origin: glob.origin.clone(),
                path: relative,
                absolute: entry.into_path(),
            });
        }
    }
    entries.sort_by_cached_key(|e| slash_path(&e.path));
    Ok(entries)
}

/// List all globs in order: glob order first, then path order within a glob.
pub fn list_sources(globs: &[SourceGlob]) -> Result<Vec<SourceEntry>, SelectError> {
    let mut all = Vec::new();
    for glob in globs {
        all.extend(list_glob(glob)?);
    }
    Ok(all)
}

/// List every file under `root` as `/`-separated relative paths, sorted.
pub fn list_tree(root: &Path) -> Result<Vec<String>, SelectError> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if entry.file_type().is_file() {
            paths.push(slash_path(&relative_to(entry.path(), root)));
        }
    }
    paths.sort();
    Ok(paths)
}

fn relative_to(path: &Path, root: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::test_helpers::write_file;
    use tempfile::TempDir;

    fn shared_template_config() -> Config {
        parse_config(
            r#"
[sites."a.example"]
template = "basic"
protocol = "ftp"

[sites."b.example"]
template = "basic"
protocol = "ftp"

[sites."c.example"]
protocol = "ftp"
"#,
        )
        .unwrap()
    }

    fn domains(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn shared_template_globbed_once() {
        let layout = Layout::new("/p");
        let config = shared_template_config();
        let globs = source_globs(
            &layout,
            &config,
            &domains(&["a.example", "b.example", "c.example"]),
            None,
        );
        let origins: Vec<&Origin> = globs.iter().map(|g| &g.origin).collect();
        assert_eq!(
            origins,
            vec![
                &Origin::Template("basic".into()),
                &Origin::Site("a.example".into()),
                &Origin::Site("b.example".into()),
                &Origin::Site("c.example".into()),
            ]
        );
    }

    #[test]
    fn filter_narrows_sites_only() {
        let layout = Layout::new("/p");
        let config = shared_template_config();
        let globs = source_globs(&layout, &config, &domains(&["a.example"]), Some("*.css"));
        assert_eq!(globs[0].pattern, "**/*");
        assert_eq!(globs[1].pattern, "**/*.css");
    }

    #[test]
    fn list_glob_sorts_and_excludes_metadata() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("templates/basic");
        write_file(&root.join("z.css"), "z");
        write_file(&root.join("a/index.tpl"), "a");
        write_file(&root.join("README.md"), "readme");
        write_file(&root.join("LICENSE"), "mit");
        write_file(&root.join("template.toml"), "");
        write_file(&root.join("docs/README.md"), "nested readme is content");

        let glob = SourceGlob {
            origin: Origin::Template("basic".into()),
            root,
            pattern: "**/*".into(),
            exclude: TEMPLATE_METADATA.iter().map(|p| p.to_string()).collect(),
        };
        let paths: Vec<String> = list_glob(&glob)
            .unwrap()
            .iter()
            .map(|e| slash_path(&e.path))
            .collect();
        assert_eq!(paths, vec!["a/index.tpl", "docs/README.md", "z.css"]);
    }

    #[test]
    fn list_glob_applies_file_name_filter_at_any_depth() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("sites/a.example");
        write_file(&root.join("index.tpl"), "");
        write_file(&root.join("site.css"), "");
        write_file(&root.join("css/extra.css"), "");

        let glob = SourceGlob {
            origin: Origin::Site("a.example".into()),
            root,
            pattern: "**/*.css".into(),
            exclude: vec![],
        };
        let paths: Vec<String> = list_glob(&glob)
            .unwrap()
            .iter()
            .map(|e| slash_path(&e.path))
            .collect();
        assert_eq!(paths, vec!["css/extra.css", "site.css"]);
    }

    #[test]
    fn list_glob_includes_dotfiles() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("sites/a.example");
        write_file(&root.join(".htaccess"), "Options -Indexes");
        let glob = SourceGlob {
            origin: Origin::Site("a.example".into()),
            root,
            pattern: "**/*".into(),
            exclude: vec![],
        };
        assert_eq!(list_glob(&glob).unwrap().len(), 1);
    }

    #[test]
    fn missing_root_yields_nothing() {
        let glob = SourceGlob {
            origin: Origin::Site("a.example".into()),
            root: PathBuf::from("/definitely/not/here"),
            pattern: "**/*".into(),
            exclude: vec![],
        };
        assert!(list_glob(&glob).unwrap().is_empty());
    }

    #[test]
    fn entry_read_loads_contents() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_path_buf();
        write_file(&root.join("x.css"), "body{}");
        let glob = SourceGlob {
            origin: Origin::Site("a.example".into()),
            root,
            pattern: "**/*".into(),
            exclude: vec![],
        };
        let entries = list_glob(&glob).unwrap();
        let file = entries[0].read().unwrap();
        assert_eq!(file.contents, b"body{}");
        assert_eq!(file.original_size, 6);
    }

    #[test]
    fn list_tree_returns_relative_slash_paths() {
        let tmp = TempDir::new().unwrap();
        write_file(&tmp.path().join("b.html"), "");
        write_file(&tmp.path().join("css/app.min.css"), "");
        assert_eq!(list_tree(tmp.path()).unwrap(), vec!["b.html", "css/app.min.css"]);
    }
}
