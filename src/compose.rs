//! Template composition: template expansion, data binding and rendering.
//!
//! ## Template Expansion
//!
//! A file under `templates/<T>/` is cloned once for every selected domain
//! whose `template` is `T`. The clone keeps its relative path, so
//! `templates/basic/css/site.css` becomes `css/site.css` of each subscriber.
//! A domain's own file at the same relative path wins over the clone.
//!
//! ## Rendering
//!
//! Files ending in `.tpl` are rendered with [upon] against the domain's
//! context: its site table from `config.toml` (secrets excluded) plus a
//! `domain` field. The output takes the `.html` extension.
//!
//! ## Partials
//!
//! Anything inside a `partials/` directory is input to rendering only and is
//! never emitted. `.tpl` partials are registered under their path below the
//! partials directory without extension, in this order (later wins):
//!
//! ```text
//! src/partials/header.tpl                  → "header"
//! src/templates/<T>/partials/layouts/a.tpl → "layouts/a"
//! src/sites/<domain>/partials/header.tpl   → "header" (overrides global)
//! ```
//!
//! and included with `{% include "header" %}`.
//!
//! A domain whose partials cannot be registered keeps building: its
//! templates fail one by one with the setup error, its other files pass
//! through, and sibling domains are unaffected.

use crate::config::Config;
use crate::select::{SelectError, SourceGlob, list_glob};
use crate::types::{BuiltFile, Layout, Origin, SourceFile, extension_of, slash_path};
use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use upon::Engine;

/// Extension of template-language files.
pub const TEMPLATE_EXTENSION: &str = "tpl";

/// Extension rendered templates are given.
pub const OUTPUT_EXTENSION: &str = "html";

/// Directory name marking partials at any depth.
pub const PARTIALS_DIR: &str = "partials";

/// A single file failed to render. The run continues without it.
#[derive(Error, Debug)]
#[error("Failed to render {domain}/{}: {message}", path.display())]
pub struct RenderError {
    pub domain: String,
    pub path: PathBuf,
    pub message: String,
}

impl RenderError {
    /// Output tree key the file renders to when it succeeds.
    pub fn output_key(&self) -> String {
        format!(
            "{}/{}",
            self.domain,
            slash_path(&self.path.with_extension(OUTPUT_EXTENSION))
        )
    }
}

#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("Source selection failed: {0}")]
    Select(#[from] SelectError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid partial {name} for {domain}: {message}")]
    Partial {
        domain: String,
        name: String,
        message: String,
    },
}

/// True when a relative path lies inside a `partials` directory.
pub fn is_partial(path: &Path) -> bool {
    path.parent().is_some_and(|parent| {
        parent
            .components()
            .any(|c| matches!(c, Component::Normal(name) if name == PARTIALS_DIR))
    })
}

/// True for template-language files.
pub fn is_template(path: &Path) -> bool {
    extension_of(path) == TEMPLATE_EXTENSION
}

/// Clones template files into the domains that subscribe to them.
#[derive(Debug, Default)]
pub struct Expander {
    /// template name → subscribing domains, in selection order
    subscribers: BTreeMap<String, Vec<String>>,
    /// `(domain, relative path)` pairs the domain provides itself
    shadowed: HashSet<(String, PathBuf)>,
}

impl Expander {
    pub fn new(config: &Config, domains: &[String]) -> Self {
        let mut subscribers: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for domain in domains {
            if let Some(template) = config.sites.get(domain).and_then(|s| s.template.clone()) {
                subscribers.entry(template).or_default().push(domain.clone());
            }
        }
        Self {
            subscribers,
            shadowed: HashSet::new(),
        }
    }

    /// Record that `domain` has its own file at `path`, which suppresses the
    /// template clone for that path.
    pub fn shadow(&mut self, domain: &str, path: &Path) {
        self.shadowed.insert((domain.to_string(), path.to_path_buf()));
    }

    /// Expand one source file into per-domain source files.
    ///
    /// Site files pass through untouched. Template files yield one clone
    /// per subscriber; a template nobody subscribes to yields nothing.
    pub fn expand(&self, file: SourceFile) -> Vec<SourceFile> {
        let template = match &file.origin {
            Origin::Site(_) => return vec![file],
            Origin::Template(template) => template,
        };
        let Some(domains) = self.subscribers.get(template) else {
            return Vec::new();
        };
        domains
            .iter()
            .filter(|domain| {
                !self
                    .shadowed
                    .contains(&((*domain).clone(), file.path.clone()))
            })
            .map(|domain| SourceFile {
                origin: Origin::Site(domain.clone()),
                path: file.path.clone(),
                contents: file.contents.clone(),
                original_size: file.original_size,
            })
            .collect()
    }
}

/// Rendering state for one domain: its own engine and data context.
struct DomainRenderer {
    engine: Engine<'static>,
    context: serde_json::Value,
    /// Why this domain cannot render templates, if setup failed.
    setup_error: Option<String>,
}

/// Turns per-domain source files into built files.
pub struct Composer {
    renderers: BTreeMap<String, DomainRenderer>,
}

impl Composer {
    /// Prepare an engine and context for every selected domain.
    ///
    /// Setup failures are logged and kept with the domain they belong to.
    pub fn new(layout: &Layout, config: &Config, domains: &[String]) -> Self {
        let mut renderers = BTreeMap::new();
        for domain in domains {
            let Some(site) = config.sites.get(domain) else {
                continue;
            };

            let mut partial_roots = vec![layout.partials_dir()];
            if let Some(template) = &site.template {
                partial_roots.push(layout.template_dir(template).join(PARTIALS_DIR));
            }
            partial_roots.push(layout.site_dir(domain).join(PARTIALS_DIR));

            let mut engine = Engine::new();
            let mut setup_error = partial_roots
                .iter()
                .try_for_each(|root| register_partials(&mut engine, domain, root))
                .err();

            let context = match serde_json::to_value(site) {
                Ok(mut context) => {
                    if let serde_json::Value::Object(map) = &mut context {
                        map.insert("domain".into(), serde_json::Value::String(domain.clone()));
                    }
                    context
                }
                Err(e) => {
                    if setup_error.is_none() {
                        setup_error = Some(e.into());
                    }
                    serde_json::Value::Null
                }
            };

            if let Some(e) = &setup_error {
                tracing::warn!(domain = %domain, error = %e, "templates of this domain will not render");
            }
            renderers.insert(
                domain.clone(),
                DomainRenderer {
                    engine,
                    context,
                    setup_error: setup_error.map(|e| e.to_string()),
                },
            );
        }
        Self { renderers }
    }

    /// Data context a domain's templates render against.
    pub fn context(&self, domain: &str) -> Option<&serde_json::Value> {
        self.renderers.get(domain).map(|r| &r.context)
    }

    /// Compose one per-domain source file.
    ///
    /// Returns `None` for files that are not emitted (partials, files of
    /// unselected domains, template-origin files that were not expanded).
    pub fn compose(&self, file: SourceFile) -> Option<Result<BuiltFile, RenderError>> {
        let Origin::Site(domain) = file.origin else {
            return None;
        };
        if is_partial(&file.path) {
            return None;
        }
        let renderer = self.renderers.get(&domain)?;

        if !is_template(&file.path) {
            return Some(Ok(BuiltFile {
                domain,
                path: file.path,
                contents: file.contents,
                original_size: file.original_size,
            }));
        }

        let rendered = match &renderer.setup_error {
            Some(message) => Err(message.clone()),
            None => render(renderer, &file.contents),
        };
        let rendered = rendered.map_err(|message| RenderError {
            domain: domain.clone(),
            path: file.path.clone(),
            message,
        });
        Some(rendered.map(|html| BuiltFile {
            domain,
            path: file.path.with_extension(OUTPUT_EXTENSION),
            contents: html.into_bytes(),
            original_size: file.original_size,
        }))
    }
}

fn render(renderer: &DomainRenderer, source: &[u8]) -> Result<String, String> {
    let source = String::from_utf8(source.to_vec()).map_err(|e| e.to_string())?;
    let template = renderer.engine.compile(source).map_err(|e| e.to_string())?;
    template
        .render(&renderer.engine, &renderer.context)
        .to_string()
        .map_err(|e| e.to_string())
}

/// Register every `.tpl` file under `root` as a named partial.
fn register_partials(engine: &mut Engine<'static>, domain: &str, root: &Path) -> Result<(), ComposeError> {
    let glob = SourceGlob {
        origin: Origin::Site(domain.to_string()),
        root: root.to_path_buf(),
        pattern: format!("**/*.{TEMPLATE_EXTENSION}"),
        exclude: Vec::new(),
    };
    for entry in list_glob(&glob)? {
        let name = slash_path(&entry.path.with_extension(""));
        let source = std::fs::read_to_string(&entry.absolute)?;
        engine
            .add_template(name.clone(), source)
            .map_err(|e| ComposeError::Partial {
                domain: domain.to_string(),
                name: name.clone(),
                message: e.to_string(),
            })?;
        tracing::debug!(domain, partial = %name, "registered partial");
    }
    Ok(())
}
