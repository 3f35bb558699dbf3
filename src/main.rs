use clap::{Parser, Subcommand};
use disperse::config::{self, CONFIG_FILENAME};
use disperse::deploy::{self, DeployContext};
use disperse::output::{self, DomainLabels};
use disperse::pipeline::{self, BuildContext};
use disperse::types::Layout;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Flags shared by build and deploy.
#[derive(clap::Args, Clone)]
struct SelectArgs {
    /// Only this domain, whether active or not
    #[arg(long)]
    site: Option<String>,

    /// Only files whose name matches this glob (e.g. "*.css"). Disables
    /// orphan cleanup during build.
    #[arg(long)]
    filter: Option<String>,
}

#[derive(Parser)]
#[command(name = "disperse")]
#[command(about = "Build and deploy many static sites from shared templates")]
#[command(long_about = "\
Build and deploy many static sites from shared templates

Project structure:

  <root>/
  ├── config.toml                  # One [sites.\"<domain>\"] table per site
  ├── src/
  │   ├── partials/                # Partials available to every template
  │   ├── templates/<template>/    # Shared files, cloned into each subscriber
  │   └── sites/<domain>/          # A site's own files (override the template)
  ├── build/<domain>/              # Build output, deployed as is
  └── cache/<domain>.json          # Hashes of files deployed over SFTP

Files ending in .tpl are rendered with the site's config as data and
written as .html. HTML, JS and CSS are minified; JS and CSS files of a
directory are bundled into app.min.js / app.min.css.

Run 'disperse gen-config' to generate a documented config.toml.")]
#[command(version)]
struct Cli {
    /// Project root
    #[arg(long, default_value = ".", global = true)]
    root: PathBuf,

    /// Config file (default: <root>/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build sites into build/<domain>/
    Build(SelectArgs),
    /// Upload changed files of built sites
    Deploy(SelectArgs),
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing();

    let layout = Layout::new(&cli.root);
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| layout.root().join(CONFIG_FILENAME));

    match cli.command {
        Command::Build(args) => {
            let mut config = config::load_config(&config_path)?;
            let domains = config::resolve_domains(&mut config, args.site.as_deref())?;
            let ctx = BuildContext {
                layout: &layout,
                config: &config,
                domains: &domains,
                filter: args.filter.as_deref(),
            };

            let (tx, rx) = std::sync::mpsc::channel();
            let color = std::io::stdout().is_terminal();
            let printer = std::thread::spawn(move || {
                let mut labels = DomainLabels::new(color);
                for event in rx {
                    for line in output::format_build_event(&event, &mut labels) {
                        println!("{}", line);
                    }
                }
            });
            let result = pipeline::build(&ctx, Some(&tx));
            drop(tx);
            printer.join().map_err(|_| "output thread panicked")?;

            let report = result?;
            output::print_build_summary(&report);
        }
        Command::Deploy(args) => {
            let mut config = config::load_config(&config_path)?;
            let domains = config::resolve_domains(&mut config, args.site.as_deref())?;
            let ctx = DeployContext {
                layout: &layout,
                config: &config,
                domains: &domains,
                filter: args.filter.as_deref(),
            };

            let (tx, rx) = std::sync::mpsc::channel();
            let printer = std::thread::spawn(move || {
                for event in rx {
                    for line in output::format_deploy_event(&event) {
                        println!("{}", line);
                    }
                }
            });
            let report = deploy::deploy(&ctx, Some(tx));
            printer.join().map_err(|_| "output thread panicked")?;

            output::print_deploy_summary(&report);
            if report.has_failures() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Diagnostics go to stderr, filtered by `RUST_LOG` (default `info`).
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
