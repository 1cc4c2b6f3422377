//! mtvm command line interface
//!
//! Installs, activates and removes tool versions, and manages the plugins
//! that teach mtvm about new tools.

mod render;

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use mtvm_core::config::paths;
use mtvm_core::{load_configuration, Context, FileSystem, OsFs, Outcome, Phase, VersionManager};

use render::PhaseRenderer;

/// mtvm - a version manager for developer toolchains
#[derive(Parser)]
#[command(name = "mtvm", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download and install a tool version
    Install {
        /// Tool name, e.g. "go"
        tool: String,
        /// Version to install, or "latest"
        version: String,
    },
    /// Make a tool version the active one
    Use {
        tool: String,
        version: String,
        /// Install the version first if it is missing
        #[arg(short, long)]
        install: bool,
    },
    /// Remove an installed tool version
    Remove { tool: String, version: String },
    /// Manage plugins
    Plugins {
        #[command(subcommand)]
        command: PluginCommand,
    },
}

#[derive(Subcommand)]
enum PluginCommand {
    /// Install or update a plugin from its manifest URL
    Install {
        url: String,
        /// Reinstall even if the installed version is current
        #[arg(short, long)]
        force: bool,
    },
    /// Remove an installed plugin
    Remove { name: String },
    /// List installed plugins
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,mtvm=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let fs: Arc<dyn FileSystem> = Arc::new(OsFs);
    let config = load_configuration(fs.as_ref())?;
    tracing::debug!(?config, "Loaded configuration");

    let ctx = Context::new(config, fs, paths::registry_path()?);
    let manager = VersionManager::new(ctx);

    let interrupt = CancellationToken::new();
    let ctrl_c = interrupt.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut renderer = PhaseRenderer::default();
    let observe = |phase: &Phase| renderer.observe(phase);

    let outcome = match cli.command {
        Command::Install { tool, version } => {
            manager.install(&tool, &version, &interrupt, observe).await
        }
        Command::Use {
            tool,
            version,
            install,
        } => {
            manager
                .use_version(&tool, &version, install, &interrupt, observe)
                .await
        }
        Command::Remove { tool, version } => {
            manager.remove(&tool, &version, &interrupt, observe).await
        }
        Command::Plugins { command } => match command {
            PluginCommand::Install { url, force } => {
                manager.install_plugin(&url, force, &interrupt, observe).await
            }
            PluginCommand::Remove { name } => {
                manager.remove_plugin(&name, &interrupt, observe).await
            }
            PluginCommand::List => return list_plugins(&manager),
        },
    };

    Ok(render::report(&outcome))
}

fn list_plugins(manager: &VersionManager) -> anyhow::Result<u8> {
    let entries = match manager.plugins() {
        Ok(entries) => entries,
        Err(e) if e.is_not_found() => Vec::new(),
        Err(e) => return Ok(render::report(&Outcome::Failed(e))),
    };

    if entries.is_empty() {
        println!("No plugins installed");
    }
    for entry in entries {
        println!("{}\t{}\t{}", entry.name, entry.version, entry.metadata_url);
    }
    Ok(0)
}
