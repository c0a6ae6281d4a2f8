//! Fetch, patch, build and install the WASI SDK used by the test tools.

use std::{path::PathBuf, process::ExitCode};

use anyhow::Context;
use build_wasi_sdk::{
    CACHE_DIR, HttpTransport, Layout, PROJECT_ROOT, Registry, SystemRunner, ToolchainState,
    ensure_repository, is_fetched, provision,
};
use clap::{ArgAction, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None, propagate_version = true)]
struct Cli {
    /// Project root. Defaults to two levels above this tool's directory
    #[arg(long, env = "BUILD_WASI_SDK_ROOT", global = true)]
    root: Option<PathBuf>,
    /// Where downloaded archives are kept between runs
    #[arg(long, env = "BUILD_WASI_SDK_CACHE", global = true)]
    cache_dir: Option<PathBuf>,
    /// More logging, repeat for more detail
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch every dependency, then patch, build and install the SDK (default)
    Provision,
    /// Fetch and unpack dependencies without building
    Fetch {
        /// Repositories to fetch. Defaults to all of them
        names: Vec<String>,
    },
    /// Show which stages have completed
    Status,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match cli.verbose {
        0 => EnvFilter::new("build_wasi_sdk=info"),
        1 => EnvFilter::new("build_wasi_sdk=debug"),
        _ => EnvFilter::new("debug"),
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let root = cli.root.unwrap_or_else(|| PROJECT_ROOT.clone());
    let root = root
        .canonicalize()
        .with_context(|| format!("resolve project root {}", root.display()))?;
    info!("the project root is {}", root.display());

    let layout = Layout::new(root, cli.cache_dir.unwrap_or_else(|| CACHE_DIR.clone()));
    let registry = Registry::builtin();

    match cli.command.unwrap_or(Commands::Provision) {
        Commands::Provision => {
            provision(&registry, &layout, &HttpTransport::new()?, &SystemRunner).await
        }
        Commands::Fetch { names } => {
            let names = if names.is_empty() {
                registry.iter().map(|repo| repo.name.clone()).collect()
            } else {
                names
            };
            let transport = HttpTransport::new()?;
            for name in &names {
                ensure_repository(&registry, &layout, &transport, name).await?;
            }
            Ok(())
        }
        Commands::Status => {
            for repo in registry.iter() {
                let state = if is_fetched(&layout.store_dir(repo)).await {
                    "fetched"
                } else {
                    "missing"
                };
                println!("{:<14}{state:<10}{}", repo.name, repo.store_dir.display());
            }
            println!(
                "{:<14}{}",
                "toolchain",
                ToolchainState::read(&registry, &layout).await
            );
            Ok(())
        }
    }
}
