use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use darksite::{DarksiteConfig, DarksiteError, DarksiteResult, Orchestrator};
use darksite_core::exec::SystemCommandExecutor;

const DEFAULT_LOG_FILTER: &str = "darksite=info,darksite_core=info";

#[derive(Parser)]
#[command(name = "darksite")]
#[command(about = "Converge a darksite cluster node: command mesh, WireGuard planes, SSH trust, playbooks", long_about = None)]
struct Cli {
    /// TOML configuration file (environment overrides still apply)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "darksite_core::mesh=debug"
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Full convergence run (the default)
    Apply,
    /// Ensure keys, re-render planes and restart the ones that changed
    RefreshPlanes {
        /// Plane to refresh; repeat for several, omit for all
        #[arg(long = "plane")]
        planes: Vec<String>,
    },
    /// Validate the seed and show how this node sees it
    CheckSeed {
        /// Seed document to check instead of the configured candidates
        #[arg(long)]
        seed: Option<PathBuf>,

        /// Hostname to resolve instead of the local one
        #[arg(long)]
        hostname: Option<String>,
    },
    /// Print the configuration engine inventory targets
    Inventory,
}

fn init_logging(level: Option<&str>) -> DarksiteResult<()> {
    let filter = match level {
        Some(level) => tracing_subscriber::EnvFilter::try_new(level),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .or_else(|_| tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER)),
    }
    .map_err(|e| DarksiteError::ConfigError(format!("Invalid log filter: {}", e)))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> DarksiteResult<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref())?;

    let config = DarksiteConfig::load(cli.config.as_deref())?;
    let orchestrator = Orchestrator::new(config, Arc::new(SystemCommandExecutor));

    match cli.command.unwrap_or(Commands::Apply) {
        Commands::Apply => {
            let report = orchestrator.apply().await?;
            if let Some(error) = &report.hub_error {
                tracing::warn!("Finished with a hub-phase failure: {}", error);
            }
        }
        Commands::RefreshPlanes { planes } => {
            for outcome in orchestrator.refresh_planes(&planes).await? {
                println!(
                    "{}: {} ({} peers)",
                    outcome.plane,
                    if outcome.changed { "updated" } else { "unchanged" },
                    outcome.peers
                );
            }
        }
        Commands::CheckSeed { seed, hostname } => {
            let orchestrator = match hostname {
                Some(hostname) => orchestrator.with_hostname(hostname),
                None => orchestrator,
            };
            let summary = orchestrator.check_seed(seed).await?;
            print!("{}", summary);
        }
        Commands::Inventory => {
            for target in orchestrator.inventory().await? {
                println!("{}\t{}", target.hostname, target.address);
            }
        }
    }

    Ok(())
}
