//! fleetd — the FleetGrid daemon.
//!
//! Loads one configuration file, builds a provider and a scheduler for every
//! valid space, and runs each space's cycle loop on its own task.
//!
//! # Usage
//!
//! ```text
//! fleetd run --config /etc/fleetgrid/fleetgrid.toml
//! fleetd once --config fleetgrid.toml --data-dir /tmp/fleetgrid
//! fleetd check --config fleetgrid.toml
//! fleetd metrics --config fleetgrid.toml
//! ```

mod daemon;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use fleet_core::FleetConfig;

const DEFAULT_FILTER: &str = "info,fleetd=debug,fleetgrid=debug";

#[derive(Parser)]
#[command(name = "fleetd", about = "FleetGrid daemon", version)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct ConfigArgs {
    /// Path to the FleetGrid configuration file.
    #[arg(long, default_value = "/etc/fleetgrid/fleetgrid.toml")]
    config: PathBuf,

    /// Data directory for persistent state (overrides the file).
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run every space's cycle loop until Ctrl-C.
    Run {
        #[command(flatten)]
        args: ConfigArgs,

        /// Seconds between cycles (overrides the file).
        #[arg(long)]
        cycle_seconds: Option<u64>,
    },
    /// Run one cycle of every space and exit.
    Once {
        #[command(flatten)]
        args: ConfigArgs,
    },
    /// Validate the configuration and exit.
    Check {
        #[command(flatten)]
        args: ConfigArgs,
    },
    /// Print the latest snapshot of every space in Prometheus text format.
    Metrics {
        #[command(flatten)]
        args: ConfigArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run {
            args,
            cycle_seconds,
        } => {
            let mut config = load(&args)?;
            if let Some(seconds) = cycle_seconds {
                config.daemon.cycle_seconds = seconds;
            }
            let interval = Duration::from_secs(config.daemon.cycle_seconds.max(1));
            let spaces = daemon::assemble(&config)?;
            daemon::run(spaces, interval).await
        }
        Command::Once { args } => {
            let config = load(&args)?;
            let mut spaces = daemon::assemble(&config)?;
            daemon::run_once(&mut spaces).await
        }
        Command::Check { args } => {
            let config = load(&args)?;
            daemon::check(&config)
        }
        Command::Metrics { args } => {
            let config = load(&args)?;
            print!("{}", daemon::metrics(&config)?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load(args: &ConfigArgs) -> anyhow::Result<FleetConfig> {
    let mut config = FleetConfig::from_file(&args.config)?;
    if let Some(dir) = &args.data_dir {
        config.daemon.data_dir = dir.clone();
    }
    info!(path = ?args.config, spaces = config.spaces.len(), "configuration loaded");
    Ok(config)
}
