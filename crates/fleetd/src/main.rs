//! fleetd: the FleetGrid daemon.
//!
//! Runs the rollout coordinator against a redb state store: every
//! interval it takes the per-tenant tick lock, evaluates group thresholds,
//! creates actions for newly activated groups and cleans up aged actions.
//! Any number of fleetd nodes may share one store.
//!
//! # Usage
//!
//! ```text
//! fleetd run --config /etc/fleetgrid/fleet.toml --data-dir /var/lib/fleetgrid
//! fleetd once --data-dir /var/lib/fleetgrid
//! fleetd check-config --config /etc/fleetgrid/fleet.toml
//! ```

mod daemon;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use fleet_core::parse_duration;
use tracing_subscriber::EnvFilter;

use crate::daemon::Overrides;

const DEFAULT_LOG_FILTER: &str = "info,fleetd=debug,fleetgrid=debug";

#[derive(Parser)]
#[command(name = "fleetd", about = "FleetGrid rollout daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the coordinator loop until Ctrl-C.
    Run(DaemonArgs),

    /// Run one coordinator round and exit.
    Once(DaemonArgs),

    /// Parse the config file and print the effective configuration.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

#[derive(Args)]
struct DaemonArgs {
    /// Path to fleet.toml. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory for persistent state.
    #[arg(long, default_value = "/var/lib/fleetgrid")]
    data_dir: PathBuf,

    /// Lock owner name of this node.
    #[arg(long)]
    node_id: Option<String>,

    /// Period between coordinator rounds, e.g. "10s".
    #[arg(long, value_parser = parse_duration)]
    interval: Option<Duration>,

    /// Lease of the per-tenant tick lock, e.g. "30s".
    #[arg(long, value_parser = parse_duration)]
    lock_lease: Option<Duration>,
}

impl DaemonArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            node_id: self.node_id.clone(),
            interval: self.interval,
            lock_lease: self.lock_lease,
        }
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Command::Run(args) => {
            let config = daemon::load_config(args.config.as_deref(), &args.overrides())?;
            daemon::run_daemon(config, args.data_dir).await
        }
        Command::Once(args) => {
            let config = daemon::load_config(args.config.as_deref(), &args.overrides())?;
            daemon::run_once(config, &args.data_dir)
        }
        Command::CheckConfig { config } => {
            let config = daemon::load_config(Some(config.as_path()), &Overrides::default())?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}
