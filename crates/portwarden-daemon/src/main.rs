//! Portwarden Daemon - Main entry point
//!
//! Serves the inventory API, runs liveness sweeps and switch reconciliation.

mod api;
mod config;
mod server;
mod state;

use anyhow::Result;
use clap::Parser;
use portwarden_core::SwitchId;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "portwarden")]
#[command(about = "Network equipment inventory with liveness sweeps and MAC-table port discovery")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "portwarden.toml")]
    config: PathBuf,

    /// Bind address for web server
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Run a single liveness sweep, print the report and exit
    #[arg(long)]
    sweep_once: bool,

    /// Reconcile one switch against its MAC table, print the report and exit
    #[arg(long, value_name = "SWITCH_ID")]
    reconcile: Option<SwitchId>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Portwarden v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(&args.config)?;

    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }

    info!(
        inventory = ?config.inventory.path,
        probe_timeout_ms = config.sweep.probe_timeout_ms,
        sweep_interval_secs = config.sweep.interval_secs,
        "Configuration loaded"
    );

    let state = state::AppState::new(config.clone())?;

    if args.sweep_once {
        info!("Running single liveness sweep");
        let report = state.sweeper.sweep().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if let Some(switch) = args.reconcile {
        info!(switch = %switch, "Running single reconciliation");
        let report = state.reconciler.reconcile(switch).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        server::run(state, &config.daemon.bind).await?;
    }

    Ok(())
}
