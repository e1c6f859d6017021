//! hpc-bridge orchestrator daemon
//!
//! Tracks batch jobs on remote clusters and forwards their ports to this
//! machine. Clients talk to it over localhost IPC.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hb_orchestrator::daemon;

#[derive(Parser)]
#[command(name = "hb-orchestrator")]
#[command(about = "hpc-bridge orchestrator daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// IPC bind address (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = daemon::load_config(args.config.as_deref())?;
    let ipc_address = args.bind.unwrap_or_else(|| config.ipc_address());

    let cancel = CancellationToken::new();
    daemon::spawn_signal_handler(cancel.clone());

    daemon::run(config, ipc_address, cancel).await
}
