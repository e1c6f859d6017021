//! hpc-bridge CLI
//!
//! Single binary for running the orchestrator daemon and for submitting,
//! polling and signalling remote batch jobs through it.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hb_orchestrator::daemon;
use hpc_bridge::commands::{self, InlineCluster};
use hpc_bridge::ipc::OrchestratorClient;
use hpc_bridge::output::{format_status, print_error, print_info, print_success, print_warning};

#[derive(Parser)]
#[command(name = "hpc-bridge")]
#[command(
    author,
    version,
    about = "Run batch jobs on remote HPC clusters and reach them through SSH tunnels"
)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Orchestrator IPC address (overrides config)
    #[arg(short, long, global = true, env = "HB_IPC_ADDRESS")]
    address: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the orchestrator daemon
    #[command(alias = "start")]
    Daemon {
        /// Run in foreground (don't daemonize)
        #[arg(short, long)]
        foreground: bool,
        /// IPC bind address (overrides config)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Check whether the orchestrator is running and show its status
    Ping,

    /// Submit a job to a cluster
    Submit(SubmitArgs),

    /// Poll a job once and show its state
    Status {
        /// Scheduler job ID
        job: String,
    },

    /// Send a signal to a job (number or name, e.g. TERM; 0 only polls)
    Signal {
        /// Scheduler job ID
        job: String,
        /// Signal number or name
        signal: String,
    },

    /// Show the full record of a job as JSON
    Info {
        /// Scheduler job ID
        job: String,
    },

    /// List tracked jobs
    #[command(alias = "ls")]
    List,

    /// Close job tunnels and release their ports
    Cleanup {
        /// Scheduler job ID(s)
        #[arg(required = true)]
        jobs: Vec<String>,
    },

    /// Stop the orchestrator daemon
    #[command(alias = "stop")]
    Shutdown,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Show the effective configuration
    Show,
    /// Show the config file path
    Path,
}

#[derive(Args)]
struct SubmitArgs {
    /// Named cluster from the daemon configuration
    #[arg(long)]
    cluster: Option<String>,

    /// Login node of an inline cluster
    #[arg(long)]
    login_node: Option<String>,

    /// Remote username of an inline cluster
    #[arg(long)]
    user: Option<String>,

    /// Bastion host in front of the login node
    #[arg(long)]
    proxy_jump: Option<String>,

    /// Username on compute nodes, when it differs from --user
    #[arg(long)]
    compute_user: Option<String>,

    /// Module to load before the command runs (repeatable)
    #[arg(long = "module")]
    modules: Vec<String>,

    /// Environment variable KEY=VALUE exported in the job (repeatable)
    #[arg(long = "env")]
    env: Vec<String>,

    /// Scheduler directive KEY=VALUE, e.g. time=01:00:00 (repeatable)
    #[arg(short = 'd', long = "directive")]
    directives: Vec<String>,

    /// Working directory of the job
    #[arg(short = 'w', long)]
    workdir: Option<String>,

    /// JSON file with the connection descriptor
    #[arg(long)]
    connection: Option<PathBuf>,

    /// Connection port NAME=PORT (repeatable, overrides --connection)
    #[arg(short = 'p', long = "port")]
    ports: Vec<String>,

    /// Command to run instead of the cluster's
    #[arg(last = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let address = match cli.address {
        Some(address) => address,
        None => client_address(cli.config.as_deref()),
    };
    let mut client = OrchestratorClient::with_address(address);

    match cli.command {
        Commands::Daemon { foreground, bind } => {
            run_daemon(foreground, bind, cli.config.as_deref()).await?;
        }

        Commands::Ping => match client.status().await {
            Ok(status) => print!("{}", format_status(&status)),
            Err(e) => {
                print_error(&format!("Orchestrator is not running at {}", client.address()));
                return Err(e);
            }
        },

        Commands::Submit(args) => {
            let inline = InlineCluster {
                login_node: args.login_node,
                username: args.user,
                proxy_jump: args.proxy_jump,
                compute_username: args.compute_user,
                modules: args.modules,
                env: args.env,
            };
            let cluster = commands::build_selector(args.cluster, inline)?;
            let spec = commands::build_spec(&args.directives, args.workdir, args.command)?;
            let connection = commands::load_connection(args.connection.as_deref(), &args.ports)?;
            commands::submit_command(&mut client, spec, cluster, connection).await?;
        }

        Commands::Status { job } => {
            commands::status_command(&mut client, &job).await?;
        }

        Commands::Signal { job, signal } => {
            commands::signal_command(&mut client, &job, &signal).await?;
        }

        Commands::Info { job } => {
            commands::info_command(&mut client, &job).await?;
        }

        Commands::List => {
            commands::list_command(&mut client).await?;
        }

        Commands::Cleanup { jobs } => {
            commands::cleanup_command(&mut client, &jobs).await?;
        }

        Commands::Config { action } => match action {
            ConfigAction::Init { force } => commands::config_init(cli.config.as_deref(), force)?,
            ConfigAction::Show => commands::config_show(cli.config.as_deref())?,
            ConfigAction::Path => commands::config_path(cli.config.as_deref()),
        },

        Commands::Shutdown => {
            print_info("Stopping orchestrator...");
            match client.shutdown().await {
                Ok(()) => print_success("Orchestrator stopped"),
                Err(e) => {
                    // Connection refused likely means it's not running
                    if e.to_string().contains("Is it running") {
                        print_warning("Orchestrator is not running");
                    } else {
                        print_error(&format!("Failed to stop orchestrator: {}", e));
                        return Err(e);
                    }
                }
            }
        }
    }

    Ok(())
}

/// IPC address from the configuration, or the default one
fn client_address(config_path: Option<&Path>) -> String {
    match daemon::load_config(config_path) {
        Ok(config) => config.ipc_address(),
        Err(e) => {
            tracing::warn!("{:#}", e);
            hpc_bridge::ipc::default_ipc_address()
        }
    }
}

// ============================================================================
// Daemon
// ============================================================================

async fn run_daemon(
    foreground: bool,
    bind: Option<String>,
    config_path: Option<&Path>,
) -> Result<()> {
    if !foreground {
        // Daemonize by re-spawning ourselves
        let exe = std::env::current_exe()?;
        let mut cmd = std::process::Command::new(exe);
        cmd.arg("daemon").arg("--foreground");
        if let Some(bind) = &bind {
            cmd.arg("--bind").arg(bind);
        }
        if let Some(path) = config_path {
            cmd.arg("--config").arg(path);
        }

        let child = cmd
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()?;

        print_success(&format!("Orchestrator started (PID: {})", child.id()));
        return Ok(());
    }

    let config = daemon::load_config(config_path)?;
    let ipc_address = bind.unwrap_or_else(|| config.ipc_address());

    let cancel = CancellationToken::new();
    daemon::spawn_signal_handler(cancel.clone());

    daemon::run(config, ipc_address, cancel).await
}
