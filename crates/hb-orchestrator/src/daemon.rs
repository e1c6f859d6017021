//! Daemon entry points shared by `hb-orchestrator` and `hpc-bridge daemon`

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use hb_core::config::{self, OrchestratorConfig};

use crate::ipc::IpcServer;
use crate::state::OrchestratorState;
use crate::store::sweeper::{run_sweeper, SWEEP_INTERVAL};

/// Load the daemon configuration
///
/// An explicit path must load cleanly. Without one, the default path is
/// tried and any problem there falls back to defaults with a warning.
pub fn load_config(path: Option<&Path>) -> Result<OrchestratorConfig> {
    if let Some(path) = path {
        return config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path));
    }

    let default_path = config::default_config_path();
    if default_path.exists() {
        Ok(config::load_config(&default_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
            OrchestratorConfig::default()
        }))
    } else {
        tracing::info!("Using default configuration");
        Ok(OrchestratorConfig::default())
    }
}

/// Cancel `cancel` on Ctrl+C or SIGTERM
pub fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel.cancel();
    });
}

/// Serve IPC until `cancel` fires, then tear down every tunnel
pub async fn run(
    config: OrchestratorConfig,
    ipc_address: String,
    cancel: CancellationToken,
) -> Result<()> {
    tracing::info!(
        clusters = config.clusters.len(),
        max_retries = config.max_retries,
        address = %ipc_address,
        "Orchestrator starting"
    );

    let retention = config.job_retention;
    let state = Arc::new(OrchestratorState::new(config));

    // Evict quiescent jobs in the background
    let sweeper = tokio::spawn(run_sweeper(
        Arc::clone(&state.store),
        retention,
        SWEEP_INTERVAL,
        cancel.clone(),
    ));

    let server =
        IpcServer::new(ipc_address, Arc::clone(&state)).with_shutdown_token(cancel.clone());
    let served = server.run().await;

    // The server returns on cancellation or bind failure; make sure the sweeper follows
    cancel.cancel();
    if let Err(e) = sweeper.await {
        tracing::warn!("Sweeper task failed: {}", e);
    }

    state.orchestrator.close_all().await;
    served?;

    tracing::info!("Orchestrator shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_explicit_missing_config_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn test_explicit_config_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "ipc_port = 23456\nmax_retries = 7\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.ipc_port, 23456);
        assert_eq!(config.max_retries, 7);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            OrchestratorConfig::default(),
            "127.0.0.1:0".to_string(),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
