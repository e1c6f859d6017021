//! IPC server implementation
//!
//! Listens on localhost TCP for newline-delimited JSON requests from the CLI.
//! Each client connection is served by its own task, and every request is
//! answered with exactly one response line.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use hb_core::ipc::{IpcRequest, IpcResponse, OrchestratorStatus};
use hb_core::{JobId, OrchestratorError};

use crate::state::OrchestratorState;

/// IPC server for CLI communication
///
/// Listens on localhost (127.0.0.1) only - not accessible from network.
pub struct IpcServer {
    /// Address to bind (127.0.0.1:port)
    pub address: String,
    /// Orchestrator state
    state: Arc<OrchestratorState>,
    /// When the orchestrator started
    start_time: Instant,
    /// Cancellation token for shutdown
    shutdown_token: Option<CancellationToken>,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(address: String, state: Arc<OrchestratorState>) -> Self {
        Self {
            address,
            state,
            start_time: Instant::now(),
            shutdown_token: None,
        }
    }

    /// Set the shutdown token (call before run)
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown_token = Some(token);
        self
    }

    /// Bind the listening socket
    pub async fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(&self.address)
            .await
            .with_context(|| format!("Failed to bind IPC server to {}", self.address))
    }

    /// Start the IPC server
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept clients on `listener` until shutdown
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr()?;
        tracing::info!("IPC server listening on {}", local);

        let token = self.shutdown_token.clone().unwrap_or_default();

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = token.cancelled() => {
                    tracing::info!("IPC server shutting down");
                    return Ok(());
                }
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    // Only accept connections from localhost
                    if !peer_addr.ip().is_loopback() {
                        tracing::warn!("Rejected non-localhost connection from {}", peer_addr);
                        continue;
                    }

                    let state = Arc::clone(&self.state);
                    let start_time = self.start_time;
                    let shutdown_token = self.shutdown_token.clone();

                    tokio::spawn(async move {
                        let served = handle_client(stream, state, start_time, shutdown_token);
                        if let Err(e) = served.await {
                            tracing::warn!("IPC client error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept IPC connection: {}", e);
                }
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    state: Arc<OrchestratorState>,
    start_time: Instant,
    shutdown_token: Option<CancellationToken>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let mut stop = false;
        let response = match serde_json::from_str::<IpcRequest>(trimmed) {
            Ok(IpcRequest::Shutdown) => {
                tracing::info!("Shutdown requested via IPC");
                stop = shutdown_token.is_some();
                shutdown_response(shutdown_token.as_ref())
            }
            Ok(request) => {
                handle_request(request, &state, start_time, shutdown_token.as_ref()).await
            }
            Err(e) => IpcResponse::Error {
                message: format!("Invalid request: {}", e),
            },
        };

        let mut response_json = serde_json::to_string(&response)?;
        response_json.push('\n');
        writer.write_all(response_json.as_bytes()).await?;

        // Answer before the server stops accepting
        if stop {
            writer.flush().await?;
            if let Some(token) = &shutdown_token {
                token.cancel();
            }
            break;
        }
    }

    Ok(())
}

fn error_response(e: OrchestratorError) -> IpcResponse {
    IpcResponse::Error {
        message: e.to_string(),
    }
}

async fn handle_request(
    request: IpcRequest,
    state: &OrchestratorState,
    start_time: Instant,
    shutdown_token: Option<&CancellationToken>,
) -> IpcResponse {
    let orchestrator = &state.orchestrator;

    match request {
        IpcRequest::Ping => IpcResponse::Pong,

        IpcRequest::GetStatus => IpcResponse::Status(OrchestratorStatus {
            running: true,
            uptime_secs: start_time.elapsed().as_secs(),
            job_count: state.store.len(),
            forwarding_count: orchestrator.forwarding_count().await,
            version: env!("CARGO_PKG_VERSION").to_string(),
            ipc_address: state.config.ipc_address(),
        }),

        IpcRequest::Submit {
            spec,
            cluster,
            connection,
        } => {
            let cluster = match orchestrator.resolve_cluster(cluster) {
                Ok(cluster) => cluster,
                Err(e) => return error_response(e),
            };
            match orchestrator.submit(spec, cluster, connection).await {
                Ok(job_id) => IpcResponse::Submitted {
                    job_id: job_id.to_string(),
                },
                Err(e) => error_response(e),
            }
        }

        IpcRequest::JobStatus { job_id } => {
            match orchestrator.status(&JobId::new(job_id)).await {
                Ok(report) => IpcResponse::JobStatus(report),
                Err(e) => error_response(e),
            }
        }

        IpcRequest::Signal { job_id, signum } => {
            match orchestrator.signal(&JobId::new(job_id), signum).await {
                Ok(success) => IpcResponse::Signaled { success },
                Err(e) => error_response(e),
            }
        }

        IpcRequest::Info { job_id } => match orchestrator.info(&JobId::new(job_id)).await {
            Ok(job) => IpcResponse::Info(job),
            Err(e) => error_response(e),
        },

        IpcRequest::ListJobs => IpcResponse::Jobs {
            jobs: orchestrator.list().await,
        },

        IpcRequest::RequestShutdown { job_id } => {
            match orchestrator.request_shutdown(&JobId::new(job_id)).await {
                Ok(()) => IpcResponse::Ok,
                Err(e) => error_response(e),
            }
        }

        IpcRequest::Cleanup { job_id } => match orchestrator.cleanup(&JobId::new(job_id)).await {
            Ok(()) => IpcResponse::Ok,
            Err(e) => error_response(e),
        },

        IpcRequest::Shutdown => {
            let response = shutdown_response(shutdown_token);
            if let Some(token) = shutdown_token {
                token.cancel();
            }
            response
        }
    }
}

fn shutdown_response(shutdown_token: Option<&CancellationToken>) -> IpcResponse {
    if shutdown_token.is_some() {
        IpcResponse::Ok
    } else {
        IpcResponse::Error {
            message: "Shutdown not supported (no shutdown token configured)".to_string(),
        }
    }
}
