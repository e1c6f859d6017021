//! IPC client for communicating with the orchestrator
//!
//! One request line out, one response line back, over a connection that is
//! opened lazily and reused for the lifetime of the client.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use hb_core::ipc::{
    default_ipc_address, ClusterSelector, IpcRequest, IpcResponse, OrchestratorStatus,
};
use hb_core::types::{JobSpec, JobStatusReport, JobSummary};
use hb_core::{ConnectionDescriptor, Job};

/// Client for communicating with the orchestrator daemon
pub struct OrchestratorClient {
    address: String,
    stream: Option<BufReader<TcpStream>>,
}

impl OrchestratorClient {
    /// Create a new client with default address
    pub fn new() -> Self {
        Self::with_address(default_ipc_address())
    }

    /// Create a new client with custom address
    pub fn with_address(address: String) -> Self {
        Self {
            address,
            stream: None,
        }
    }

    /// Get the address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Connect to the orchestrator
    pub async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        tracing::debug!("Connecting to orchestrator at {}", self.address);

        let stream = TcpStream::connect(&self.address).await.with_context(|| {
            format!(
                "Failed to connect to orchestrator at {}. Is it running?",
                self.address
            )
        })?;

        self.stream = Some(BufReader::new(stream));
        Ok(())
    }

    /// Check if the orchestrator is running
    pub async fn ping(&mut self) -> Result<bool> {
        self.connect().await?;

        match self.send_request(IpcRequest::Ping).await {
            Ok(IpcResponse::Pong) => Ok(true),
            _ => Ok(false),
        }
    }

    /// Get orchestrator status
    pub async fn status(&mut self) -> Result<OrchestratorStatus> {
        match self.request(IpcRequest::GetStatus).await? {
            IpcResponse::Status(status) => Ok(status),
            other => unexpected(other),
        }
    }

    /// Submit a job
    pub async fn submit(
        &mut self,
        spec: JobSpec,
        cluster: ClusterSelector,
        connection: ConnectionDescriptor,
    ) -> Result<String> {
        let request = IpcRequest::Submit {
            spec,
            cluster,
            connection,
        };
        match self.request(request).await? {
            IpcResponse::Submitted { job_id } => Ok(job_id),
            other => unexpected(other),
        }
    }

    /// Poll a job once
    pub async fn job_status(&mut self, job_id: &str) -> Result<JobStatusReport> {
        let request = IpcRequest::JobStatus {
            job_id: job_id.to_string(),
        };
        match self.request(request).await? {
            IpcResponse::JobStatus(report) => Ok(report),
            other => unexpected(other),
        }
    }

    /// Signal a job
    pub async fn signal(&mut self, job_id: &str, signum: i32) -> Result<bool> {
        let request = IpcRequest::Signal {
            job_id: job_id.to_string(),
            signum,
        };
        match self.request(request).await? {
            IpcResponse::Signaled { success } => Ok(success),
            other => unexpected(other),
        }
    }

    /// Full record of a job
    pub async fn info(&mut self, job_id: &str) -> Result<Job> {
        let request = IpcRequest::Info {
            job_id: job_id.to_string(),
        };
        match self.request(request).await? {
            IpcResponse::Info(job) => Ok(job),
            other => unexpected(other),
        }
    }

    /// List tracked jobs
    pub async fn list_jobs(&mut self) -> Result<Vec<JobSummary>> {
        match self.request(IpcRequest::ListJobs).await? {
            IpcResponse::Jobs { jobs } => Ok(jobs),
            other => unexpected(other),
        }
    }

    /// Close a job's tunnel and release its ports
    pub async fn cleanup(&mut self, job_id: &str) -> Result<()> {
        let request = IpcRequest::Cleanup {
            job_id: job_id.to_string(),
        };
        match self.request(request).await? {
            IpcResponse::Ok => Ok(()),
            other => unexpected(other),
        }
    }

    /// Request orchestrator shutdown
    pub async fn shutdown(&mut self) -> Result<()> {
        match self.request(IpcRequest::Shutdown).await? {
            IpcResponse::Ok => Ok(()),
            other => unexpected(other),
        }
    }

    /// Connect if needed, send, and turn error responses into errors
    async fn request(&mut self, request: IpcRequest) -> Result<IpcResponse> {
        self.connect().await?;
        match self.send_request(request).await? {
            IpcResponse::Error { message } => anyhow::bail!("{}", message),
            response => Ok(response),
        }
    }

    async fn send_request(&mut self, request: IpcRequest) -> Result<IpcResponse> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Not connected"))?;

        // Send request as JSON line
        let mut request_json = serde_json::to_string(&request)?;
        request_json.push('\n');
        stream.get_mut().write_all(request_json.as_bytes()).await?;

        // Read response line
        let mut response_line = String::new();
        if stream.read_line(&mut response_line).await? == 0 {
            self.stream = None;
            anyhow::bail!("Orchestrator closed the connection");
        }

        let response: IpcResponse = serde_json::from_str(&response_line).with_context(|| {
            format!("Invalid response from orchestrator: {}", response_line.trim())
        })?;
        Ok(response)
    }
}

impl Default for OrchestratorClient {
    fn default() -> Self {
        Self::new()
    }
}

fn unexpected<T>(response: IpcResponse) -> Result<T> {
    anyhow::bail!("Unexpected response: {:?}", response)
}
