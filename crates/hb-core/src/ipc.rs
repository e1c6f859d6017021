//! IPC protocol between the CLI and the orchestrator daemon
//!
//! One JSON object per line over TCP on 127.0.0.1, tagged by `"type"`.

use serde::{Deserialize, Serialize};

use crate::config::ClusterTarget;
use crate::types::{ConnectionDescriptor, Job, JobSpec, JobStatusReport, JobSummary};

/// Default IPC port
pub const DEFAULT_IPC_PORT: u16 = 22340;

/// Default IPC address (localhost only)
pub fn default_ipc_address() -> String {
    format!("127.0.0.1:{}", DEFAULT_IPC_PORT)
}

/// Cluster reference in a submit request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClusterSelector {
    /// A cluster from the daemon's configuration
    Named(String),
    /// A cluster described in full by the caller
    Inline(ClusterTarget),
}

/// IPC request from client to orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    /// Ping (for keepalive)
    Ping,

    /// Get daemon status
    GetStatus,

    /// Submit a job
    Submit {
        spec: JobSpec,
        cluster: ClusterSelector,
        connection: ConnectionDescriptor,
    },

    /// Poll a job once
    JobStatus { job_id: String },

    /// Signal a job
    Signal { job_id: String, signum: i32 },

    /// Full job record
    Info { job_id: String },

    /// All tracked jobs
    ListJobs,

    /// Mark a job as shutting down
    RequestShutdown { job_id: String },

    /// Close a job's tunnel and release its ports
    Cleanup { job_id: String },

    /// Stop the daemon
    Shutdown,
}

/// IPC response from orchestrator to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    /// Pong response
    Pong,

    /// Daemon status
    Status(OrchestratorStatus),

    /// Job accepted by the scheduler
    Submitted { job_id: String },

    /// Result of one poll
    JobStatus(JobStatusReport),

    /// Result of a signal
    Signaled { success: bool },

    /// Full job record
    Info(Job),

    /// Job listing
    Jobs { jobs: Vec<JobSummary> },

    /// Generic success
    Ok,

    /// Error response
    Error { message: String },
}

/// Daemon status information
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStatus {
    pub running: bool,
    pub uptime_secs: u64,
    /// Number of tracked jobs
    pub job_count: usize,
    /// Number of jobs with an active tunnel
    pub forwarding_count: usize,
    pub version: String,
    pub ipc_address: String,
}
