//! Orchestrator configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::serde_utils::duration_secs;
use super::ClusterTarget;

/// Connection-descriptor keys forwarded by default
pub const DEFAULT_FORWARD_PORTS: [&str; 5] = [
    "shell_port",
    "iopub_port",
    "stdin_port",
    "hb_port",
    "control_port",
];

/// Configuration for the orchestrator daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// IPC port for CLI communication (localhost only)
    pub ipc_port: u16,

    /// Bound on `sbatch` submission
    #[serde(with = "duration_secs")]
    pub submit_timeout: Duration,

    /// Bound on a single `squeue` status query
    #[serde(with = "duration_secs")]
    pub poll_timeout: Duration,

    /// Bound on `scancel`
    #[serde(with = "duration_secs")]
    pub signal_timeout: Duration,

    /// How long a new tunnel may take to accept connections (0 = don't wait)
    #[serde(with = "duration_secs")]
    pub tunnel_startup_timeout: Duration,

    /// Unrecognized-state polls tolerated before a job is declared gone
    pub max_retries: u32,

    /// How long quiescent jobs stay in the registry (0 = forever)
    #[serde(with = "duration_secs")]
    pub job_retention: Duration,

    /// Connection-descriptor keys whose ports are forwarded
    pub forward_ports: Vec<String>,

    /// Local port pool
    pub ports: PortPoolConfig,

    /// SSH programs and options
    pub ssh: SshConfig,

    /// Named clusters
    pub clusters: HashMap<String, ClusterTarget>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            ipc_port: 22340,
            submit_timeout: Duration::from_secs(10),
            poll_timeout: Duration::from_secs(30),
            signal_timeout: Duration::from_secs(30),
            tunnel_startup_timeout: Duration::from_secs(30),
            max_retries: 100,
            job_retention: Duration::from_secs(3600),
            forward_ports: DEFAULT_FORWARD_PORTS.iter().map(|s| s.to_string()).collect(),
            ports: PortPoolConfig::default(),
            ssh: SshConfig::default(),
            clusters: HashMap::new(),
        }
    }
}

impl OrchestratorConfig {
    /// Get the IPC address (localhost:port)
    pub fn ipc_address(&self) -> String {
        format!("127.0.0.1:{}", self.ipc_port)
    }

    /// Look up a configured cluster
    pub fn cluster(&self, name: &str) -> Option<&ClusterTarget> {
        self.clusters.get(name)
    }
}

/// Range of local ports handed out to tunnels
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortPoolConfig {
    /// First port of the pool (inclusive)
    pub start: u16,

    /// Last port of the pool (inclusive)
    pub end: u16,

    /// Ports never handed out
    pub reserved: Vec<u16>,

    /// Randomize candidate order instead of ascending
    pub shuffle: bool,

    /// Address ports are probed and bound on
    pub bind_address: String,
}

impl Default for PortPoolConfig {
    fn default() -> Self {
        Self {
            start: 9000,
            end: 9999,
            reserved: Vec::new(),
            shuffle: false,
            bind_address: "127.0.0.1".to_string(),
        }
    }
}

/// SSH programs and extra options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// ssh client binary
    pub program: String,

    /// ssh-keygen binary (used to clear stale host keys)
    pub keygen_program: String,

    /// Login shell the remote commands run under
    pub shell: String,

    /// Extra `-o` options appended to every ssh invocation
    pub options: Vec<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            keygen_program: "ssh-keygen".to_string(),
            shell: "bash".to_string(),
            options: vec!["BatchMode=yes".to_string()],
        }
    }
}
