//! Core domain types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::ClusterTarget;
use crate::time::current_time_millis;

/// Scheduler-assigned job identifier
///
/// Treated as opaque everywhere except at the scheduler boundary, where it
/// is always a run of ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Create a new job ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this ID has the shape the scheduler hands out
    pub fn is_numeric(&self) -> bool {
        !self.0.is_empty() && self.0.chars().all(|c| c.is_ascii_digit())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The orchestrator's stable view of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    /// Initial and final-quiescent state
    #[default]
    Unknown,
    /// Queued, configuring, or not yet visible to status queries
    Pending,
    /// Resources granted and the job is executing
    Running,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Unknown => "UNKNOWN",
            LifecycleState::Pending => "PENDING",
            LifecycleState::Running => "RUNNING",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One forwarded port: the job's remote port and the local port bound to it
///
/// Serializes as a `[remote_port, local_port]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(u16, u16)", into = "(u16, u16)")]
pub struct PortMapEntry {
    pub remote_port: u16,
    pub local_port: u16,
}

impl PortMapEntry {
    pub fn new(remote_port: u16, local_port: u16) -> Self {
        Self {
            remote_port,
            local_port,
        }
    }
}

impl From<(u16, u16)> for PortMapEntry {
    fn from((remote_port, local_port): (u16, u16)) -> Self {
        Self::new(remote_port, local_port)
    }
}

impl From<PortMapEntry> for (u16, u16) {
    fn from(entry: PortMapEntry) -> Self {
        (entry.remote_port, entry.local_port)
    }
}

/// Named channels a client needs to reach a running job
///
/// A flat JSON object; port-valued entries may be integers or numeric
/// strings. Unknown keys are carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionDescriptor(pub Map<String, Value>);

impl ConnectionDescriptor {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Read a port-valued entry
    pub fn port(&self, name: &str) -> Option<u16> {
        match self.0.get(name)? {
            Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Overwrite a port-valued entry
    pub fn set_port(&mut self, name: &str, port: u16) {
        self.0.insert(name.to_string(), Value::from(port));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// What to run once the scheduler grants resources
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Scheduler directives, e.g. `time = "01:00:00"`
    #[serde(default)]
    pub directives: BTreeMap<String, String>,

    /// Working directory for the job
    #[serde(default)]
    pub working_dir: Option<String>,

    /// Command template overriding the cluster's
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

/// A tracked job
///
/// Carries no live process handles, so it serializes as-is for `info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub cluster: ClusterTarget,
    pub state: LifecycleState,
    /// Execution node, once the scheduler reports one
    pub node: Option<String>,
    pub eta: String,
    pub port_map: Vec<PortMapEntry>,
    /// Whether a forwarding process has been claimed for this job
    pub forwarding: bool,
    pub retry_count: u32,
    pub awaiting_shutdown: bool,
    pub connection: ConnectionDescriptor,
    /// Unix millis
    pub created_at: u64,
    /// Unix millis of the last transition
    pub updated_at: u64,
}

impl Job {
    /// Create a freshly submitted job
    pub fn new(id: JobId, cluster: ClusterTarget, connection: ConnectionDescriptor) -> Self {
        let now = current_time_millis();
        Self {
            id,
            cluster,
            state: LifecycleState::Unknown,
            node: None,
            eta: String::new(),
            port_map: Vec::new(),
            forwarding: false,
            retry_count: 0,
            awaiting_shutdown: false,
            connection,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record that the job changed
    pub fn touch(&mut self) {
        self.updated_at = current_time_millis();
    }

    /// Summary row for listings
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id.to_string(),
            login_node: self.cluster.login_node.clone(),
            state: self.state,
            node: self.node.clone(),
            forwarding: self.forwarding,
            created_at: self.created_at,
        }
    }
}

/// Result of a status query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusReport {
    /// Lifecycle state after this poll
    pub state: LifecycleState,
    /// Raw scheduler state string that drove the transition
    pub scheduler_state: String,
    pub node: String,
    pub eta: String,
    pub port_map: Vec<PortMapEntry>,
}

/// Compact job listing entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: String,
    pub login_node: String,
    pub state: LifecycleState,
    pub node: Option<String>,
    pub forwarding: bool,
    pub created_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_numeric() {
        assert!(JobId::new("12345").is_numeric());
        assert!(!JobId::new("12345;cluster").is_numeric());
        assert!(!JobId::new("").is_numeric());
    }

    #[test]
    fn test_lifecycle_state_serializes_uppercase() {
        let json = serde_json::to_string(&LifecycleState::Pending).unwrap();
        assert_eq!(json, r#""PENDING""#);
        assert_eq!(format!("{}", LifecycleState::Running), "RUNNING");
    }

    #[test]
    fn test_port_map_serializes_as_pairs() {
        let map = vec![PortMapEntry::new(50001, 9001), PortMapEntry::new(50002, 9002)];
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, "[[50001,9001],[50002,9002]]");

        let decoded: Vec<PortMapEntry> = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, map);
    }

    #[test]
    fn test_descriptor_reads_numeric_strings() {
        let descriptor: ConnectionDescriptor = serde_json::from_str(
            r#"{"shell_port": 50001, "iopub_port": "50002", "key": "abc", "ip": "127.0.0.1"}"#,
        )
        .unwrap();
        assert_eq!(descriptor.port("shell_port"), Some(50001));
        assert_eq!(descriptor.port("iopub_port"), Some(50002));
        assert_eq!(descriptor.port("key"), None);
        assert_eq!(descriptor.port("missing"), None);
    }

    #[test]
    fn test_descriptor_set_port_keeps_other_keys() {
        let mut descriptor = ConnectionDescriptor::new();
        descriptor.insert("key", "secret");
        descriptor.insert("shell_port", 50001);
        descriptor.set_port("shell_port", 9001);

        assert_eq!(descriptor.port("shell_port"), Some(9001));
        assert_eq!(descriptor.get("key"), Some(&Value::from("secret")));
    }

    #[test]
    fn test_job_info_excludes_nothing_live() {
        let job = Job::new(
            JobId::new("42"),
            ClusterTarget::new("login.example.org", "alice"),
            ConnectionDescriptor::new(),
        );
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["id"], "42");
        assert_eq!(value["state"], "UNKNOWN");
        assert_eq!(value["portMap"], serde_json::json!([]));
        assert_eq!(value["forwarding"], false);
    }
}
