//! Core error types for hpc-bridge

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for orchestration calls
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// The job could not be started
    #[error("Submission error: {0}")]
    Submission(#[from] SubmissionError),

    /// Required cluster or job fields are missing
    #[error("Precondition failed: {0}")]
    Precondition(#[from] PreconditionFailure),

    /// Not enough free local ports
    #[error("{0}")]
    ResourceExhausted(#[from] ResourceExhausted),

    /// The forwarding process could not be started
    #[error("Tunnel error: {0}")]
    Tunnel(#[from] TunnelError),

    /// No tracked job with this identifier
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors from running a command over the remote execution channel
#[derive(Error, Debug)]
pub enum ExecError {
    /// The command exceeded its time bound and was killed
    #[error("Command timed out after {timeout:?}: {command}")]
    Timeout { command: String, timeout: Duration },

    /// The command ran but exited non-zero
    #[error("Command exited with code {code}: {stderr}")]
    Failed { code: i32, stderr: String },

    /// The command could not be started at all
    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl ExecError {
    /// Whether this error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecError::Timeout { .. })
    }
}

/// Job submission errors
#[derive(Error, Debug)]
pub enum SubmissionError {
    /// The submission command failed or timed out
    #[error("{0}")]
    Exec(#[from] ExecError),

    /// The scheduler answered without a job identifier
    #[error("No job id found in scheduler output: {0:?}")]
    MissingJobId(String),
}

/// Status query errors
///
/// Only surfaced by `try_poll`; `poll` folds these into state strings.
#[derive(Error, Debug)]
pub enum PollError {
    /// The status command failed
    #[error("Status query failed: {0}")]
    Exec(#[from] ExecError),

    /// The status command succeeded but its output could not be parsed
    #[error("Unexpected status output: {0:?}")]
    Malformed(String),
}

/// A required field was missing before an operation was attempted
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct PreconditionFailure(pub String);

impl PreconditionFailure {
    /// Create a new precondition failure
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// The candidate pool ran out before enough free ports were found
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Resource exhausted: requested {requested} free ports, found {found}")]
pub struct ResourceExhausted {
    pub requested: usize,
    pub found: usize,
}

/// Port-forwarding errors
#[derive(Error, Debug)]
pub enum TunnelError {
    /// Missing exec node, user or port map
    #[error("Precondition failed: {0}")]
    Precondition(#[from] PreconditionFailure),

    /// The forwarding process could not be spawned
    #[error("Failed to spawn forwarding process: {0}")]
    Spawn(#[from] ExecError),

    /// The forwarding process exited before the tunnel came up
    #[error("Forwarding process exited during startup (code {code:?})")]
    Exited { code: Option<i32> },

    /// The tunnel did not accept connections within the startup bound
    #[error("Forwarding not ready after {0:?}")]
    StartupTimeout(Duration),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Unknown cluster name
    #[error("Unknown cluster: {0}")]
    UnknownCluster(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_carries_command() {
        let err = ExecError::Timeout {
            command: "ssh user@login bash --login -c 'sbatch --parsable'".to_string(),
            timeout: Duration::from_secs(10),
        };
        assert!(err.is_timeout());
        assert!(err.to_string().contains("sbatch --parsable"));
    }

    #[test]
    fn test_submission_error_wraps_exec() {
        let err: OrchestratorError = SubmissionError::from(ExecError::Failed {
            code: 1,
            stderr: "sbatch: error: invalid partition".to_string(),
        })
        .into();
        assert!(matches!(err, OrchestratorError::Submission(_)));
        assert!(err.to_string().contains("invalid partition"));
    }

    #[test]
    fn test_resource_exhausted_display() {
        let err = ResourceExhausted {
            requested: 5,
            found: 2,
        };
        assert_eq!(
            err.to_string(),
            "Resource exhausted: requested 5 free ports, found 2"
        );
    }
}
