//! Lifecycle interface driven by host kernel-manager adapters

use std::time::Duration;

use async_trait::async_trait;

use crate::config::ClusterTarget;
use crate::error::OrchestratorError;
use crate::types::{ConnectionDescriptor, JobId, JobSpec};

/// Result of one liveness poll
///
/// Mirrors the "None while alive, exit code once gone" contract host
/// process managers expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The job is queued or running
    Alive,
    /// The job is gone; 0 for a clean completion, non-zero for a failure
    Exited(i32),
}

impl PollOutcome {
    /// Clean completion after a requested shutdown
    pub const COMPLETED: PollOutcome = PollOutcome::Exited(0);
    /// Query failure or vanished job
    pub const FAILED: PollOutcome = PollOutcome::Exited(1);

    /// Exit code, or `None` while alive
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            PollOutcome::Alive => None,
            PollOutcome::Exited(code) => Some(*code),
        }
    }

    pub fn is_alive(&self) -> bool {
        matches!(self, PollOutcome::Alive)
    }
}

/// Start/poll/signal/shutdown/cleanup operations over a remote job
///
/// An adapter maps its host's callbacks onto these calls; the adapter
/// itself lives outside this workspace.
#[async_trait]
pub trait JobLifecycle: Send + Sync {
    /// Submit a job and start tracking it
    async fn start(
        &self,
        spec: JobSpec,
        cluster: ClusterTarget,
        connection: ConnectionDescriptor,
    ) -> Result<JobId, OrchestratorError>;

    /// Poll the scheduler once and advance the job's lifecycle
    async fn poll(&self, job_id: &JobId) -> Result<PollOutcome, OrchestratorError>;

    /// Deliver a signal; signal 0 only polls
    async fn send_signal(&self, job_id: &JobId, signum: i32) -> Result<bool, OrchestratorError>;

    /// SIGKILL the job if it is running; `Ok(false)` when nothing was sent
    async fn kill(&self, job_id: &JobId) -> Result<bool, OrchestratorError>;

    /// SIGTERM the job if it is running; `Ok(false)` when nothing was sent
    async fn terminate(&self, job_id: &JobId) -> Result<bool, OrchestratorError>;

    /// Mark the job as shutting down so completion reads as clean
    async fn request_shutdown(&self, job_id: &JobId) -> Result<(), OrchestratorError>;

    /// Wait for a job that is shutting down to stop, then release its tunnel
    ///
    /// Polls every `interval` while shutdown is requested and the job is
    /// alive. Unbounded; callers wrap it in a timeout.
    async fn wait(
        &self,
        job_id: &JobId,
        interval: Duration,
    ) -> Result<PollOutcome, OrchestratorError>;

    /// Release the tunnel and local ports held for the job
    async fn cleanup(&self, job_id: &JobId) -> Result<(), OrchestratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_outcome_exit_codes() {
        assert_eq!(PollOutcome::Alive.exit_code(), None);
        assert_eq!(PollOutcome::COMPLETED.exit_code(), Some(0));
        assert_eq!(PollOutcome::FAILED.exit_code(), Some(1));
        assert!(PollOutcome::Alive.is_alive());
        assert!(!PollOutcome::FAILED.is_alive());
    }
}
