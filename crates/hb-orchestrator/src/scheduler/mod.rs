//! Batch job control over SLURM
//!
//! Submission, status queries and signals all go through a
//! [`RemoteChannel`] to the cluster's login node.

use std::time::Duration;

use hb_core::error::{ExecError, PollError, SubmissionError};
use hb_core::JobId;

use crate::remote::{shell_quote, RemoteChannel};

/// Raw state reported when the status query itself fails
pub const STATE_ERROR: &str = "ERROR";
/// Raw state reported when the status output cannot be parsed
pub const STATE_UNKNOWN: &str = "UNKNOWN";

/// Output format for `squeue`: state, exec host, start time
const SQUEUE_FORMAT: &str = "%T %B %S";

/// One status observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    /// Raw scheduler state, e.g. `RUNNING`
    pub state: String,
    /// Execution node, empty until assigned
    pub node: String,
    /// Scheduler's (estimated) start time
    pub eta: String,
}

impl JobStatus {
    fn fallback(state: &str) -> Self {
        Self {
            state: state.to_string(),
            node: String::new(),
            eta: String::new(),
        }
    }

    /// Parse one `%T %B %S` line
    pub fn parse(stdout: &str) -> Result<Self, PollError> {
        let fields: Vec<&str> = stdout.split_whitespace().collect();
        match fields.as_slice() {
            [state, node, eta] => Ok(Self {
                state: state.to_string(),
                node: node.to_string(),
                eta: eta.to_string(),
            }),
            _ => Err(PollError::Malformed(stdout.to_string())),
        }
    }
}

/// Job id from `sbatch` output: the first run of ASCII digits
pub fn extract_job_id(stdout: &str) -> Option<JobId> {
    let start = stdout.find(|c: char| c.is_ascii_digit())?;
    let digits: String = stdout[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    Some(JobId::new(digits))
}

/// Timeouts for each scheduler command
#[derive(Debug, Clone, Copy)]
pub struct SchedulerTimeouts {
    pub submit: Duration,
    pub poll: Duration,
    pub signal: Duration,
}

impl Default for SchedulerTimeouts {
    fn default() -> Self {
        Self {
            submit: Duration::from_secs(10),
            poll: Duration::from_secs(30),
            signal: Duration::from_secs(30),
        }
    }
}

/// Submits, polls and signals jobs on one cluster
#[derive(Debug, Clone)]
pub struct JobControl {
    channel: RemoteChannel,
    timeouts: SchedulerTimeouts,
}

impl JobControl {
    pub fn new(channel: RemoteChannel, timeouts: SchedulerTimeouts) -> Self {
        Self { channel, timeouts }
    }

    /// Pipe `script` into `sbatch --parsable` and return the new job id
    pub async fn submit(&self, script: &str) -> Result<JobId, SubmissionError> {
        let output = self
            .channel
            .execute("sbatch --parsable", Some(script), self.timeouts.submit)
            .await?;

        let job_id = extract_job_id(&output.stdout)
            .ok_or_else(|| SubmissionError::MissingJobId(output.stdout.clone()))?;

        tracing::info!(job_id = %job_id, "Job submitted");
        Ok(job_id)
    }

    /// Query the scheduler once, reporting why a query failed
    pub async fn try_poll(&self, job_id: &JobId) -> Result<JobStatus, PollError> {
        let id = checked_id(job_id)?;
        let script = format!("squeue -h -j {} -o {}", id, shell_quote(SQUEUE_FORMAT));
        let output = self
            .channel
            .execute(&script, None, self.timeouts.poll)
            .await?;
        JobStatus::parse(&output.stdout)
    }

    /// Query the scheduler once; failures become `ERROR` or `UNKNOWN`
    pub async fn poll(&self, job_id: &JobId) -> JobStatus {
        match self.try_poll(job_id).await {
            Ok(status) => status,
            Err(PollError::Exec(e)) => {
                tracing::warn!(job_id = %job_id, "Status query failed: {}", e);
                JobStatus::fallback(STATE_ERROR)
            }
            Err(PollError::Malformed(raw)) => {
                // squeue prints nothing once a job has left the queue
                tracing::debug!(job_id = %job_id, output = %raw, "Unparseable status output");
                JobStatus::fallback(STATE_UNKNOWN)
            }
        }
    }

    /// Send `signum` to the job through `scancel`
    pub async fn try_signal(&self, job_id: &JobId, signum: i32) -> Result<(), ExecError> {
        let id = checked_id(job_id).map_err(|_| ExecError::Failed {
            code: -1,
            stderr: format!("invalid job id {:?}", job_id.as_str()),
        })?;
        let script = format!("scancel -s {} {}", signum, id);
        self.channel
            .execute(&script, None, self.timeouts.signal)
            .await?;
        tracing::info!(job_id = %job_id, signum, "Signal delivered");
        Ok(())
    }

    /// Send `signum` to the job; `false` on any failure
    pub async fn signal(&self, job_id: &JobId, signum: i32) -> bool {
        match self.try_signal(job_id, signum).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(job_id = %job_id, signum, "Signal failed: {}", e);
                false
            }
        }
    }
}

fn checked_id(job_id: &JobId) -> Result<&str, PollError> {
    if job_id.is_numeric() {
        Ok(job_id.as_str())
    } else {
        Err(PollError::Malformed(format!(
            "invalid job id {:?}",
            job_id.as_str()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_job_id() {
        assert_eq!(
            extract_job_id("Submitted batch job 12345"),
            Some(JobId::new("12345"))
        );
        assert_eq!(extract_job_id("67890;expanse"), Some(JobId::new("67890")));
        assert_eq!(extract_job_id("no id here"), None);
        assert_eq!(extract_job_id(""), None);
    }

    #[test]
    fn test_parse_three_fields() {
        let status = JobStatus::parse("RUNNING exp-1-01 2026-10-17T09:00:00").unwrap();
        assert_eq!(status.state, "RUNNING");
        assert_eq!(status.node, "exp-1-01");
        assert_eq!(status.eta, "2026-10-17T09:00:00");
    }

    #[test]
    fn test_parse_rejects_other_shapes() {
        assert!(matches!(JobStatus::parse(""), Err(PollError::Malformed(_))));
        assert!(matches!(
            JobStatus::parse("PENDING n/a"),
            Err(PollError::Malformed(_))
        ));
        assert!(matches!(
            JobStatus::parse("RUNNING a b c"),
            Err(PollError::Malformed(_))
        ));
    }

    #[test]
    fn test_checked_id_rejects_injection() {
        assert!(checked_id(&JobId::new("42")).is_ok());
        assert!(checked_id(&JobId::new("42; rm -rf ~")).is_err());
    }
}
