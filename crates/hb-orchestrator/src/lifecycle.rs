//! Job lifecycle state machine
//!
//! SLURM reports a job through a long list of transient states, and a
//! freshly submitted job may not be visible to `squeue` at all for a while.
//! [`transition`] folds each raw observation into a stable
//! [`LifecycleState`] plus the outcome the caller should report.

use hb_core::traits::PollOutcome;
use hb_core::LifecycleState;

/// Default number of unrecognized observations tolerated in a row
pub const DEFAULT_MAX_RETRIES: u32 = 100;

/// Raw scheduler state, as far as the lifecycle cares
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerState {
    Running,
    Pending,
    Configuring,
    Completing,
    Completed,
    /// Unparseable output or a job `squeue` no longer lists
    Unknown,
    /// The status query itself failed
    Error,
    /// Anything else (`FAILED`, `TIMEOUT`, `PREEMPTED`, ...)
    Other(String),
}

impl SchedulerState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "RUNNING" => SchedulerState::Running,
            "PENDING" => SchedulerState::Pending,
            "CONFIGURING" => SchedulerState::Configuring,
            "COMPLETING" => SchedulerState::Completing,
            "COMPLETED" => SchedulerState::Completed,
            "UNKNOWN" => SchedulerState::Unknown,
            "ERROR" => SchedulerState::Error,
            _ => SchedulerState::Other(raw.trim().to_string()),
        }
    }
}

/// Per-job context the transition depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionContext {
    pub awaiting_shutdown: bool,
    pub retry_count: u32,
    pub max_retries: u32,
}

/// Result of one observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub state: LifecycleState,
    pub retry_count: u32,
    pub outcome: PollOutcome,
}

impl Transition {
    /// Whether the job was observed running, which is when forwarding starts
    pub fn is_running(&self) -> bool {
        self.state == LifecycleState::Running
    }
}

/// Advance `current` given one raw scheduler observation
pub fn transition(
    current: LifecycleState,
    observed: &SchedulerState,
    ctx: TransitionContext,
) -> Transition {
    match observed {
        SchedulerState::Running => Transition {
            state: LifecycleState::Running,
            retry_count: 0,
            outcome: PollOutcome::Alive,
        },
        SchedulerState::Pending | SchedulerState::Configuring => Transition {
            state: LifecycleState::Pending,
            retry_count: 0,
            outcome: PollOutcome::Alive,
        },
        // A failed query says nothing about the job itself
        SchedulerState::Error => Transition {
            state: current,
            retry_count: ctx.retry_count,
            outcome: PollOutcome::FAILED,
        },
        SchedulerState::Completing | SchedulerState::Completed | SchedulerState::Unknown
            if ctx.awaiting_shutdown =>
        {
            Transition {
                state: LifecycleState::Unknown,
                retry_count: ctx.retry_count,
                outcome: PollOutcome::COMPLETED,
            }
        }
        _ if ctx.retry_count < ctx.max_retries => Transition {
            state: LifecycleState::Pending,
            retry_count: ctx.retry_count + 1,
            outcome: PollOutcome::Alive,
        },
        _ => Transition {
            state: LifecycleState::Unknown,
            retry_count: 0,
            outcome: PollOutcome::FAILED,
        },
    }
}
