//! Global orchestrator state

use std::sync::Arc;

use hb_core::config::OrchestratorConfig;

use crate::orchestrator::Orchestrator;
use crate::remote::{CommandRunner, ProcessRunner};
use crate::store::{InMemoryJobStore, JobRepository};

/// Global state for the orchestrator daemon
pub struct OrchestratorState {
    /// Configuration
    pub config: OrchestratorConfig,
    /// Tracked jobs, shared with the retention sweeper
    pub store: Arc<dyn JobRepository>,
    /// Job operations
    pub orchestrator: Arc<Orchestrator>,
}

impl OrchestratorState {
    /// Create state that runs real `ssh` processes
    pub fn new(config: OrchestratorConfig) -> Self {
        Self::with_runner(config, Arc::new(ProcessRunner::new()))
    }

    /// Create state over a custom command runner
    pub fn with_runner(config: OrchestratorConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let store: Arc<dyn JobRepository> = Arc::new(InMemoryJobStore::new());
        let orchestrator = Arc::new(Orchestrator::new(config.clone(), runner, store.clone()));
        Self {
            config,
            store,
            orchestrator,
        }
    }
}
