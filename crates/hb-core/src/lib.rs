//! hb-core: Core abstractions and configuration for hpc-bridge
//!
//! This crate provides the shared job model, error taxonomy, configuration
//! structures and IPC protocol used by the orchestrator daemon and the CLI.

pub mod config;
pub mod error;
pub mod ipc;
pub mod signal;
pub mod time;
pub mod traits;
pub mod types;

pub use error::OrchestratorError;
pub use types::{ConnectionDescriptor, Job, JobId, LifecycleState, PortMapEntry};
