//! IPC client for communicating with orchestrator
//!
//! Uses TCP on localhost for cross-platform compatibility.

mod client;

pub use client::OrchestratorClient;

// Re-export constants and types from hb_core
pub use hb_core::ipc::{default_ipc_address, ClusterSelector, OrchestratorStatus, DEFAULT_IPC_PORT};
