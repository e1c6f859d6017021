//! hb-cli: Command-line interface for hpc-bridge
//!
//! Provides the `hpc-bridge` CLI for running the orchestrator daemon and
//! submitting, inspecting and signalling remote batch jobs through it.

pub mod commands;
pub mod ipc;
pub mod output;
