//! IPC server for CLI communication
//!
//! Provides the localhost TCP server that the `hpc-bridge` CLI and other
//! local clients use to talk to the running orchestrator daemon.

mod server;

pub use server::IpcServer;
