//! hb-orchestrator: remote batch jobs as local network services
//!
//! The orchestrator submits jobs to a SLURM cluster over SSH, tracks their
//! lifecycle by polling the scheduler, and once a job runs forwards its
//! ports to the local machine through an SSH tunnel. It exposes these
//! operations as a library (`Orchestrator`, which implements
//! `hb_core::traits::JobLifecycle`) and over a localhost IPC interface.

pub mod daemon;
pub mod ipc;
pub mod lifecycle;
pub mod orchestrator;
pub mod ports;
pub mod remote;
pub mod scheduler;
pub mod script;
pub mod state;
pub mod store;
pub mod tunnel;

pub use orchestrator::Orchestrator;
pub use state::OrchestratorState;
