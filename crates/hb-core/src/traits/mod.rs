//! Core trait definitions

mod lifecycle;

pub use lifecycle::{JobLifecycle, PollOutcome};
