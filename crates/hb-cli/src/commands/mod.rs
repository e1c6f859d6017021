//! CLI command implementations

mod config;
mod jobs;
mod submit;

pub use config::{config_init, config_path, config_show};
pub use jobs::{
    cleanup_command, info_command, list_command, parse_signal, signal_command, status_command,
};
pub use submit::{
    build_selector, build_spec, load_connection, parse_key_value, submit_command, InlineCluster,
};
