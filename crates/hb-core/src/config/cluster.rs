//! Cluster target configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::PreconditionFailure;

/// Placeholder in a command template replaced by the connection-info file path
pub const CONNECTION_FILE_PLACEHOLDER: &str = "{connection_file}";

/// Credentials and environment for one cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterTarget {
    /// Login node the scheduler commands run on
    pub login_node: String,

    /// Optional bastion in front of the login node
    #[serde(default)]
    pub proxy_jump: String,

    /// Remote username
    pub username: String,

    /// Username on compute nodes, when it differs from `username`
    #[serde(default)]
    pub compute_username: Option<String>,

    /// Environment exported in the job script
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Modules loaded before the command runs
    #[serde(default)]
    pub modules: Vec<String>,

    /// Command to execute once resources are granted
    #[serde(default)]
    pub command: Vec<String>,
}

impl ClusterTarget {
    /// Create a target with just a login node and username
    pub fn new(login_node: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            login_node: login_node.into(),
            username: username.into(),
            ..Default::default()
        }
    }

    /// Check the fields every remote channel needs
    pub fn validate(&self) -> Result<(), PreconditionFailure> {
        if self.username.trim().is_empty() {
            return Err(PreconditionFailure::new("cluster username is empty"));
        }
        if self.login_node.trim().is_empty() {
            return Err(PreconditionFailure::new("cluster login node is empty"));
        }
        Ok(())
    }

    /// Username used on compute nodes
    pub fn compute_user(&self) -> &str {
        self.compute_username
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(&self.username)
    }

    /// Proxy jump host, if one is configured
    pub fn proxy(&self) -> Option<&str> {
        Some(self.proxy_jump.trim()).filter(|p| !p.is_empty())
    }
}
