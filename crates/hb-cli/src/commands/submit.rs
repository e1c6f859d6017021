//! Submit command implementation

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};

use hb_core::config::ClusterTarget;
use hb_core::types::JobSpec;
use hb_core::ConnectionDescriptor;

use crate::ipc::{ClusterSelector, OrchestratorClient};
use crate::output::{print_error, print_success};

/// Inline cluster description from the command line
#[derive(Debug, Default, Clone)]
pub struct InlineCluster {
    pub login_node: Option<String>,
    pub username: Option<String>,
    pub proxy_jump: Option<String>,
    pub compute_username: Option<String>,
    pub modules: Vec<String>,
    pub env: Vec<String>,
}

/// Parse a `KEY=VALUE` argument
pub fn parse_key_value(arg: &str) -> Result<(String, String)> {
    let (key, value) = arg
        .split_once('=')
        .with_context(|| format!("Expected KEY=VALUE, got '{}'", arg))?;
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("Empty key in '{}'", arg);
    }
    Ok((key.to_string(), value.to_string()))
}

/// Turn `--cluster` or the inline flags into a selector
pub fn build_selector(named: Option<String>, inline: InlineCluster) -> Result<ClusterSelector> {
    if let Some(name) = named {
        if inline.login_node.is_some() || inline.username.is_some() {
            anyhow::bail!("--cluster cannot be combined with --login-node or --user");
        }
        return Ok(ClusterSelector::Named(name));
    }

    let login_node = inline
        .login_node
        .context("Either --cluster or --login-node is required")?;
    let username = inline
        .username
        .context("--user is required with --login-node")?;

    let mut target = ClusterTarget::new(login_node, username);
    target.proxy_jump = inline.proxy_jump.unwrap_or_default();
    target.compute_username = inline.compute_username;
    target.modules = inline.modules;
    for pair in &inline.env {
        let (key, value) = parse_key_value(pair)?;
        target.env.insert(key, value);
    }

    Ok(ClusterSelector::Inline(target))
}

/// Read a connection descriptor and apply `NAME=PORT` overrides
pub fn load_connection(file: Option<&Path>, ports: &[String]) -> Result<ConnectionDescriptor> {
    let mut connection = match file {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read connection file {:?}", path))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Connection file {:?} is not a JSON object", path))?
        }
        None => ConnectionDescriptor::new(),
    };

    for pair in ports {
        let (name, port) = parse_key_value(pair)?;
        let port: u16 = port
            .trim()
            .parse()
            .with_context(|| format!("Invalid port in '{}'", pair))?;
        connection.set_port(&name, port);
    }

    Ok(connection)
}

/// Assemble the job spec
pub fn build_spec(
    directives: &[String],
    working_dir: Option<String>,
    command: Vec<String>,
) -> Result<JobSpec> {
    let directives = directives
        .iter()
        .map(|d| parse_key_value(d))
        .collect::<Result<BTreeMap<_, _>>>()?;

    Ok(JobSpec {
        directives,
        working_dir,
        command: if command.is_empty() { None } else { Some(command) },
    })
}

/// Execute the submit command
pub async fn submit_command(
    client: &mut OrchestratorClient,
    spec: JobSpec,
    cluster: ClusterSelector,
    connection: ConnectionDescriptor,
) -> Result<()> {
    match client.submit(spec, cluster, connection).await {
        Ok(job_id) => {
            print_success(&format!("Submitted job {}", job_id));
            Ok(())
        }
        Err(e) => {
            print_error(&format!("Failed to submit job: {}", e));
            Err(e)
        }
    }
}
