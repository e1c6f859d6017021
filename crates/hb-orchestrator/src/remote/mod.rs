//! Remote execution channel
//!
//! Builds `ssh` argument vectors for a cluster login node (optionally behind
//! one or two jump hosts) and runs shell scripts there through a login shell.
//!
//! SSH joins all remote arguments into a single line for the remote shell,
//! so the script is passed as one single-quoted argument. Everything else
//! stays a structured argument vector.

mod runner;

pub use runner::{CommandOutput, CommandRunner, ForwardProcess, ProcessRunner, ProcessState};

use std::sync::Arc;
use std::time::Duration;

use hb_core::config::{ClusterTarget, SshConfig};
use hb_core::error::{ExecError, PreconditionFailure};

/// Jump hosts in front of a target
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyChain {
    /// Outer bastion
    pub proxy: Option<String>,
    /// Inner hop, typically the cluster login node
    pub login: Option<String>,
}

impl ProxyChain {
    /// No jump host
    pub fn direct() -> Self {
        Self::default()
    }

    /// Build from possibly-empty strings
    pub fn from_parts(proxy: &str, login: &str) -> Self {
        let non_empty = |s: &str| Some(s.trim().to_string()).filter(|s| !s.is_empty());
        Self {
            proxy: non_empty(proxy),
            login: non_empty(login),
        }
    }

    /// The `-J` value for `user`, if any hop is set
    pub fn jump_arg(&self, user: &str) -> Option<String> {
        match (&self.proxy, &self.login) {
            (Some(proxy), Some(login)) => Some(format!("{user}@{proxy},{user}@{login}")),
            (Some(hop), None) | (None, Some(hop)) => Some(format!("{user}@{hop}")),
            (None, None) => None,
        }
    }
}

/// Build the ssh prefix targeting `user@host`
pub fn build(
    ssh: &SshConfig,
    user: &str,
    host: &str,
    chain: &ProxyChain,
) -> Result<Vec<String>, PreconditionFailure> {
    if user.trim().is_empty() {
        return Err(PreconditionFailure::new("ssh user is empty"));
    }
    if host.trim().is_empty() {
        return Err(PreconditionFailure::new("ssh host is empty"));
    }

    let mut argv = vec![ssh.program.clone(), "-T".to_string(), "-A".to_string()];
    for option in &ssh.options {
        argv.push("-o".to_string());
        argv.push(option.clone());
    }
    if let Some(jump) = chain.jump_arg(user) {
        argv.push("-J".to_string());
        argv.push(jump);
    }
    argv.push(format!("{user}@{host}"));

    tracing::trace!(?argv, "Built ssh prefix");
    Ok(argv)
}

/// POSIX single-quote `s` unless it is made only of safe characters
pub fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:@=%+,".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Render an argv for logs and error messages
pub fn display_command(argv: &[String]) -> String {
    argv.join(" ")
}

/// Channel to one cluster's login node
#[derive(Clone)]
pub struct RemoteChannel {
    prefix: Vec<String>,
    shell: String,
    runner: Arc<dyn CommandRunner>,
}

impl RemoteChannel {
    /// Create a channel for a cluster, validating its credentials
    pub fn for_cluster(
        ssh: &SshConfig,
        cluster: &ClusterTarget,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, PreconditionFailure> {
        cluster.validate()?;
        let chain = ProxyChain::from_parts(&cluster.proxy_jump, "");
        let prefix = build(ssh, &cluster.username, &cluster.login_node, &chain)?;
        Ok(Self {
            prefix,
            shell: ssh.shell.clone(),
            runner,
        })
    }

    /// Full argv running `script` under a remote login shell
    pub fn command(&self, script: &str) -> Vec<String> {
        let mut argv = self.prefix.clone();
        argv.push(self.shell.clone());
        argv.push("--login".to_string());
        argv.push("-c".to_string());
        argv.push(shell_quote(script));
        argv
    }

    /// Run `script` remotely, feeding it `stdin`, bounded by `timeout`
    pub async fn execute(
        &self,
        script: &str,
        stdin: Option<&str>,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError> {
        let argv = self.command(script);
        tracing::debug!(command = %display_command(&argv), "Running remote command");
        self.runner.run(&argv, stdin, timeout).await
    }
}

impl std::fmt::Debug for RemoteChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteChannel")
            .field("prefix", &self.prefix)
            .field("shell", &self.shell)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ssh() -> SshConfig {
        SshConfig {
            options: vec![],
            ..SshConfig::default()
        }
    }

    fn jump_args(argv: &[String]) -> Vec<&String> {
        argv.windows(2)
            .filter(|w| w[0] == "-J")
            .map(|w| &w[1])
            .collect()
    }

    #[test]
    fn test_build_direct() {
        let argv = build(&ssh(), "alice", "login.expanse.org", &ProxyChain::direct()).unwrap();
        assert_eq!(argv, vec!["ssh", "-T", "-A", "alice@login.expanse.org"]);
        assert!(jump_args(&argv).is_empty());
    }

    #[test]
    fn test_build_single_jump() {
        let chain = ProxyChain::from_parts("bastion.org", "");
        let argv = build(&ssh(), "alice", "login.expanse.org", &chain).unwrap();
        assert_eq!(jump_args(&argv), vec!["alice@bastion.org"]);
        assert_eq!(argv.last().unwrap(), "alice@login.expanse.org");
    }

    #[test]
    fn test_build_chained_jump() {
        let chain = ProxyChain::from_parts("bastion.org", "login.expanse.org");
        let argv = build(&ssh(), "alice", "exp-1-01", &chain).unwrap();
        assert_eq!(
            jump_args(&argv),
            vec!["alice@bastion.org,alice@login.expanse.org"]
        );
        assert_eq!(argv.last().unwrap(), "alice@exp-1-01");
    }

    #[test]
    fn test_build_login_only_is_single_jump() {
        let chain = ProxyChain::from_parts("", "login.expanse.org");
        assert_eq!(
            chain.jump_arg("alice").as_deref(),
            Some("alice@login.expanse.org")
        );
    }

    #[test]
    fn test_build_requires_user_and_host() {
        assert!(build(&ssh(), "", "host", &ProxyChain::direct()).is_err());
        assert!(build(&ssh(), "alice", " ", &ProxyChain::direct()).is_err());
    }

    #[test]
    fn test_build_appends_options() {
        let argv = build(
            &SshConfig::default(),
            "alice",
            "login",
            &ProxyChain::direct(),
        )
        .unwrap();
        assert_eq!(&argv[3..5], &["-o".to_string(), "BatchMode=yes".to_string()]);
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("sbatch"), "sbatch");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("squeue -h"), "'squeue -h'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_channel_wraps_script_in_login_shell() {
        let cluster = ClusterTarget::new("login.expanse.org", "alice");
        let channel =
            RemoteChannel::for_cluster(&ssh(), &cluster, Arc::new(ProcessRunner::new())).unwrap();
        let argv = channel.command("squeue -h -j 42 -o '%T %B %S'");
        let tail: Vec<&str> = argv[argv.len() - 4..].iter().map(|s| s.as_str()).collect();
        assert_eq!(
            tail,
            vec!["bash", "--login", "-c", r"'squeue -h -j 42 -o '\''%T %B %S'\'''"]
        );
    }

    #[test]
    fn test_channel_rejects_incomplete_cluster() {
        let cluster = ClusterTarget::new("login.expanse.org", "");
        assert!(
            RemoteChannel::for_cluster(&ssh(), &cluster, Arc::new(ProcessRunner::new())).is_err()
        );
    }
}
