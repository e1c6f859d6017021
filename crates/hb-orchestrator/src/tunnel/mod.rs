//! SSH port forwarding to compute nodes
//!
//! A tunnel is one background `ssh -N` process carrying a `-L` forward per
//! port-map entry, reached through the same jump hosts as the login node.
//! The process is owned by a [`TunnelHandle`] and dies with it.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::Instant;

use hb_core::config::SshConfig;
use hb_core::error::{PreconditionFailure, TunnelError};
use hb_core::PortMapEntry;

use crate::remote::{display_command, CommandRunner, ForwardProcess, ProcessState, ProxyChain};

/// Time between readiness probes
const READY_PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// Time a forwarding process gets to exit after SIGTERM
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Opens forwarding processes
#[derive(Clone)]
pub struct TunnelManager {
    runner: Arc<dyn CommandRunner>,
    ssh: SshConfig,
    bind_address: String,
    startup_timeout: Duration,
}

impl TunnelManager {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        ssh: SshConfig,
        bind_address: impl Into<String>,
        startup_timeout: Duration,
    ) -> Self {
        Self {
            runner,
            ssh,
            bind_address: bind_address.into(),
            startup_timeout,
        }
    }

    /// The forwarding command for a job
    pub fn command(
        &self,
        exec_node: &str,
        compute_user: &str,
        port_map: &[PortMapEntry],
        chain: &ProxyChain,
    ) -> Result<Vec<String>, PreconditionFailure> {
        if port_map.is_empty() {
            return Err(PreconditionFailure::new("port map is empty"));
        }
        if exec_node.trim().is_empty() {
            return Err(PreconditionFailure::new("execution node is empty"));
        }
        if compute_user.trim().is_empty() {
            return Err(PreconditionFailure::new("compute user is empty"));
        }

        let mut argv = vec![
            self.ssh.program.clone(),
            "-N".to_string(),
            "-A".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "ExitOnForwardFailure=yes".to_string(),
        ];
        if let Some(jump) = chain.jump_arg(compute_user) {
            argv.push("-J".to_string());
            argv.push(jump);
        }
        for entry in port_map {
            argv.push("-L".to_string());
            argv.push(format!(
                "{}:{}:localhost:{}",
                self.bind_address, entry.local_port, entry.remote_port
            ));
        }
        argv.push(format!("{compute_user}@{exec_node}"));
        Ok(argv)
    }

    /// Start forwarding `port_map` to `exec_node`
    ///
    /// Returns once the first local port accepts connections, or right
    /// after spawning when the startup timeout is zero.
    pub async fn open(
        &self,
        exec_node: &str,
        compute_user: &str,
        port_map: &[PortMapEntry],
        chain: &ProxyChain,
    ) -> Result<TunnelHandle, TunnelError> {
        let argv = self.command(exec_node, compute_user, port_map, chain)?;

        self.forget_host_key(exec_node).await;

        tracing::info!(
            node = %exec_node,
            ports = port_map.len(),
            command = %display_command(&argv),
            "Opening tunnel"
        );
        let mut process = self.runner.spawn(&argv).await?;

        if !self.startup_timeout.is_zero() {
            self.wait_ready(process.as_mut(), port_map[0].local_port)
                .await?;
        }

        tracing::info!(node = %exec_node, pid = ?process.pid(), "Tunnel established");
        Ok(TunnelHandle {
            process: Some(process),
            node: exec_node.to_string(),
            port_map: port_map.to_vec(),
        })
    }

    /// Compute nodes get reimaged; a stale key would block the forward
    async fn forget_host_key(&self, node: &str) {
        let argv = vec![
            self.ssh.keygen_program.clone(),
            "-R".to_string(),
            node.to_string(),
        ];
        if let Err(e) = self.runner.run(&argv, None, Duration::from_secs(5)).await {
            tracing::debug!(node = %node, "ssh-keygen -R failed: {}", e);
        }
    }

    async fn wait_ready(
        &self,
        process: &mut dyn ForwardProcess,
        local_port: u16,
    ) -> Result<(), TunnelError> {
        let deadline = Instant::now() + self.startup_timeout;
        let addr = format!("{}:{}", self.bind_address, local_port);

        loop {
            if let ProcessState::Exited(code) = process.state() {
                tracing::warn!(?code, "Forwarding process exited during startup");
                return Err(TunnelError::Exited { code });
            }

            if TcpStream::connect(addr.as_str()).await.is_ok() {
                return Ok(());
            }

            if Instant::now() >= deadline {
                tracing::warn!(
                    addr = %addr,
                    timeout = ?self.startup_timeout,
                    "Tunnel startup timed out"
                );
                process.terminate(CLOSE_GRACE).await;
                return Err(TunnelError::StartupTimeout(self.startup_timeout));
            }

            tokio::time::sleep(READY_PROBE_INTERVAL).await;
        }
    }
}

impl std::fmt::Debug for TunnelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelManager")
            .field("bind_address", &self.bind_address)
            .field("startup_timeout", &self.startup_timeout)
            .finish()
    }
}

/// Ownership of one forwarding process
pub struct TunnelHandle {
    process: Option<Box<dyn ForwardProcess>>,
    node: String,
    port_map: Vec<PortMapEntry>,
}

impl TunnelHandle {
    /// A handle that never owned a process
    pub fn closed() -> Self {
        Self {
            process: None,
            node: String::new(),
            port_map: Vec::new(),
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn port_map(&self) -> &[PortMapEntry] {
        &self.port_map
    }

    /// Whether the forwarding process is still alive
    pub fn is_active(&mut self) -> bool {
        match self.process.as_mut() {
            Some(process) => process.state() == ProcessState::Running,
            None => false,
        }
    }

    /// Stop forwarding; later calls do nothing
    pub async fn close(&mut self) {
        if let Some(mut process) = self.process.take() {
            let pid = process.pid();
            process.terminate(CLOSE_GRACE).await;
            tracing::info!(node = %self.node, pid = ?pid, "Tunnel closed");
        }
    }
}

impl std::fmt::Debug for TunnelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelHandle")
            .field("node", &self.node)
            .field("port_map", &self.port_map)
            .field("open", &self.process.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::CommandOutput;
    use async_trait::async_trait;
    use hb_core::error::ExecError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Process whose lifetime is scripted by the test
    struct FakeProcess {
        exit: Option<i32>,
        terminated: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ForwardProcess for FakeProcess {
        fn pid(&self) -> Option<u32> {
            Some(4242)
        }

        fn state(&mut self) -> ProcessState {
            match self.exit {
                Some(code) => ProcessState::Exited(Some(code)),
                None => ProcessState::Running,
            }
        }

        async fn terminate(&mut self, _grace: Duration) {
            self.terminated.fetch_add(1, Ordering::SeqCst);
            self.exit = Some(143);
        }
    }

    #[derive(Default)]
    struct FakeRunner {
        exit_immediately: Option<i32>,
        spawned: Mutex<Vec<Vec<String>>>,
        ran: Mutex<Vec<Vec<String>>>,
        terminated: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(
            &self,
            argv: &[String],
            _stdin: Option<&str>,
            _timeout: Duration,
        ) -> Result<CommandOutput, ExecError> {
            self.ran.lock().unwrap().push(argv.to_vec());
            Err(ExecError::Failed {
                code: 255,
                stderr: "host not found".to_string(),
            })
        }

        async fn spawn(&self, argv: &[String]) -> Result<Box<dyn ForwardProcess>, ExecError> {
            self.spawned.lock().unwrap().push(argv.to_vec());
            Ok(Box::new(FakeProcess {
                exit: self.exit_immediately,
                terminated: self.terminated.clone(),
            }))
        }
    }

    fn manager(runner: Arc<FakeRunner>, timeout: Duration) -> TunnelManager {
        TunnelManager::new(runner, SshConfig::default(), "127.0.0.1", timeout)
    }

    fn port_map(local: u16) -> Vec<PortMapEntry> {
        vec![PortMapEntry::new(50001, local), PortMapEntry::new(50002, 9102)]
    }

    #[test]
    fn test_command_shape() {
        let m = manager(Arc::new(FakeRunner::default()), Duration::ZERO);
        let chain = ProxyChain::from_parts("bastion.org", "login.expanse.org");
        let argv = m
            .command("exp-1-01", "alice", &port_map(9101), &chain)
            .unwrap();
        assert_eq!(
            argv,
            vec![
                "ssh",
                "-N",
                "-A",
                "-o",
                "StrictHostKeyChecking=no",
                "-o",
                "ExitOnForwardFailure=yes",
                "-J",
                "alice@bastion.org,alice@login.expanse.org",
                "-L",
                "127.0.0.1:9101:localhost:50001",
                "-L",
                "127.0.0.1:9102:localhost:50002",
                "alice@exp-1-01",
            ]
        );
    }

    #[tokio::test]
    async fn test_open_checks_preconditions_first() {
        let runner = Arc::new(FakeRunner::default());
        let m = manager(runner.clone(), Duration::ZERO);

        let err = m
            .open("exp-1-01", "alice", &[], &ProxyChain::direct())
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::Precondition(_)));

        let err = m
            .open("", "alice", &port_map(9101), &ProxyChain::direct())
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::Precondition(_)));

        assert!(runner.spawned.lock().unwrap().is_empty());
        assert!(runner.ran.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_ignores_keygen_failure() {
        let runner = Arc::new(FakeRunner::default());
        let m = manager(runner.clone(), Duration::ZERO);

        let mut handle = m
            .open("exp-1-01", "alice", &port_map(9101), &ProxyChain::direct())
            .await
            .unwrap();
        assert!(handle.is_active());
        assert_eq!(
            runner.ran.lock().unwrap()[0],
            vec!["ssh-keygen", "-R", "exp-1-01"]
        );
        assert_eq!(runner.spawned.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_open_waits_for_local_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local = listener.local_addr().unwrap().port();

        let runner = Arc::new(FakeRunner::default());
        let m = manager(runner, Duration::from_secs(5));
        let handle = m
            .open("exp-1-01", "alice", &port_map(local), &ProxyChain::direct())
            .await
            .unwrap();
        assert_eq!(handle.port_map()[0].local_port, local);
    }

    #[tokio::test]
    async fn test_open_reports_early_exit() {
        let runner = Arc::new(FakeRunner {
            exit_immediately: Some(255),
            ..FakeRunner::default()
        });
        let m = manager(runner, Duration::from_secs(5));
        let err = m
            .open("exp-1-01", "alice", &port_map(9101), &ProxyChain::direct())
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::Exited { code: Some(255) }));
    }

    #[tokio::test]
    async fn test_open_times_out_and_kills() {
        // Bind then drop, so nothing listens on the port
        let local = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let runner = Arc::new(FakeRunner::default());
        let m = manager(runner.clone(), Duration::from_millis(300));
        let err = m
            .open("exp-1-01", "alice", &port_map(local), &ProxyChain::direct())
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::StartupTimeout(_)));
        assert_eq!(runner.terminated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let runner = Arc::new(FakeRunner::default());
        let m = manager(runner.clone(), Duration::ZERO);
        let mut handle = m
            .open("exp-1-01", "alice", &port_map(9101), &ProxyChain::direct())
            .await
            .unwrap();

        handle.close().await;
        handle.close().await;
        assert!(!handle.is_active());
        assert_eq!(runner.terminated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_never_opened() {
        let mut handle = TunnelHandle::closed();
        handle.close().await;
        assert!(!handle.is_active());
    }
}
