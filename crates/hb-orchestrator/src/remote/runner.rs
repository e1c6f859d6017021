//! Local process execution behind the `CommandRunner` seam

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};

use hb_core::error::ExecError;

use super::display_command;

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Stdout with trailing whitespace trimmed
    pub stdout: String,
    /// Stderr with trailing whitespace trimmed
    pub stderr: String,
    pub exit_code: i32,
}

/// Whether a background process is still alive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    /// Exited; the code is `None` when killed by a signal
    Exited(Option<i32>),
}

/// A long-lived background process, such as an ssh port forward
#[async_trait]
pub trait ForwardProcess: Send {
    /// OS process id, while known
    fn pid(&self) -> Option<u32>;

    /// Check for exit without blocking
    fn state(&mut self) -> ProcessState;

    /// Stop the process: polite signal first, kill after `grace`
    async fn terminate(&mut self, grace: Duration);
}

/// Runs one-shot commands and spawns background processes
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `argv` to completion, feeding it `stdin`, bounded by `timeout`
    ///
    /// Non-zero exit is an error carrying stderr; a timeout kills the
    /// process and reports the attempted command line.
    async fn run(
        &self,
        argv: &[String],
        stdin: Option<&str>,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError>;

    /// Start `argv` detached from the caller
    async fn spawn(&self, argv: &[String]) -> Result<Box<dyn ForwardProcess>, ExecError>;
}

/// `CommandRunner` backed by `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

fn command_for(argv: &[String]) -> Result<Command, ExecError> {
    let (program, args) = argv.split_first().ok_or_else(|| ExecError::Spawn {
        command: String::new(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
    })?;
    let mut command = Command::new(program);
    command.args(args).kill_on_drop(true);
    Ok(command)
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        argv: &[String],
        stdin: Option<&str>,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError> {
        let rendered = display_command(argv);
        let mut command = command_for(argv)?;
        command
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|source| ExecError::Spawn {
            command: rendered.clone(),
            source,
        })?;

        let input = stdin.map(|s| s.as_bytes().to_vec());
        let pipe = child.stdin.take();
        let feed = async move {
            if let (Some(input), Some(mut pipe)) = (input, pipe) {
                // The child may exit without reading everything
                if let Err(e) = pipe.write_all(&input).await {
                    tracing::debug!("Failed to write command stdin: {}", e);
                }
                let _ = pipe.shutdown().await;
            }
        };

        // Dropping the child on timeout kills it (kill_on_drop)
        let output = match tokio::time::timeout(timeout, async {
            let (_, output) = tokio::join!(feed, child.wait_with_output());
            output
        })
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(ExecError::Spawn {
                    command: rendered,
                    source,
                })
            }
            Err(_) => {
                tracing::warn!(command = %rendered, ?timeout, "Command timed out");
                return Err(ExecError::Timeout {
                    command: rendered,
                    timeout,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
        let exit_code = output.status.code().unwrap_or(-1);

        if !output.status.success() {
            return Err(ExecError::Failed {
                code: exit_code,
                stderr,
            });
        }

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    async fn spawn(&self, argv: &[String]) -> Result<Box<dyn ForwardProcess>, ExecError> {
        let rendered = display_command(argv);
        let mut command = command_for(argv)?;
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|source| ExecError::Spawn {
            command: rendered.clone(),
            source,
        })?;

        let pid = child.id();
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(pid = ?pid, "forward: {}", line);
                }
            });
        }

        tracing::debug!(pid = ?pid, command = %rendered, "Spawned background process");
        Ok(Box::new(ChildProcess { child }))
    }
}

/// A spawned `tokio::process::Child`
struct ChildProcess {
    child: Child,
}

#[async_trait]
impl ForwardProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn state(&mut self) -> ProcessState {
        match self.child.try_wait() {
            Ok(None) => ProcessState::Running,
            Ok(Some(status)) => ProcessState::Exited(status.code()),
            Err(e) => {
                tracing::warn!("Failed to query process state: {}", e);
                ProcessState::Exited(None)
            }
        }
    }

    async fn terminate(&mut self, grace: Duration) {
        if let ProcessState::Exited(_) = self.state() {
            return;
        }

        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            // SIGTERM lets ssh tear down its forwards before exiting
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            if tokio::time::timeout(grace, self.child.wait()).await.is_ok() {
                return;
            }
            tracing::debug!(pid, "Process ignored SIGTERM, killing");
        }

        #[cfg(not(unix))]
        let _ = grace;

        if let Err(e) = self.child.kill().await {
            tracing::warn!("Failed to kill process: {}", e);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_run_trims_output() {
        let runner = ProcessRunner::new();
        let out = runner
            .run(
                &argv(&["sh", "-c", "printf 'Submitted batch job 7\\n\\n  '"]),
                None,
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(out.stdout, "Submitted batch job 7");
        assert_eq!(out.exit_code, 0);
    }

    #[tokio::test]
    async fn test_run_feeds_stdin() {
        let runner = ProcessRunner::new();
        let out = runner
            .run(&argv(&["cat"]), Some("#!/bin/bash\necho hi\n"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.stdout, "#!/bin/bash\necho hi");
    }

    #[tokio::test]
    async fn test_run_nonzero_exit_carries_stderr() {
        let runner = ProcessRunner::new();
        let err = runner
            .run(
                &argv(&["sh", "-c", "echo 'invalid partition' >&2; exit 3"]),
                None,
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        match err {
            ExecError::Failed { code, stderr } => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "invalid partition");
            }
            other => panic!("Expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_timeout_reports_command() {
        let runner = ProcessRunner::new();
        let err = runner
            .run(&argv(&["sleep", "10"]), None, Duration::from_millis(100))
            .await
            .unwrap_err();
        match err {
            ExecError::Timeout { command, .. } => assert_eq!(command, "sleep 10"),
            other => panic!("Expected Timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_missing_program() {
        let runner = ProcessRunner::new();
        let err = runner
            .run(
                &argv(&["/nonexistent/hb-test-binary"]),
                None,
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_spawn_and_terminate() {
        let runner = ProcessRunner::new();
        let mut process = runner.spawn(&argv(&["sleep", "30"])).await.unwrap();
        assert!(process.pid().is_some());
        assert_eq!(process.state(), ProcessState::Running);

        process.terminate(Duration::from_secs(2)).await;
        assert!(matches!(process.state(), ProcessState::Exited(_)));

        // Second terminate is a no-op
        process.terminate(Duration::from_secs(2)).await;
    }
}
