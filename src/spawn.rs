//! Child process spawning with a typed readiness handshake.
//!
//! A spawned application signals readiness by printing a single JSON line to
//! stdout, e.g. `{"status":"ready","port":8080}`. Everything else it prints
//! is forwarded to the test logs.

use serde::{Deserialize, Serialize};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::process::{Child, Command};

use crate::error::MockAgentError;

/// How long `ProcessHandle::spawn` waits for the readiness handshake.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Startup signal printed by a spawned application as one JSON line on stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Handshake {
    /// The application is listening on `port`.
    Ready { port: u16 },
    /// The application failed to start.
    Error { reason: String },
}

/// A spawned child process that has completed its readiness handshake.
///
/// The child must be terminated explicitly with [`ProcessHandle::kill`] (or
/// awaited with [`ProcessHandle::wait`]); dropping the handle kills it
/// best-effort.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    port: u16,
    url: String,
}

impl ProcessHandle {
    /// Spawns `command` and waits for its readiness handshake with the
    /// default timeout.
    pub async fn spawn(command: Command) -> Result<Self, MockAgentError> {
        Self::spawn_with_timeout(command, DEFAULT_READY_TIMEOUT).await
    }

    /// Spawns `command` and waits for its readiness handshake.
    ///
    /// # Errors
    ///
    /// - [`MockAgentError::ExitedBeforeReady`] if the child exits (even with
    ///   code 0) before signalling readiness.
    /// - [`MockAgentError::ChildFailed`] if the child signals
    ///   [`Handshake::Error`].
    /// - [`MockAgentError::ReadyTimeout`] if no handshake arrives in time.
    pub async fn spawn_with_timeout(
        mut command: Command,
        ready_timeout: Duration,
    ) -> Result<Self, MockAgentError> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or(MockAgentError::ChildStdioUnavailable)?;
        let stderr = child
            .stderr
            .take()
            .ok_or(MockAgentError::ChildStdioUnavailable)?;

        tokio::spawn(forward_lines(BufReader::new(stderr).lines(), "stderr"));

        let mut stdout_lines = BufReader::new(stdout).lines();
        let deadline = tokio::time::Instant::now() + ready_timeout;

        let handshake = loop {
            match tokio::time::timeout_at(deadline, stdout_lines.next_line()).await {
                Err(_) => {
                    let _ = child.start_kill();
                    return Err(MockAgentError::ReadyTimeout {
                        limit: ready_timeout,
                    });
                }
                Ok(Ok(Some(line))) => match serde_json::from_str::<Handshake>(&line) {
                    Ok(handshake) => break handshake,
                    // Not the handshake, just application output.
                    Err(_) => tracing::info!(target: "mock_agent::child", stream = "stdout", "{line}"),
                },
                Ok(Ok(None)) => {
                    let status = child.wait().await?;
                    return Err(MockAgentError::ExitedBeforeReady {
                        code: status.code(),
                    });
                }
                Ok(Err(e)) => return Err(e.into()),
            }
        };

        match handshake {
            Handshake::Error { reason } => {
                let _ = child.start_kill();
                Err(MockAgentError::ChildFailed { reason })
            }
            Handshake::Ready { port } => {
                tokio::spawn(forward_lines(stdout_lines, "stdout"));
                Ok(Self {
                    child,
                    port,
                    url: format!("http://localhost:{port}"),
                })
            }
        }
    }

    /// The port the child reported in its handshake.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The base URL of the child's server.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The OS process id, if the child is still running.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Kills the child and waits for it to be reaped.
    pub async fn kill(&mut self) -> Result<(), MockAgentError> {
        self.child.kill().await.map_err(Into::into)
    }

    /// Waits for the child to exit on its own.
    ///
    /// Outstanding agent assertions are not cancelled by the exit; race the
    /// futures explicitly if a test wants exit-driven cancellation.
    pub async fn wait(&mut self) -> Result<ExitStatus, MockAgentError> {
        self.child.wait().await.map_err(Into::into)
    }
}

/// Runs `command` to completion, expecting a clean exit.
///
/// Use this for short-lived children that run instrumented code and exit
/// rather than staying up as servers.
///
/// # Errors
///
/// Returns [`MockAgentError::UnexpectedExit`] with the exit code (if any) for
/// a non-zero exit.
pub async fn run_to_exit(mut command: Command) -> Result<(), MockAgentError> {
    command.stdin(Stdio::null());
    let status = command.status().await?;
    if status.success() {
        Ok(())
    } else {
        Err(MockAgentError::UnexpectedExit {
            code: status.code(),
        })
    }
}

async fn forward_lines<R>(mut lines: Lines<BufReader<R>>, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::info!(target: "mock_agent::child", stream, "{line}");
    }
}
