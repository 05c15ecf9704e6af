//! Stdin/stdout pipe transport for the worker process.
//!
//! Owns the worker child process; directives go to its stdin, reports are
//! read line by line from its stdout. Stderr is forwarded to the log.

use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use super::{forward_stderr, LineChannel, Transport};
use crate::error::{RefereeError, Result};

/// Transport that talks to a worker process via stdin/stdout pipes.
///
/// The worker is spawned once per match and lives until `stop()` or drop.
pub struct StdioPipeTransport {
    child: Option<Child>,
    channel: LineChannel<ChildStdout, ChildStdin>,
    stderr_task: Option<JoinHandle<()>>,
}

impl StdioPipeTransport {
    /// Spawn the worker from an argument vector (program first).
    #[instrument(skip_all, fields(program = ?command.first()))]
    pub fn spawn(command: &[String]) -> Result<Self> {
        let (program, args) = command.split_first().ok_or_else(|| RefereeError::Launch {
            command: Vec::new(),
            source: std::io::Error::new(ErrorKind::InvalidInput, "empty command line"),
        })?;

        debug!(?args, "Spawning worker process");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RefereeError::Launch {
                command: command.to_vec(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(RefereeError::TransportClosed)?;
        let stdout = child.stdout.take().ok_or(RefereeError::TransportClosed)?;
        let stderr_task = child.stderr.take().map(|stderr| forward_stderr(stderr, "worker"));

        debug!(pid = child.id(), "Worker process started");

        Ok(Self {
            child: Some(child),
            channel: LineChannel::new(stdout, stdin),
            stderr_task,
        })
    }
}

#[async_trait]
impl Transport for StdioPipeTransport {
    async fn write(&mut self, text: &str) -> Result<()> {
        if self.child.is_none() {
            return Err(RefereeError::TransportClosed);
        }
        self.channel.write(text).await.map_err(|e| match e {
            RefereeError::Io(io) if io.kind() == ErrorKind::BrokenPipe => RefereeError::WorkerExited,
            other => other,
        })
    }

    async fn read_lines(&mut self, n: usize, timeout: Duration) -> Result<Vec<String>> {
        if self.child.is_none() {
            return Err(RefereeError::TransportClosed);
        }
        self.channel.read_lines(n, timeout).await
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        if let Err(e) = self.channel.close().await {
            debug!(error = %e, "Worker stdin already closed");
        }

        // Kill the process to ensure cleanup
        if let Err(e) = child.kill().await {
            warn!(error = %e, "Failed to kill worker process");
        }
        let status = child.wait().await;

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        match status {
            Ok(status) => debug!(?status, "Worker process shut down"),
            Err(e) => warn!(error = %e, "Failed to reap worker process"),
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.child.is_some()
    }
}
