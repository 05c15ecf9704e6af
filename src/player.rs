//! Competitor programs run as subprocesses.
//!
//! Each player process is spawned once per match. Input lines queued by
//! the referee are flushed to its stdin on `execute`, which then waits for
//! the expected number of output lines within the turn budget.

use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::error::{PlayerError, RefereeError};
use crate::game::Player;
use crate::transport::{forward_stderr, LineChannel};

/// Player backed by a long-lived child process.
pub struct ProcessPlayer {
    index: usize,
    nickname: String,
    child: Option<Child>,
    channel: LineChannel<ChildStdout, ChildStdin>,
    stderr_task: Option<JoinHandle<()>>,
    pending_input: Vec<String>,
    outputs: Vec<String>,
    expected_output_lines: usize,
    score: i32,
    active: bool,
    deactivation_reason: Option<String>,
}

impl ProcessPlayer {
    /// Spawn the player program from an argument vector (program first).
    #[instrument(skip(command), fields(program = ?command.first()))]
    pub fn spawn(
        index: usize,
        nickname: &str,
        command: &[String],
        expected_output_lines: usize,
    ) -> Result<Self, PlayerError> {
        let launch_error = |source| PlayerError::Launch {
            nickname: nickname.to_string(),
            source,
        };

        let (program, args) = command.split_first().ok_or_else(|| {
            launch_error(std::io::Error::new(
                ErrorKind::InvalidInput,
                "empty command line",
            ))
        })?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(launch_error)?;

        let exited = || PlayerError::Exited(nickname.to_string());
        let stdin = child.stdin.take().ok_or_else(exited)?;
        let stdout = child.stdout.take().ok_or_else(exited)?;
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| forward_stderr(stderr, nickname));

        debug!(pid = child.id(), "Player process started");

        Ok(Self {
            index,
            nickname: nickname.to_string(),
            child: Some(child),
            channel: LineChannel::new(stdout, stdin),
            stderr_task,
            pending_input: Vec::new(),
            outputs: Vec::new(),
            expected_output_lines,
            score: 0,
            active: true,
            deactivation_reason: None,
        })
    }

    /// Kill the player process. Later calls are no-ops.
    pub async fn shutdown(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Err(e) = child.kill().await {
            warn!(player = %self.nickname, error = %e, "Failed to kill player process");
        }
        let _ = child.wait().await;
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        debug!(player = %self.nickname, "Player process shut down");
    }

    fn channel_error(&self, err: RefereeError) -> PlayerError {
        match err {
            RefereeError::Timeout(timeout) => PlayerError::Timeout {
                nickname: self.nickname.clone(),
                timeout,
            },
            RefereeError::Io(e) if e.kind() == ErrorKind::InvalidData => {
                PlayerError::WrongOutput(self.nickname.clone())
            }
            RefereeError::Io(e) if e.kind() != ErrorKind::BrokenPipe => PlayerError::Io(e),
            _ => PlayerError::Exited(self.nickname.clone()),
        }
    }
}

#[async_trait]
impl Player for ProcessPlayer {
    fn index(&self) -> usize {
        self.index
    }

    fn nickname_token(&self) -> &str {
        &self.nickname
    }

    fn send_input_line(&mut self, line: &str) {
        self.pending_input.push(line.to_string());
    }

    async fn execute(&mut self, timeout: Duration) -> Result<(), PlayerError> {
        if !self.active {
            return Err(PlayerError::Inactive(self.nickname.clone()));
        }
        if self.child.is_none() {
            return Err(PlayerError::Exited(self.nickname.clone()));
        }

        self.outputs.clear();
        let input: String = self
            .pending_input
            .drain(..)
            .map(|line| line + "\n")
            .collect();

        debug!(player = %self.nickname, input_len = input.len(), "Executing player");

        if !input.is_empty() {
            if let Err(e) = self.channel.write(&input).await {
                return Err(self.channel_error(e));
            }
        }

        match self
            .channel
            .read_lines(self.expected_output_lines, timeout)
            .await
        {
            Ok(lines) => {
                self.outputs = lines;
                Ok(())
            }
            Err(e) => Err(self.channel_error(e)),
        }
    }

    fn outputs(&self) -> Result<Vec<String>, PlayerError> {
        if self.outputs.is_empty() {
            return Err(PlayerError::NoOutput(self.nickname.clone()));
        }
        Ok(self.outputs.clone())
    }

    fn deactivate(&mut self, reason: Option<&str>) {
        debug!(player = %self.nickname, ?reason, "Deactivating player");
        self.active = false;
        self.deactivation_reason = reason.map(String::from);
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn deactivation_reason(&self) -> Option<&str> {
        self.deactivation_reason.as_deref()
    }

    fn set_score(&mut self, score: i32) {
        self.score = score;
    }

    fn score(&self) -> i32 {
        self.score
    }
}
