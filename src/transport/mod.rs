//! Transport layer for host ↔ worker communication.
//!
//! Provides the `Transport` trait, the frame header parser and
//! `LineChannel`, the timeout-bounded line reader shared by every
//! pipe-backed transport. `StdioPipeTransport` drives a worker subprocess.

pub mod protocol;
pub mod stdio_pipe;

pub use protocol::{CommandKey, Directive, DirectiveKey, Message, Report, ReportKey};
pub use stdio_pipe::StdioPipeTransport;

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{RefereeError, Result};

/// Upper bound on lines preallocated for a single read.
const MAX_PREALLOCATED_LINES: usize = 64;

/// Abstraction over the channel to the worker process.
///
/// One read and one write at a time; request ordering is the phase loop's
/// job, not the transport's.
#[async_trait]
pub trait Transport: Send {
    /// Write raw text to the worker's input.
    async fn write(&mut self, text: &str) -> Result<()>;

    /// Read exactly `n` lines from the worker's output.
    ///
    /// Fails with `RefereeError::Timeout` if the lines do not all arrive
    /// within `timeout`; lines received before that are dropped.
    async fn read_lines(&mut self, n: usize, timeout: Duration) -> Result<Vec<String>>;

    /// Stop the worker and release its pipes. Safe to call more than once.
    async fn stop(&mut self) -> Result<()>;

    /// Check whether the worker can still be talked to.
    fn is_alive(&self) -> bool;
}

/// Parsed `[[KEY] N]` header of a worker report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub key: ReportKey,
    pub line_count: usize,
}

impl FrameHeader {
    /// Parse a report header line.
    ///
    /// Returns `None` for anything that is not exactly `[[KEY] N]` (the
    /// space is optional) with `KEY` a report key and `N` a decimal count.
    pub fn parse(line: &str) -> Option<Self> {
        let inner = line.strip_prefix("[[")?.strip_suffix(']')?;
        let (key, count) = inner.rsplit_once(']')?;
        let count = count.strip_prefix(' ').unwrap_or(count);

        if count.is_empty() || !count.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        Some(Self {
            key: key.parse().ok()?,
            line_count: count.parse().ok()?,
        })
    }
}

/// Line-oriented reader/writer pair with timeout-bounded reads.
pub struct LineChannel<R, W> {
    lines: Lines<BufReader<R>>,
    writer: W,
}

impl<R, W> LineChannel<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    /// Write all of `text` and flush.
    pub async fn write(&mut self, text: &str) -> Result<()> {
        self.writer.write_all(text.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Read `n` lines, or fail once `timeout` has elapsed.
    ///
    /// Line terminators (`\n` or `\r\n`) are stripped. A line cut off by the
    /// timeout stays buffered and is returned by the next read.
    pub async fn read_lines(&mut self, n: usize, timeout: Duration) -> Result<Vec<String>> {
        let lines = &mut self.lines;
        let read_all = async move {
            let mut out = Vec::with_capacity(n.min(MAX_PREALLOCATED_LINES));
            while out.len() < n {
                match lines.next_line().await? {
                    Some(line) => out.push(line),
                    None => return Err(RefereeError::WorkerExited),
                }
            }
            Ok::<_, RefereeError>(out)
        };

        tokio::time::timeout(timeout, read_all)
            .await
            .map_err(|_| RefereeError::Timeout(timeout))?
    }

    /// Shut down the write half so the peer sees end of input.
    pub async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Forward each stderr line of a child process into the log.
pub(crate) fn forward_stderr<R>(stderr: R, source: impl Into<String>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let source = source.into();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => debug!(source = %source, "stderr: {line}"),
                Ok(None) => break,
                Err(e) => {
                    warn!(source = %source, error = %e, "Failed to read stderr");
                    break;
                }
            }
        }
    })
}
