//! Error types for the referee bridge.
//!
//! Malformed header lines are not errors: the header parser returns `None`
//! and the phase loop discards the line.

use std::time::Duration;

use thiserror::Error;

use crate::referee::Phase;
use crate::transport::protocol::ReportKey;

/// Errors raised while driving a match against the worker process.
#[derive(Debug, Error)]
pub enum RefereeError {
    #[error("failed to launch worker {command:?}: {source}")]
    Launch {
        command: Vec<String>,
        #[source]
        source: std::io::Error,
    },

    #[error("worker did not answer within {0:?}")]
    Timeout(Duration),

    #[error("worker closed its output stream")]
    WorkerExited,

    #[error("worker transport is closed")]
    TransportClosed,

    #[error("I/O error on worker pipe: {0}")]
    Io(#[from] std::io::Error),

    #[error("report {key} is not valid during {phase:?}")]
    UnexpectedReport { key: ReportKey, phase: Phase },

    #[error("malformed {key} report: {reason}")]
    MalformedReport { key: ReportKey, reason: String },

    #[error("invalid player index {0:?}")]
    InvalidPlayerIndex(String),

    #[error("turn {got} requested but turn {expected} is next")]
    TurnOutOfOrder { expected: u32, got: u32 },

    #[error("cannot {action} during {phase:?}")]
    PhaseViolation { action: &'static str, phase: Phase },

    #[error("match is over")]
    MatchOver,

    #[error(transparent)]
    Player(#[from] PlayerError),
}

/// Errors raised by a player agent.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("player {nickname} timed out after {timeout:?}")]
    Timeout { nickname: String, timeout: Duration },

    #[error("player {0} exited")]
    Exited(String),

    #[error("player {0} produced undecodable output")]
    WrongOutput(String),

    #[error("player {0} has no output available")]
    NoOutput(String),

    #[error("player {0} is deactivated")]
    Inactive(String),

    #[error("failed to launch player {nickname}: {source}")]
    Launch {
        nickname: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on player pipe: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = RefereeError> = std::result::Result<T, E>;
