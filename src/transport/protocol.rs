//! Worker protocol message types.
//!
//! Line-based text protocol for host ↔ worker communication.
//! Messages are framed as: `[[KEY] N]` followed by N payload lines.

use std::fmt;
use std::str::FromStr;

/// A command tag that can be written in a frame header.
pub trait CommandKey: Copy + fmt::Debug {
    /// Wire name of the key.
    fn as_str(self) -> &'static str;
}

/// Token that is not part of the expected key vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKey(pub String);

impl fmt::Display for UnknownKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown command key: {}", self.0)
    }
}

impl std::error::Error for UnknownKey {}

macro_rules! command_keys {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $wire:literal,)+ }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
        }

        impl $name {
            /// Every key of this vocabulary, in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant,)+];
        }

        impl CommandKey for $name {
            fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $wire,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownKey;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok(Self::$variant),)+
                    other => Err(UnknownKey(other.to_string())),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

command_keys! {
    /// Directive sent from host to worker.
    DirectiveKey {
        /// Start of the match; payload is one `name value` line per parameter.
        Init => "INIT",
        /// Start of a turn; payload is the turn index.
        GameTurn => "GAME_TURN",
        /// End of the match. Never sent: the ended phase is terminal.
        OnEnd => "ON_END",
        /// Reply to a `GET_PLAYER_OUTPUTS` report.
        GetPlayerOutputs => "GET_PLAYER_OUTPUTS",
        /// Reply to a `GET_PLAYERS` report.
        GetPlayers => "GET_PLAYERS",
    }
}

command_keys! {
    /// Report sent from worker to host.
    ReportKey {
        SendPlayerInput => "SEND_PLAYER_INPUT",
        ExecutePlayer => "EXECUTE_PLAYER",
        DeactivatePlayer => "DEACTIVATE_PLAYER",
        SetPlayerScore => "SET_PLAYER_SCORE",
        EndInit => "END_INIT",
        EndTurn => "END_TURN",
        EndGame => "END_GAME",
        AddSummary => "ADD_SUMMARY",
        AddSummarySuccess => "ADD_SUMMARY_SUCCESS",
        AddSummaryError => "ADD_SUMMARY_ERROR",
        GetPlayerOutputs => "GET_PLAYER_OUTPUTS",
        GetPlayers => "GET_PLAYERS",
    }
}

/// A framed command: a key plus its ordered payload lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message<K> {
    key: K,
    lines: Vec<String>,
}

/// Message sent from host to worker.
pub type Directive = Message<DirectiveKey>;

/// Message received from worker.
pub type Report = Message<ReportKey>;

impl<K: CommandKey> Message<K> {
    /// Create a message with no payload.
    pub const fn new(key: K) -> Self {
        Self {
            key,
            lines: Vec::new(),
        }
    }

    /// Create a message with the given payload lines.
    pub fn with_lines<I, S>(key: K, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key,
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    /// Append one payload line.
    pub fn push_line(&mut self, line: impl fmt::Display) {
        self.lines.push(line.to_string());
    }

    pub const fn key(&self) -> K {
        self.key
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Header line for this message, without the trailing newline.
    pub fn header(&self) -> String {
        format!("[[{}] {}]", self.key.as_str(), self.lines.len())
    }

    /// Serialize to the wire format.
    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl<K: CommandKey> fmt::Display for Message<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.header())?;
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}
