//! Match state and player agents driven by the worker's reports.
//!
//! The referee never owns game rules; it only applies report effects
//! through these traits. `MatchState` is the in-memory implementation used
//! by the binary.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::error::PlayerError;

/// A competitor in the match.
#[async_trait]
pub trait Player: Send {
    /// 0-based index of this player in the match.
    fn index(&self) -> usize;

    /// Public name sent to the worker in `GET_PLAYERS` replies.
    fn nickname_token(&self) -> &str;

    /// Queue one input line for the next execution.
    fn send_input_line(&mut self, line: &str);

    /// Run the player's turn: deliver queued input and collect its output.
    async fn execute(&mut self, timeout: Duration) -> Result<(), PlayerError>;

    /// Output lines produced by the last execution.
    fn outputs(&self) -> Result<Vec<String>, PlayerError>;

    fn deactivate(&mut self, reason: Option<&str>);

    fn is_active(&self) -> bool;

    fn deactivation_reason(&self) -> Option<&str>;

    fn set_score(&mut self, score: i32);

    fn score(&self) -> i32;
}

/// Host-side match state mutated by report handlers.
pub trait GameManager: Send {
    type Player: Player;

    /// Mark the match as finished.
    fn end_game(&mut self);

    fn is_ended(&self) -> bool;

    fn add_to_game_summary(&mut self, line: &str);

    fn player_count(&self) -> usize;

    fn player(&self, index: usize) -> Option<&Self::Player>;

    fn player_mut(&mut self, index: usize) -> Option<&mut Self::Player>;

    /// Time budget for each worker read and each player execution.
    fn turn_max_time(&self) -> Duration;

    fn format_success_message(&self, message: &str) -> String {
        format!("¤GREEN¤{message}§GREEN§")
    }

    fn format_error_message(&self, message: &str) -> String {
        format!("¤RED¤{message}§RED§")
    }
}

/// In-memory match state over a fixed list of players.
#[derive(Debug)]
pub struct MatchState<P> {
    players: Vec<P>,
    summary: Vec<String>,
    ended: bool,
    turn_max_time: Duration,
}

impl<P: Player> MatchState<P> {
    pub const fn new(players: Vec<P>, turn_max_time: Duration) -> Self {
        Self {
            players,
            summary: Vec::new(),
            ended: false,
            turn_max_time,
        }
    }

    pub fn summary(&self) -> &[String] {
        &self.summary
    }

    pub fn players(&self) -> &[P] {
        &self.players
    }

    pub fn players_mut(&mut self) -> &mut [P] {
        &mut self.players
    }

    /// Snapshot of the match result.
    pub fn outcome(&self) -> MatchOutcome {
        MatchOutcome {
            ended: self.ended,
            summary: self.summary.clone(),
            players: self
                .players
                .iter()
                .map(|p| PlayerOutcome {
                    index: p.index(),
                    nickname: p.nickname_token().to_string(),
                    score: p.score(),
                    active: p.is_active(),
                    deactivation_reason: p.deactivation_reason().map(String::from),
                })
                .collect(),
        }
    }
}

impl<P: Player> GameManager for MatchState<P> {
    type Player = P;

    fn end_game(&mut self) {
        if !self.ended {
            info!("Game ended");
        }
        self.ended = true;
    }

    fn is_ended(&self) -> bool {
        self.ended
    }

    fn add_to_game_summary(&mut self, line: &str) {
        self.summary.push(line.to_string());
    }

    fn player_count(&self) -> usize {
        self.players.len()
    }

    fn player(&self, index: usize) -> Option<&P> {
        self.players.get(index)
    }

    fn player_mut(&mut self, index: usize) -> Option<&mut P> {
        self.players.get_mut(index)
    }

    fn turn_max_time(&self) -> Duration {
        self.turn_max_time
    }
}

/// Final state of a match, printed by the binary.
#[derive(Debug, Clone, Serialize)]
pub struct MatchOutcome {
    pub ended: bool,
    pub summary: Vec<String>,
    pub players: Vec<PlayerOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayerOutcome {
    pub index: usize,
    pub nickname: String,
    pub score: i32,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deactivation_reason: Option<String>,
}

/// In-process player that records what the referee does to it.
#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum PlayerEvent {
        Input(String),
        Execute,
    }

    /// How `execute` behaves once the scripted responses run out.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Exhausted {
        Silent,
        Timeout,
        Crash,
        Garbled,
    }

    #[derive(Debug)]
    pub struct FakePlayer {
        pub index: usize,
        pub nickname: String,
        pub events: Vec<PlayerEvent>,
        pub responses: VecDeque<Vec<String>>,
        pub when_exhausted: Exhausted,
        pub last_outputs: Vec<String>,
        pub score: i32,
        pub active: bool,
        pub reason: Option<String>,
    }

    impl FakePlayer {
        pub fn new(index: usize, nickname: &str) -> Self {
            Self {
                index,
                nickname: nickname.to_string(),
                events: Vec::new(),
                responses: VecDeque::new(),
                when_exhausted: Exhausted::Silent,
                last_outputs: Vec::new(),
                score: 0,
                active: true,
                reason: None,
            }
        }

        pub fn with_response(mut self, lines: &[&str]) -> Self {
            self.responses
                .push_back(lines.iter().map(ToString::to_string).collect());
            self
        }

        pub const fn when_exhausted(mut self, behavior: Exhausted) -> Self {
            self.when_exhausted = behavior;
            self
        }
    }

    #[async_trait]
    impl Player for FakePlayer {
        fn index(&self) -> usize {
            self.index
        }

        fn nickname_token(&self) -> &str {
            &self.nickname
        }

        fn send_input_line(&mut self, line: &str) {
            self.events.push(PlayerEvent::Input(line.to_string()));
        }

        async fn execute(&mut self, timeout: Duration) -> Result<(), PlayerError> {
            if !self.active {
                return Err(PlayerError::Inactive(self.nickname.clone()));
            }
            self.events.push(PlayerEvent::Execute);
            self.last_outputs.clear();
            if let Some(lines) = self.responses.pop_front() {
                self.last_outputs = lines;
                return Ok(());
            }
            match self.when_exhausted {
                Exhausted::Silent => Ok(()),
                Exhausted::Timeout => Err(PlayerError::Timeout {
                    nickname: self.nickname.clone(),
                    timeout,
                }),
                Exhausted::Crash => Err(PlayerError::Exited(self.nickname.clone())),
                Exhausted::Garbled => Err(PlayerError::WrongOutput(self.nickname.clone())),
            }
        }

        fn outputs(&self) -> Result<Vec<String>, PlayerError> {
            if self.last_outputs.is_empty() {
                return Err(PlayerError::NoOutput(self.nickname.clone()));
            }
            Ok(self.last_outputs.clone())
        }

        fn deactivate(&mut self, reason: Option<&str>) {
            self.active = false;
            self.reason = reason.map(String::from);
        }

        fn is_active(&self) -> bool {
            self.active
        }

        fn deactivation_reason(&self) -> Option<&str> {
            self.reason.as_deref()
        }

        fn set_score(&mut self, score: i32) {
            self.score = score;
        }

        fn score(&self) -> i32 {
            self.score
        }
    }
}
