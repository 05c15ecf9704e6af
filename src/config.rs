//! Match configuration.
//!
//! A match is described by a JSON document naming the worker command, the
//! competitor commands and the match parameters. It is read from a file or
//! from the `STDIO_REFEREE_CONFIG` environment variable.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Environment variable holding the match configuration as JSON.
pub const CONFIG_ENV_VAR: &str = "STDIO_REFEREE_CONFIG";

/// Top-level configuration for one match.
#[derive(Debug, Clone, Deserialize)]
pub struct MatchConfig {
    /// The worker process implementing the referee logic.
    pub referee: WorkerConfig,

    /// Competitors, in player-index order.
    pub players: Vec<PlayerConfig>,

    /// Budget for each worker read and each player execution.
    #[serde(default = "default_turn_max_time_ms")]
    pub turn_max_time_ms: u64,

    /// Turns played before the host ends the match itself.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Output lines read from a player per execution.
    #[serde(default = "default_player_output_lines")]
    pub player_output_lines: usize,

    /// Parameters sent to the worker in the `INIT` directive.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// Worker process configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Argument vector, program first.
    pub command: Vec<String>,
}

/// A competitor program.
#[derive(Debug, Clone, Deserialize)]
pub struct PlayerConfig {
    /// Name sent to the worker in `GET_PLAYERS` replies.
    pub nickname: String,

    /// Argument vector, program first.
    pub command: Vec<String>,
}

const fn default_turn_max_time_ms() -> u64 {
    1000
}

const fn default_max_turns() -> u32 {
    200
}

const fn default_player_output_lines() -> usize {
    1
}

impl MatchConfig {
    /// Load and validate configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Load and validate configuration from `STDIO_REFEREE_CONFIG`.
    pub fn from_env() -> Result<Self> {
        let json = std::env::var(CONFIG_ENV_VAR)
            .with_context(|| format!("{CONFIG_ENV_VAR} not set and no --config given"))?;
        Self::from_json(&json).with_context(|| format!("Failed to parse {CONFIG_ENV_VAR}"))
    }

    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse JSON")?;
        config.validate()?;
        Ok(config)
    }

    /// Check the constraints serde cannot express.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.referee.command.is_empty(),
            "referee.command must name a program"
        );
        anyhow::ensure!(!self.players.is_empty(), "at least one player is required");
        anyhow::ensure!(self.turn_max_time_ms > 0, "turn_max_time_ms must be positive");
        anyhow::ensure!(
            self.player_output_lines > 0,
            "player_output_lines must be positive"
        );

        let mut seen = HashSet::new();
        for (index, player) in self.players.iter().enumerate() {
            anyhow::ensure!(
                !player.command.is_empty(),
                "players[{index}].command must name a program"
            );
            anyhow::ensure!(
                !player.nickname.trim().is_empty() && !player.nickname.contains('\n'),
                "players[{index}].nickname must be a single non-empty line"
            );
            anyhow::ensure!(
                seen.insert(player.nickname.as_str()),
                "duplicate player nickname '{}'",
                player.nickname
            );
        }

        for (name, value) in &self.params {
            anyhow::ensure!(
                !name.is_empty() && !name.contains(char::is_whitespace),
                "parameter name {name:?} must be a single token"
            );
            anyhow::ensure!(
                !value.contains('\n'),
                "parameter {name} must fit on one line"
            );
        }

        Ok(())
    }

    pub const fn turn_max_time(&self) -> Duration {
        Duration::from_millis(self.turn_max_time_ms)
    }
}
