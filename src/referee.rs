//! Phase loop driving the worker through a match.
//!
//! For each phase the referee sends one directive, then reads reports from
//! the worker and applies them in order until the phase sentinel arrives:
//! `END_INIT` after `INIT`, `END_TURN` after `GAME_TURN`. `END_GAME` closes
//! whatever phase is running and ends the match; nothing is sent to the
//! worker after that.

use std::collections::BTreeMap;
use std::io::ErrorKind;

use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::error::{PlayerError, RefereeError, Result};
use crate::game::{GameManager, Player};
use crate::transport::{Directive, DirectiveKey, FrameHeader, Report, ReportKey, Transport};

/// Where the match currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Worker started, `INIT` not sent yet.
    Idle,
    /// `INIT` sent; stays here until the first turn starts.
    Init,
    /// Turn `n` sent or completed.
    Turn(u32),
    /// Terminal.
    Ended,
}

/// Whether the current read loop keeps going after a report.
enum Flow {
    Continue,
    EndMatch,
}

/// Referee that delegates game logic to a worker process.
pub struct Referee<T, G> {
    transport: T,
    game: G,
    phase: Phase,
    next_turn: u32,
    /// Last player executed in the current phase.
    executed_player: Option<usize>,
}

impl<T: Transport, G: GameManager> Referee<T, G> {
    pub const fn new(transport: T, game: G) -> Self {
        Self {
            transport,
            game,
            phase: Phase::Idle,
            next_turn: 0,
            executed_player: None,
        }
    }

    pub const fn phase(&self) -> Phase {
        self.phase
    }

    pub const fn game(&self) -> &G {
        &self.game
    }

    pub fn game_mut(&mut self) -> &mut G {
        &mut self.game
    }

    pub fn into_game(self) -> G {
        self.game
    }

    /// Run a whole match: `INIT`, then turns until the match ends or
    /// `max_turns` is reached. The worker is stopped afterwards either way.
    ///
    /// A fatal error ends the match and is recorded in the summary before
    /// being returned.
    pub async fn play(&mut self, params: &BTreeMap<String, String>, max_turns: u32) -> Result<()> {
        let result = self.play_turns(params, max_turns).await;

        if let Err(e) = &result {
            warn!(error = %e, phase = ?self.phase, "Match aborted");
            let line = self.game.format_error_message(&format!("Match aborted: {e}"));
            self.game.add_to_game_summary(&line);
            self.end_match();
        }

        if let Err(e) = self.shutdown().await {
            warn!(error = %e, "Failed to stop worker");
        }

        result
    }

    async fn play_turns(&mut self, params: &BTreeMap<String, String>, max_turns: u32) -> Result<()> {
        self.init(params).await?;

        for turn in 0..max_turns {
            if self.is_over() {
                break;
            }
            self.game_turn(turn).await?;
        }

        if !self.is_over() {
            info!(max_turns, "Turn limit reached");
            self.end_match();
        }
        Ok(())
    }

    /// Send `INIT` with one `name value` line per parameter and apply
    /// reports until `END_INIT`.
    #[instrument(skip_all, fields(params = params.len()))]
    pub async fn init(&mut self, params: &BTreeMap<String, String>) -> Result<()> {
        match self.phase {
            Phase::Idle => {}
            Phase::Ended => return Err(RefereeError::MatchOver),
            phase => {
                return Err(RefereeError::PhaseViolation {
                    action: "initialize",
                    phase,
                })
            }
        }

        let directive = Directive::with_lines(
            DirectiveKey::Init,
            params.iter().map(|(name, value)| format!("{name} {value}")),
        );

        self.phase = Phase::Init;
        self.executed_player = None;
        self.send(&directive).await?;
        self.run_phase(ReportKey::EndInit).await?;

        info!(ended = self.is_over(), "Initialization finished");
        Ok(())
    }

    /// Send `GAME_TURN` for `turn` and apply reports until `END_TURN`.
    ///
    /// A worker timeout here is blamed on the player under evaluation,
    /// which forfeits the match.
    #[instrument(skip(self))]
    pub async fn game_turn(&mut self, turn: u32) -> Result<()> {
        match self.phase {
            Phase::Init | Phase::Turn(_) => {}
            Phase::Ended => return Err(RefereeError::MatchOver),
            Phase::Idle => {
                return Err(RefereeError::PhaseViolation {
                    action: "start a turn",
                    phase: Phase::Idle,
                })
            }
        }
        if turn != self.next_turn {
            return Err(RefereeError::TurnOutOfOrder {
                expected: self.next_turn,
                got: turn,
            });
        }

        self.phase = Phase::Turn(turn);
        self.next_turn = turn.saturating_add(1);
        self.executed_player = None;

        let mut directive = Directive::new(DirectiveKey::GameTurn);
        directive.push_line(turn);
        self.send(&directive).await?;

        match self.run_phase(ReportKey::EndTurn).await {
            Err(RefereeError::Timeout(timeout)) => {
                let Some(index) = self.player_under_evaluation(turn) else {
                    return Err(RefereeError::Timeout(timeout));
                };
                warn!(turn, player = index, ?timeout, "Worker timed out during turn");
                self.forfeit(index, "timeout!")
            }
            result => result,
        }
    }

    /// Stop the worker process. Safe to call more than once.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.transport.stop().await
    }

    fn is_over(&self) -> bool {
        self.phase == Phase::Ended || self.game.is_ended()
    }

    fn end_match(&mut self) {
        self.game.end_game();
        self.phase = Phase::Ended;
    }

    /// The player blamed when the worker stalls during a turn.
    fn player_under_evaluation(&self, turn: u32) -> Option<usize> {
        let count = self.game.player_count();
        if count == 0 {
            return None;
        }
        self.executed_player
            .or_else(|| usize::try_from(turn).ok().map(|t| t % count))
    }

    /// Deactivate a player, score it as a loss and end the match.
    fn forfeit(&mut self, index: usize, cause: &str) -> Result<()> {
        let player = self.player_mut(index)?;
        let reason = format!("{} {cause}", player.nickname_token());
        player.deactivate(Some(&reason));
        player.set_score(-1);

        let line = self.game.format_error_message(&reason);
        self.game.add_to_game_summary(&line);
        warn!(player = index, %reason, "Player forfeits");
        self.end_match();
        Ok(())
    }

    async fn send(&mut self, directive: &Directive) -> Result<()> {
        if self.phase == Phase::Ended {
            return Err(RefereeError::MatchOver);
        }
        debug!(
            key = %directive.key(),
            lines = directive.lines().len(),
            "Sending directive"
        );
        self.transport.write(&directive.encode()).await
    }

    /// Read and apply reports until `sentinel` or `END_GAME`.
    async fn run_phase(&mut self, sentinel: ReportKey) -> Result<()> {
        loop {
            let report = self.read_report().await?;
            if report.key() == sentinel {
                debug!(%sentinel, "Phase complete");
                return Ok(());
            }
            if let Flow::EndMatch = self.dispatch(report).await? {
                return Ok(());
            }
        }
    }

    /// Read the next well-formed report.
    ///
    /// Lines that are not a report header, including lines that are not
    /// valid UTF-8, are discarded. Finding a header
    /// is bounded by one turn budget in total, so a worker printing noise
    /// times out like a silent one.
    async fn read_report(&mut self) -> Result<Report> {
        let budget = self.game.turn_max_time();
        let deadline = Instant::now() + budget;

        let header = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(RefereeError::Timeout(budget));
            }

            let line = match self.transport.read_lines(1, remaining).await {
                Ok(lines) => lines.into_iter().next().unwrap_or_default(),
                Err(RefereeError::Timeout(_)) => return Err(RefereeError::Timeout(budget)),
                Err(RefereeError::Io(e)) if e.kind() == ErrorKind::InvalidData => {
                    warn!(error = %e, "Discarding undecodable report line");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let line = line.trim();
            match FrameHeader::parse(line) {
                Some(header) => break header,
                None if line.is_empty() => {}
                None => warn!(line, "Discarding malformed report header"),
            }
        };

        let lines = if header.line_count > 0 {
            self.transport.read_lines(header.line_count, budget).await?
        } else {
            Vec::new()
        };

        debug!(key = %header.key, lines = header.line_count, "Received report");
        Ok(Report::with_lines(header.key, lines))
    }

    /// Apply one report to the match.
    async fn dispatch(&mut self, report: Report) -> Result<Flow> {
        let key = report.key();
        let lines = report.lines();

        match key {
            ReportKey::EndGame => {
                info!(phase = ?self.phase, "Worker ended the game");
                self.end_match();
                return Ok(Flow::EndMatch);
            }
            ReportKey::EndInit | ReportKey::EndTurn => {
                return Err(RefereeError::UnexpectedReport {
                    key,
                    phase: self.phase,
                });
            }
            ReportKey::AddSummary => {
                for line in lines {
                    self.game.add_to_game_summary(line);
                }
            }
            ReportKey::AddSummarySuccess => {
                for line in lines {
                    let line = self.game.format_success_message(line);
                    self.game.add_to_game_summary(&line);
                }
            }
            ReportKey::AddSummaryError => {
                for line in lines {
                    let line = self.game.format_error_message(line);
                    self.game.add_to_game_summary(&line);
                }
            }
            ReportKey::GetPlayers => self.reply_players().await?,
            ReportKey::SendPlayerInput => {
                let player = self.resolve_player(lines)?;
                for line in &lines[1..] {
                    player.send_input_line(line);
                }
            }
            ReportKey::ExecutePlayer => return self.execute_player(lines).await,
            ReportKey::DeactivatePlayer => {
                let reason = lines.get(1).map(String::as_str);
                self.resolve_player(lines)?.deactivate(reason);
            }
            ReportKey::SetPlayerScore => {
                let score = lines
                    .get(1)
                    .and_then(|raw| raw.trim().parse::<i32>().ok())
                    .ok_or_else(|| RefereeError::MalformedReport {
                        key,
                        reason: format!("expected an integer score, got {:?}", lines.get(1)),
                    })?;
                self.resolve_player(lines)?.set_score(score);
            }
            ReportKey::GetPlayerOutputs => self.reply_player_outputs(lines).await?,
        }

        Ok(Flow::Continue)
    }

    /// Index of the player named by payload line 0.
    fn player_index(&self, lines: &[String]) -> Result<usize> {
        let raw = lines.first().map_or("", String::as_str);
        raw.trim()
            .parse::<usize>()
            .ok()
            .filter(|&index| index < self.game.player_count())
            .ok_or_else(|| RefereeError::InvalidPlayerIndex(raw.to_string()))
    }

    fn player_mut(&mut self, index: usize) -> Result<&mut G::Player> {
        self.game
            .player_mut(index)
            .ok_or_else(|| RefereeError::InvalidPlayerIndex(index.to_string()))
    }

    fn resolve_player(&mut self, lines: &[String]) -> Result<&mut G::Player> {
        let index = self.player_index(lines)?;
        self.player_mut(index)
    }

    async fn execute_player(&mut self, lines: &[String]) -> Result<Flow> {
        let index = self.player_index(lines)?;
        self.executed_player = Some(index);

        let timeout = self.game.turn_max_time();
        let result = self.player_mut(index)?.execute(timeout).await;

        match result {
            Ok(()) => Ok(Flow::Continue),
            Err(PlayerError::Timeout { .. }) => {
                self.forfeit(index, "timeout!")?;
                Ok(Flow::EndMatch)
            }
            Err(PlayerError::Exited(_)) => {
                self.forfeit(index, "crashed!")?;
                Ok(Flow::EndMatch)
            }
            Err(PlayerError::WrongOutput(_)) => {
                self.forfeit(index, "Wrong output!")?;
                Ok(Flow::EndMatch)
            }
            Err(PlayerError::Inactive(nickname)) => {
                warn!(player = %nickname, "Skipping execution of deactivated player");
                Ok(Flow::Continue)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn reply_players(&mut self) -> Result<()> {
        let mut reply = Directive::new(DirectiveKey::GetPlayers);
        for index in 0..self.game.player_count() {
            if let Some(player) = self.game.player(index) {
                reply.push_line(player.nickname_token());
            }
        }
        self.send(&reply).await
    }

    /// Reply with the first output line of the player's last execution.
    ///
    /// Without output the reply carries no lines, so the worker is never
    /// left waiting.
    async fn reply_player_outputs(&mut self, lines: &[String]) -> Result<()> {
        let player = self.resolve_player(lines)?;
        let mut reply = Directive::new(DirectiveKey::GetPlayerOutputs);

        match player.outputs() {
            Ok(outputs) => match outputs.into_iter().next() {
                Some(first) => reply.push_line(first),
                None => warn!(player = player.index(), "Player produced no output"),
            },
            Err(e) => warn!(player = player.index(), error = %e, "Player outputs unavailable"),
        }

        self.send(&reply).await
    }
}
