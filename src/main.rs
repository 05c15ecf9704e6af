//! stdio-referee
//!
//! Runs one match: spawns the referee worker and the competitor programs,
//! drives the worker through the match and prints the outcome as JSON.
//! The match is described by `--config` or the `STDIO_REFEREE_CONFIG` env var.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use stdio_referee::{
    config::MatchConfig, game::MatchState, player::ProcessPlayer, referee::Referee,
    transport::StdioPipeTransport,
};

#[derive(Parser, Debug)]
#[command(name = "stdio-referee")]
#[command(about = "Run a match refereed by an external worker process")]
struct Args {
    /// Path to the match configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging (stderr so stdout is free for the match outcome)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => MatchConfig::from_file(path),
        None => MatchConfig::from_env(),
    }
    .context("Failed to load configuration")?;

    info!(
        players = ?config.players.iter().map(|p| &p.nickname).collect::<Vec<_>>(),
        max_turns = config.max_turns,
        turn_max_time = ?config.turn_max_time(),
        "Loaded configuration"
    );

    let mut players = Vec::with_capacity(config.players.len());
    for (index, player) in config.players.iter().enumerate() {
        let player = ProcessPlayer::spawn(
            index,
            &player.nickname,
            &player.command,
            config.player_output_lines,
        )
        .with_context(|| format!("Failed to start player '{}'", player.nickname))?;
        players.push(player);
    }

    let transport = StdioPipeTransport::spawn(&config.referee.command)
        .context("Failed to start referee worker")?;

    let mut referee = Referee::new(
        transport,
        MatchState::new(players, config.turn_max_time()),
    );
    let result = referee.play(&config.params, config.max_turns).await;

    let mut state = referee.into_game();
    for player in state.players_mut() {
        player.shutdown().await;
    }

    println!("{}", serde_json::to_string_pretty(&state.outcome())?);

    result.context("Match aborted")?;
    info!("Match finished");
    Ok(())
}
