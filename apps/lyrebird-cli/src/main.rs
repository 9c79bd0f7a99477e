//! Lyrebird demo harness - a headless stdin-driven driver for the audio
//! playback engine.
//!
//! This binary exists to exercise [`lyrebird_core`] end to end without a
//! real chat-platform connection: each line read from stdin is a guild
//! command, and frames are sunk into a [`RecordingVoiceTransport`] rather
//! than a live voice socket. The actual command transport, interaction
//! reply formatting, and voice connection are the external command layer's
//! concern; none of that lives here.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use lyrebird_core::{
    Cache, EngineManager, GuildId, ProcessExtractor, RecordingVoiceTransport, Resolver,
    ResolverTimeouts, TaskSpawner, TokioSpawner, UserId,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;

use crate::config::HarnessConfig;

/// Lyrebird - headless demo harness for the per-guild audio playback engine.
#[derive(Parser, Debug)]
#[command(name = "lyrebird-cli")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (TOML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log filter (e.g. "info", "lyrebird_core=debug").
    #[arg(short, long, default_value = "info", env = "LYREBIRD_LOG")]
    log_level: String,

    /// Path to the media extractor binary (overrides config file).
    #[arg(short = 'e', long, env = "LYREBIRD_EXTRACTOR_BIN")]
    extractor_bin: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&args.log_level))
        .init();

    tracing::info!("lyrebird-cli v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        HarnessConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(bin) = args.extractor_bin {
        config.extractor_bin = bin;
    }
    config
        .engine
        .validate()
        .context("invalid engine configuration")?;

    let cache = Arc::new(
        Cache::open(&config.engine.cache_dir, "webm", config.engine.cache_limit_bytes)
            .await
            .context("failed to open cache")?,
    );
    let extractor = Arc::new(ProcessExtractor::new(config.extractor_bin.clone()));
    let resolver = Arc::new(Resolver::new(
        extractor.clone(),
        None,
        ResolverTimeouts {
            search: config.engine.search_timeout,
            playlist_listing: config.engine.playlist_timeout,
            prefetch: config.engine.prefetch_timeout,
            playlist_prefetch_count: config.engine.playlist_prefetch_count,
        },
    ));

    let spawner: Arc<dyn TaskSpawner> = Arc::new(TokioSpawner::current());
    let manager = Arc::new(EngineManager::new(
        resolver,
        extractor,
        cache,
        config.engine.clone(),
        spawner,
    ));

    tracing::info!("ready; reading commands from stdin (\"<guild-id> <command> [args...]\")");

    let commands = tokio::spawn(run_command_loop(Arc::clone(&manager)));

    shutdown_signal().await;
    tracing::info!("shutdown signal received, stopping all players");
    manager.shutdown_all().await;
    commands.abort();

    tracing::info!("shutdown complete");
    Ok(())
}

/// Reads one command per line: `<guild-id> play <query>`, `<guild-id>
/// pause`, `<guild-id> resume`, `<guild-id> skip`, `<guild-id> stop`,
/// `<guild-id> seek <seconds>`, `<guild-id> volume <0-100>`.
async fn run_command_loop(manager: Arc<EngineManager>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!("stdin read error: {err}");
                return;
            }
        };
        let mut parts = line.trim().split_whitespace();
        let Some(guild_raw) = parts.next() else {
            continue;
        };
        let Ok(guild_id) = guild_raw.parse::<u64>() else {
            tracing::warn!("invalid guild id: {guild_raw}");
            continue;
        };
        let guild_id = GuildId(guild_id);
        let Some(command) = parts.next() else {
            continue;
        };
        let rest: Vec<&str> = parts.collect();

        let voice = Arc::new(RecordingVoiceTransport::new());
        let player = manager.player_for(guild_id, voice);

        let result = match command {
            "play" => {
                let query = rest.join(" ");
                player
                    .enqueue(&query, UserId::from("demo-user"))
                    .await
                    .map(|_| ())
            }
            "pause" => player.pause(),
            "resume" => player.resume(),
            "skip" => player.skip(),
            "stop" => player.stop(),
            "disconnect" => player.disconnect(),
            "seek" => match rest.first().and_then(|s| s.parse::<f64>().ok()) {
                Some(secs) => player.seek(std::time::Duration::from_secs_f64(secs)),
                None => {
                    tracing::warn!("seek requires a number of seconds");
                    continue;
                }
            },
            "volume" => match rest.first().and_then(|s| s.parse::<u8>().ok()) {
                Some(percent) => player.set_volume(percent),
                None => {
                    tracing::warn!("volume requires a 0-100 integer");
                    continue;
                }
            },
            "shuffle" => player.shuffle(),
            other => {
                tracing::warn!("unknown command: {other}");
                continue;
            }
        };

        if let Err(err) = result {
            tracing::warn!(guild_id = %guild_id, "{err}");
        }
    }
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
