//! Per-guild play loop: picks tracks, consults the cache, builds the
//! Encoder, hands control to the frame pump, and reacts to its outcome.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::warn;

use crate::cache::{cache_key, Cache};
use crate::config::EngineConfig;
use crate::encoder::{Encoder, EncoderParams, SourceLocator};
use crate::error::{CacheError, EngineError, ResolverError};
use crate::extractor::Extractor;
use crate::track::Track;

use super::pump;
use super::pump::PumpOutcome;
use super::{PlayerInner, PlayerPhase};

/// Commands a [`super::Player`] sends to its running scheduler/pump pair.
/// While the pump is active it consumes these directly; otherwise the
/// scheduler drains them between tracks.
#[derive(Debug, Clone, Copy)]
pub(crate) enum SchedulerCommand {
    Pause,
    Resume,
    Skip,
    Stop,
    Seek(Duration),
}

/// Runs until a `Stop` command, queue exhaustion past the idle grace, or the
/// command channel closes (the [`super::Player`] was dropped). Consumes
/// `commands` and `inner` for its whole lifetime; never spawns a second copy
/// of itself, since [`super::Player::ensure_running`] only spawns this
/// when no live task already holds that guarantee.
pub(crate) async fn run(
    inner: Arc<PlayerInner>,
    mut commands: mpsc::UnboundedReceiver<SchedulerCommand>,
    cache: Arc<Cache>,
    extractor: Arc<dyn Extractor>,
    config: EngineConfig,
) {
    let params = EncoderParams {
        sample_rate_hz: config.sample_rate_hz,
        channels: config.channels,
        frame_duration_ms: config.frame_duration_ms,
        channel_capacity: config.frame_channel_capacity,
        bitrate_kbps: config.bitrate_kbps,
    };
    let frame_duration = Duration::from_millis(u64::from(config.frame_duration_ms));

    let mut pending_seek: Option<Duration> = None;

    // Track selection is always explicit: `current` is only ever assigned
    // from the return value of `advance`/`force_advance`, never re-derived
    // by probing `Queue::current()` after the fact. `Queue` keeps played
    // tracks around (so e.g. a `/queue` listing shows history), so a cursor
    // of -1 does not imply the backing `tracks` vec is empty — re-deriving
    // "what's current" from `current().is_none()` alone cannot distinguish
    // "not started yet" from "just exhausted", and blindly re-advancing in
    // the latter case would restart the whole queue from index 0 forever
    // instead of disconnecting.
    let mut current = inner.queue.write().advance().cloned();

    'tracks: loop {
        let Some(mut track) = current.clone() else {
            // Exhausted: per the disconnect policy, clear the queue
            // immediately, then honour the configured grace period before
            // actually tearing down. A fresh enqueue during the grace
            // window calls `add_all` on the now-empty queue, so the next
            // `advance` below correctly lands on the new track rather than
            // replaying the old one.
            inner.queue.write().clear_all();
            if !wait_for_grace_or_new_track(&inner, &mut commands, config.wait_after_queue_empty_seconds).await
            {
                break 'tracks;
            }
            current = inner.queue.write().advance().cloned();
            continue 'tracks;
        };

        *inner.phase.write() = PlayerPhase::Preparing;

        // A command may already be waiting (e.g. the user skipped again
        // before this track's Encoder finished building last time around).
        match commands.try_recv() {
            Ok(SchedulerCommand::Stop) => break 'tracks,
            Ok(SchedulerCommand::Skip) => {
                current = inner.queue.write().force_advance().cloned();
                pending_seek = None;
                continue 'tracks;
            }
            Ok(SchedulerCommand::Seek(position)) => pending_seek = Some(position),
            Ok(SchedulerCommand::Pause) => inner.paused.store(true, std::sync::atomic::Ordering::SeqCst),
            Ok(SchedulerCommand::Resume) => inner.paused.store(false, std::sync::atomic::Ordering::SeqCst),
            Err(_) => {}
        }

        let start_offset = pending_seek.take().unwrap_or(Duration::ZERO);

        let mut encoder = None;
        for attempt in 0..2 {
            match build_encoder(&cache, &extractor, &config, &mut track, start_offset, params).await {
                Ok(built) => {
                    encoder = Some(built);
                    break;
                }
                Err(err) => {
                    if attempt == 1 {
                        *inner.last_error.lock() = Some((track.title.clone(), err.to_string()));
                    } else {
                        track.stream_url = None;
                    }
                }
            }
        }

        let Some(encoder) = encoder else {
            current = inner.queue.write().force_advance().cloned();
            continue 'tracks;
        };

        if let Some(queue_track) = inner.queue.write().current_mut() {
            queue_track.stream_url = track.stream_url.clone();
        }

        // A fresh Encoder always starts at its own default volume; reapply
        // the player's configured volume (which also carries any active
        // voice-activity ducking, since both route through `inner.volume`)
        // so it doesn't audibly reset to 100% on every track transition.
        encoder.set_volume(inner.volume.load(std::sync::atomic::Ordering::SeqCst));

        let encoder = Arc::new(encoder);
        *inner.current_encoder.write() = Some(Arc::clone(&encoder));
        *inner.position.write() = start_offset;

        let outcome = pump::run(Arc::clone(&inner), Arc::clone(&encoder), &mut commands, frame_duration).await;

        encoder.cleanup().await;
        *inner.current_encoder.write() = None;

        match outcome {
            PumpOutcome::Eos => {
                current = inner.queue.write().advance().cloned();
            }
            PumpOutcome::Skip => {
                current = inner.queue.write().force_advance().cloned();
            }
            PumpOutcome::Stop => break 'tracks,
            PumpOutcome::Seek(position) => pending_seek = Some(position),
        }
    }

    teardown_and_disconnect(&inner).await;
}

/// Resolves a playable locator for `track`, preferring the cache and
/// falling back to direct streaming with a fire-and-forget background
/// download. Live tracks always stream and are
/// never cached.
async fn build_encoder(
    cache: &Arc<Cache>,
    extractor: &Arc<dyn Extractor>,
    config: &EngineConfig,
    track: &mut Track,
    start_offset: Duration,
    params: EncoderParams,
) -> Result<Encoder, EngineError> {
    if track.is_live {
        let url = ensure_stream_url(extractor, config, track).await?;
        return Encoder::new(SourceLocator::Url(url), params)
            .await
            .map_err(Into::into);
    }

    let key = cache_key(&track.canonical_url);
    if let Some(path) = cache.get(&key).await {
        track.local_path = Some(path.to_string_lossy().to_string());
        return Encoder::new_at(SourceLocator::LocalPath(path), params, start_offset)
            .await
            .map_err(Into::into);
    }

    let url = ensure_stream_url(extractor, config, track).await?;
    spawn_background_download(cache, extractor, config, track.canonical_url.clone());

    Encoder::new_at(SourceLocator::Url(url), params, start_offset)
        .await
        .map_err(Into::into)
}

/// Returns the track's cached stream URL, or fetches one via the extractor
/// and stores it back onto `track` ("Populated by Resolver when cheap,
/// by Encoder otherwise" — here, by the scheduler on the Encoder's behalf,
/// since the Encoder itself has no extractor dependency).
async fn ensure_stream_url(
    extractor: &Arc<dyn Extractor>,
    config: &EngineConfig,
    track: &mut Track,
) -> Result<String, EngineError> {
    if let Some(url) = &track.stream_url {
        return Ok(url.clone());
    }
    let url = extractor
        .best_audio_url(&track.canonical_url, config.prefetch_timeout)
        .await
        .map_err(ResolverError::from)?;
    track.stream_url = Some(url.clone());
    Ok(url)
}

/// Starts a detached task that downloads `canonical_url` into the cache.
/// Its result is never awaited by the caller; playback never blocks on it.
fn spawn_background_download(
    cache: &Arc<Cache>,
    extractor: &Arc<dyn Extractor>,
    config: &EngineConfig,
    canonical_url: String,
) {
    let cache = Arc::clone(cache);
    let extractor = Arc::clone(extractor);
    let download_timeout = config.download_timeout;
    tokio::spawn(async move {
        let key = cache_key(&canonical_url);
        let result = cache
            .get_or_create(&key, |dest| {
                let extractor = Arc::clone(&extractor);
                let canonical_url = canonical_url.clone();
                async move {
                    extractor
                        .download(&canonical_url, &dest, download_timeout)
                        .await
                        .map_err(|e| CacheError::Producer(e.to_string()))
                }
            })
            .await;
        if let Err(err) = result {
            warn!(target: "lyrebird_core::player::scheduler", "background cache population failed: {err}");
        }
    });
}

/// Races the configured grace period against a new enqueue and an explicit
/// stop. Returns `true` if the caller should re-check the queue for a new
/// current track, `false` if it should disconnect. `wait_after_queue_empty_seconds
/// == 0` disconnects immediately without waiting.
async fn wait_for_grace_or_new_track(
    inner: &PlayerInner,
    commands: &mut mpsc::UnboundedReceiver<SchedulerCommand>,
    grace_seconds: u64,
) -> bool {
    if grace_seconds == 0 {
        return false;
    }
    *inner.phase.write() = PlayerPhase::Idle;
    tokio::select! {
        () = tokio::time::sleep(Duration::from_secs(grace_seconds)) => false,
        () = inner.re_enqueued.notified() => true,
        cmd = commands.recv() => !matches!(cmd, Some(SchedulerCommand::Stop) | None),
    }
}

async fn teardown_and_disconnect(inner: &PlayerInner) {
    *inner.phase.write() = PlayerPhase::Stopping;
    inner.queue.write().clear_all();
    let _ = inner.voice.disconnect().await;
    *inner.phase.write() = PlayerPhase::Disconnected;
}
