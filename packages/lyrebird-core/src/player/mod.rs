//! Player façade: ties Queue + Scheduler + voice handle + Encoder
//! together for one guild, and exposes the command surface the external
//! command layer drives.

mod pump;
mod scheduler;

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex as SyncMutex, RwLock};
use tokio::sync::{mpsc, Notify};
use tracing::instrument;

use crate::cache::Cache;
use crate::config::EngineConfig;
use crate::encoder::Encoder;
use crate::error::{EngineError, EngineResult};
use crate::extractor::Extractor;
use crate::ids::{GuildId, UserId};
use crate::queue::Queue;
use crate::resolver::Resolver;
use crate::runtime::TaskSpawner;
use crate::track::Track;
use crate::voice::VoiceTransport;

use scheduler::SchedulerCommand;

/// Clamped 0-100 playback volume (`PlayerState.volume`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Volume(u8);

impl Volume {
    pub const NOMINAL: Volume = Volume(100);

    pub fn new(percent: u8) -> Result<Self, EngineError> {
        if percent > 100 {
            return Err(EngineError::User(format!(
                "volume must be 0-100, got {percent}"
            )));
        }
        Ok(Self(percent))
    }

    #[must_use]
    pub fn get(self) -> u8 {
        self.0
    }
}

/// Coarse playback phase exposed to inspectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerPhase {
    Idle,
    Preparing,
    Playing,
    Paused,
    Stopping,
    Disconnected,
}

/// Shared, lock-guarded state for one guild's player (`PlayerState`). A
/// single reader/writer lock per field, never held across subprocess I/O,
/// network calls, or channel blocks.
pub(crate) struct PlayerInner {
    pub guild_id: GuildId,
    pub queue: RwLock<Queue>,
    pub phase: RwLock<PlayerPhase>,
    pub voice: Arc<dyn VoiceTransport>,
    pub current_encoder: RwLock<Option<Arc<Encoder>>>,
    pub position: RwLock<Duration>,
    pub volume: AtomicU8,
    pub saved_volume: RwLock<Option<u8>>,
    pub paused: AtomicBool,
    pub scheduler_active: AtomicBool,
    pub voice_settled: AtomicBool,
    pub re_enqueued: Notify,
    pub last_error: SyncMutex<Option<(String, String)>>,
}

/// Aggregates Queue + scheduler + voice handle + current Encoder for one
/// guild. Created lazily by [`crate::manager::EngineManager`] on
/// first reference to a guild.
pub struct Player {
    inner: Arc<PlayerInner>,
    commands: SyncMutex<mpsc::UnboundedSender<SchedulerCommand>>,
    spawner: Arc<dyn TaskSpawner>,
    resolver: Arc<Resolver>,
    extractor: Arc<dyn Extractor>,
    cache: Arc<Cache>,
    config: EngineConfig,
}

impl Player {
    #[must_use]
    pub fn new(
        guild_id: GuildId,
        voice: Arc<dyn VoiceTransport>,
        resolver: Arc<Resolver>,
        extractor: Arc<dyn Extractor>,
        cache: Arc<Cache>,
        config: EngineConfig,
        spawner: Arc<dyn TaskSpawner>,
    ) -> Self {
        let inner = Arc::new(PlayerInner {
            guild_id,
            queue: RwLock::new(Queue::new()),
            phase: RwLock::new(PlayerPhase::Idle),
            voice,
            current_encoder: RwLock::new(None),
            position: RwLock::new(Duration::ZERO),
            volume: AtomicU8::new(config.default_volume),
            saved_volume: RwLock::new(None),
            paused: AtomicBool::new(false),
            scheduler_active: AtomicBool::new(false),
            voice_settled: AtomicBool::new(false),
            re_enqueued: Notify::new(),
            last_error: SyncMutex::new(None),
        });
        // A channel with no running scheduler yet; `ensure_running` replaces
        // this sender with a fresh pair each time it (re)spawns the loop.
        let (tx, _rx) = mpsc::unbounded_channel();
        Self {
            inner,
            commands: SyncMutex::new(tx),
            spawner,
            resolver,
            extractor,
            cache,
            config,
        }
    }

    #[must_use]
    pub fn guild_id(&self) -> GuildId {
        self.inner.guild_id
    }

    #[must_use]
    pub fn phase(&self) -> PlayerPhase {
        *self.inner.phase.read()
    }

    #[must_use]
    pub fn is_loop_running(&self) -> bool {
        self.inner.scheduler_active.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn current_position(&self) -> Duration {
        *self.inner.position.read()
    }

    #[must_use]
    pub fn current_track(&self) -> Option<Track> {
        self.inner.queue.read().current().cloned()
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.inner.queue.read().len()
    }

    #[must_use]
    pub fn queue_snapshot(&self) -> Vec<Track> {
        // Not on the hot path; cloning the whole queue is fine for a
        // `/queue` command render.
        self.inner.queue.read().tracks_snapshot()
    }

    /// Surfaces and clears the last mid-playback failure (track title, error
    /// message), for the command layer to relay as a plain-text notice.
    pub fn take_last_error(&self) -> Option<(String, String)> {
        self.inner.last_error.lock().take()
    }

    /// Resolves `query` and appends the resulting tracks to the queue,
    /// starting the scheduler if it isn't already running.
    #[instrument(skip(self, query), fields(guild_id = %self.inner.guild_id))]
    pub async fn enqueue(&self, query: &str, requested_by: UserId) -> EngineResult<usize> {
        let mut tracks = self.resolver.resolve(query).await?;
        for track in &mut tracks {
            track.requested_by = Some(requested_by.clone());
        }
        let added = tracks.len();
        self.inner.queue.write().add_all(tracks);
        self.inner.re_enqueued.notify_one();
        self.ensure_running();
        Ok(added)
    }

    fn ensure_running(&self) {
        if self
            .inner
            .scheduler_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return; // at most one scheduler task per guild, ever.
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.commands.lock() = tx;

        let inner = Arc::clone(&self.inner);
        let cache = Arc::clone(&self.cache);
        let extractor = Arc::clone(&self.extractor);
        let config = self.config.clone();
        self.spawner.spawn(Box::pin(async move {
            scheduler::run(inner.clone(), rx, cache, extractor, config).await;
            inner.scheduler_active.store(false, Ordering::SeqCst);
        }));
    }

    fn send(&self, command: SchedulerCommand) {
        let _ = self.commands.lock().send(command);
    }

    pub fn pause(&self) -> EngineResult<()> {
        if *self.inner.phase.read() != PlayerPhase::Playing {
            return Err(EngineError::User("nothing is playing".into()));
        }
        self.send(SchedulerCommand::Pause);
        Ok(())
    }

    pub fn resume(&self) -> EngineResult<()> {
        if *self.inner.phase.read() != PlayerPhase::Paused {
            return Err(EngineError::User("playback is not paused".into()));
        }
        self.send(SchedulerCommand::Resume);
        Ok(())
    }

    pub fn skip(&self) -> EngineResult<()> {
        if self.inner.queue.read().current().is_none() {
            return Err(EngineError::User("nothing is playing".into()));
        }
        self.send(SchedulerCommand::Skip);
        Ok(())
    }

    pub fn stop(&self) -> EngineResult<()> {
        self.send(SchedulerCommand::Stop);
        Ok(())
    }

    /// Tears down the player unconditionally: equivalent to `stop` when
    /// playback is active, a no-op signal otherwise since an idle player has
    /// no scheduler to stop.
    pub fn disconnect(&self) -> EngineResult<()> {
        if self.inner.scheduler_active.load(Ordering::SeqCst) {
            self.send(SchedulerCommand::Stop);
        }
        Ok(())
    }

    /// Seeks the current track to `position`. Requires a non-live current
    /// track and `0 <= position <= duration`.
    pub fn seek(&self, position: Duration) -> EngineResult<()> {
        let queue = self.inner.queue.read();
        let track = queue
            .current()
            .ok_or_else(|| EngineError::User("nothing is playing".into()))?;
        if track.is_live {
            return Err(EngineError::User("cannot seek a live stream".into()));
        }
        if position > track.duration {
            return Err(EngineError::User(
                "seek position is past the end of the track".into(),
            ));
        }
        drop(queue);
        self.send(SchedulerCommand::Seek(position));
        Ok(())
    }

    pub fn set_volume(&self, percent: u8) -> EngineResult<()> {
        let volume = Volume::new(percent)?;
        self.inner.volume.store(volume.get(), Ordering::Relaxed);
        if let Some(encoder) = self.inner.current_encoder.read().clone() {
            encoder.set_volume(volume.get());
        }
        Ok(())
    }

    #[must_use]
    pub fn volume(&self) -> u8 {
        self.inner.volume.load(Ordering::Relaxed)
    }

    /// Ducks the volume to `config.reduce_on_voice_target` in response to
    /// another speaker becoming active in the same voice channel. A no-op
    /// unless `reduce_on_voice` is enabled and playback is active.
    pub fn reduce_volume(&self) {
        if !self.config.reduce_on_voice || *self.inner.phase.read() != PlayerPhase::Playing {
            return;
        }
        let mut saved = self.inner.saved_volume.write();
        if saved.is_some() {
            return; // already ducked
        }
        *saved = Some(self.inner.volume.load(Ordering::Relaxed));
        drop(saved);
        let _ = self.set_volume(self.config.reduce_on_voice_target);
    }

    /// Restores the volume saved by [`Self::reduce_volume`].
    pub fn restore_volume(&self) {
        let previous = self.inner.saved_volume.write().take();
        if let Some(previous) = previous {
            let _ = self.set_volume(previous);
        }
    }

    pub fn set_loop(&self, enabled: bool) {
        self.inner.queue.write().loop_enabled = enabled;
    }

    #[must_use]
    pub fn loop_enabled(&self) -> bool {
        self.inner.queue.read().loop_enabled
    }

    pub fn shuffle(&self) -> EngineResult<()> {
        self.inner.queue.write().shuffle_upcoming()
    }

    pub fn clear_upcoming(&self) {
        self.inner.queue.write().clear_upcoming();
    }

    /// Clears the entire queue and stops playback (equivalent to `stop`
    /// followed by a clear, since the scheduler clears the queue itself on
    /// an explicit stop).
    pub fn clear_all(&self) -> EngineResult<()> {
        self.stop()
    }

    pub fn move_track(&self, i: usize, j: usize) -> EngineResult<()> {
        self.inner.queue.write().move_track(i, j)
    }

    /// Removes the track at position `i`. If it was the currently playing
    /// track, stops playback so the scheduler advances to the next one.
    pub fn remove(&self, i: usize) -> EngineResult<Track> {
        let was_current = {
            let queue = self.inner.queue.read();
            queue.current_position() == Some(i)
        };
        let removed = self.inner.queue.write().remove(i)?;
        if was_current {
            self.send(SchedulerCommand::Skip);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{ExtractedInfo, Format, PlaylistEntry};
    use crate::resolver::ResolverTimeouts;
    use crate::runtime::TokioSpawner;
    use crate::track::TrackSource;
    use crate::voice::RecordingVoiceTransport;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};

    struct StubExtractor;

    #[async_trait]
    impl Extractor for StubExtractor {
        async fn info(
            &self,
            _query: &str,
            _timeout: Duration,
        ) -> Result<ExtractedInfo, crate::error::ExtractorError> {
            Err(crate::error::ExtractorError::Process("stub".into()))
        }
        async fn flat_playlist(
            &self,
            _url: &str,
            _timeout: Duration,
        ) -> Result<Vec<PlaylistEntry>, crate::error::ExtractorError> {
            Ok(vec![])
        }
        async fn best_audio_url(
            &self,
            _url: &str,
            _timeout: Duration,
        ) -> Result<String, crate::error::ExtractorError> {
            Err(crate::error::ExtractorError::Process("stub".into()))
        }
        async fn download(
            &self,
            _url: &str,
            _dest: &Path,
            _timeout: Duration,
        ) -> Result<(), crate::error::ExtractorError> {
            Ok(())
        }
    }

    /// An extractor whose resolved track points at a real, locally generated
    /// silent WAV file, so the scheduler can build a genuine `Encoder`
    /// against it without any network dependency.
    struct PlayableExtractor {
        wav_path: PathBuf,
    }

    #[async_trait]
    impl Extractor for PlayableExtractor {
        async fn info(
            &self,
            query: &str,
            _timeout: Duration,
        ) -> Result<ExtractedInfo, crate::error::ExtractorError> {
            let path = self.wav_path.to_string_lossy().to_string();
            Ok(ExtractedInfo {
                id: "playable".into(),
                title: format!("playable: {query}"),
                duration: Some(5.0),
                thumbnail: None,
                uploader: None,
                webpage_url: path.clone(),
                is_live: false,
                formats: vec![Format {
                    format_id: "1".into(),
                    url: path,
                    ext: "wav".into(),
                    acodec: "pcm_s16le".into(),
                    vcodec: "none".into(),
                    abr: Some(1536.0),
                }],
            })
        }
        async fn flat_playlist(
            &self,
            _url: &str,
            _timeout: Duration,
        ) -> Result<Vec<PlaylistEntry>, crate::error::ExtractorError> {
            Ok(vec![])
        }
        async fn best_audio_url(
            &self,
            _url: &str,
            _timeout: Duration,
        ) -> Result<String, crate::error::ExtractorError> {
            Ok(self.wav_path.to_string_lossy().to_string())
        }
        async fn download(
            &self,
            _url: &str,
            dest: &Path,
            _timeout: Duration,
        ) -> Result<(), crate::error::ExtractorError> {
            tokio::fs::copy(&self.wav_path, dest)
                .await
                .map(|_| ())
                .map_err(|e| crate::error::ExtractorError::Process(e.to_string()))
        }
    }

    /// Writes a minimal valid silent WAV file: no subprocess required to
    /// produce playable test input.
    fn write_silent_wav(path: &Path, duration: Duration, sample_rate: u32, channels: u16) {
        let num_samples = (duration.as_secs_f64() * f64::from(sample_rate)) as u32;
        let data_len = num_samples * u32::from(channels) * 2;
        let byte_rate = sample_rate * u32::from(channels) * 2;
        let block_align = channels * 2;

        let mut buf = Vec::with_capacity(44 + data_len as usize);
        buf.extend_from_slice(b"RIFF");
        buf.extend_from_slice(&(36 + data_len).to_le_bytes());
        buf.extend_from_slice(b"WAVE");
        buf.extend_from_slice(b"fmt ");
        buf.extend_from_slice(&16u32.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
        buf.extend_from_slice(&channels.to_le_bytes());
        buf.extend_from_slice(&sample_rate.to_le_bytes());
        buf.extend_from_slice(&byte_rate.to_le_bytes());
        buf.extend_from_slice(&block_align.to_le_bytes());
        buf.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&data_len.to_le_bytes());
        buf.resize(buf.len() + data_len as usize, 0);
        std::fs::write(path, buf).unwrap();
    }

    async fn make_playable_player() -> (Player, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let wav_path = dir.path().join("silence.wav");
        write_silent_wav(&wav_path, Duration::from_secs(5), 48_000, 2);

        let cache = Arc::new(Cache::open(dir.path(), "webm", 64 * 1024 * 1024).await.unwrap());
        let extractor: Arc<dyn Extractor> = Arc::new(PlayableExtractor { wav_path });
        let resolver = Arc::new(Resolver::new(
            Arc::clone(&extractor),
            None,
            ResolverTimeouts {
                search: Duration::from_secs(5),
                playlist_listing: Duration::from_secs(5),
                prefetch: Duration::from_secs(5),
                playlist_prefetch_count: 3,
            },
        ));
        let voice = Arc::new(RecordingVoiceTransport::new());
        let spawner: Arc<dyn TaskSpawner> = Arc::new(TokioSpawner::current());
        let player = Player::new(
            GuildId(2),
            voice,
            resolver,
            extractor,
            cache,
            EngineConfig::default(),
            spawner,
        );
        (player, dir)
    }

    /// Polls until `current_encoder` holds some encoder, or `timeout` elapses.
    async fn wait_for_encoder(player: &Player, timeout: Duration) -> Option<Arc<Encoder>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(encoder) = player.inner.current_encoder.read().clone() {
                return Some(encoder);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Polls until `current_encoder` holds an encoder other than `previous`,
    /// or `timeout` elapses.
    async fn wait_for_new_encoder(
        player: &Player,
        previous: &Arc<Encoder>,
        timeout: Duration,
    ) -> Option<Arc<Encoder>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(encoder) = player.inner.current_encoder.read().clone() {
                if !Arc::ptr_eq(&encoder, previous) {
                    return Some(encoder);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// If ffmpeg isn't available in the test environment, the scheduler
    /// will retry-then-fail and never build an Encoder at all; skip rather
    /// than fail on an environment gap unrelated to what's under test.
    #[tokio::test]
    async fn configured_volume_is_reapplied_to_every_newly_built_encoder() {
        let (player, _dir) = make_playable_player().await;
        player.set_volume(30).unwrap();

        player
            .enqueue("play it twice", UserId::from("listener"))
            .await
            .unwrap();
        player
            .enqueue("play it again", UserId::from("listener"))
            .await
            .unwrap();

        let Some(first) = wait_for_encoder(&player, Duration::from_secs(10)).await else {
            return;
        };
        assert_eq!(
            first.volume_percent(),
            30,
            "a freshly built encoder must start at the player's configured volume, not the Encoder default of 100"
        );

        player.skip().unwrap();

        let Some(second) = wait_for_new_encoder(&player, &first, Duration::from_secs(10)).await
        else {
            return;
        };
        assert_eq!(
            second.volume_percent(),
            30,
            "volume must persist across a track transition instead of resetting on every new Encoder"
        );
    }

    fn track(id: &str, duration_secs: u64, is_live: bool) -> Track {
        Track {
            id: id.into(),
            title: format!("Track {id}"),
            artist: None,
            thumbnail: None,
            duration: Duration::from_secs(duration_secs),
            source: TrackSource::Direct,
            canonical_url: format!("https://media.example/{id}"),
            stream_url: None,
            local_path: None,
            is_live,
            requested_by: None,
        }
    }

    async fn make_player() -> (Player, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(Cache::open(dir.path(), "webm", 1024 * 1024).await.unwrap());
        let extractor: Arc<dyn Extractor> = Arc::new(StubExtractor);
        let resolver = Arc::new(Resolver::new(
            Arc::clone(&extractor),
            None,
            ResolverTimeouts {
                search: Duration::from_secs(1),
                playlist_listing: Duration::from_secs(1),
                prefetch: Duration::from_secs(1),
                playlist_prefetch_count: 3,
            },
        ));
        let voice = Arc::new(RecordingVoiceTransport::new());
        let spawner: Arc<dyn TaskSpawner> = Arc::new(TokioSpawner::current());
        let player = Player::new(
            GuildId(1),
            voice,
            resolver,
            extractor,
            cache,
            EngineConfig::default(),
            spawner,
        );
        (player, dir)
    }

    #[tokio::test]
    async fn pause_errors_when_nothing_is_playing() {
        let (player, _dir) = make_player().await;
        assert!(player.pause().is_err());
    }

    #[tokio::test]
    async fn resume_errors_when_not_paused() {
        let (player, _dir) = make_player().await;
        assert!(player.resume().is_err());
    }

    #[tokio::test]
    async fn skip_errors_on_an_empty_queue() {
        let (player, _dir) = make_player().await;
        assert!(player.skip().is_err());
    }

    #[tokio::test]
    async fn seek_rejects_a_live_track() {
        let (player, _dir) = make_player().await;
        player.inner.queue.write().add(track("a", 60, true));
        player.inner.queue.write().advance();
        assert!(player.seek(Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn seek_rejects_past_the_track_duration() {
        let (player, _dir) = make_player().await;
        player.inner.queue.write().add(track("a", 60, false));
        player.inner.queue.write().advance();
        assert!(player.seek(Duration::from_secs(61)).is_err());
        assert!(player.seek(Duration::from_secs(30)).is_ok());
    }

    #[tokio::test]
    async fn set_volume_rejects_out_of_range_percent() {
        let (player, _dir) = make_player().await;
        assert!(player.set_volume(101).is_err());
        assert!(player.set_volume(50).is_ok());
        assert_eq!(player.volume(), 50);
    }

    #[tokio::test]
    async fn reduce_volume_is_a_noop_unless_configured_and_playing() {
        let (player, _dir) = make_player().await;
        player.reduce_volume();
        assert_eq!(player.volume(), EngineConfig::default().default_volume);
    }

    #[tokio::test]
    async fn remove_reports_out_of_bounds() {
        let (player, _dir) = make_player().await;
        assert!(player.remove(0).is_err());
    }
}
