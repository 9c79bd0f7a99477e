//! Cross-module scenario tests driving [`Player`] end to end through fakes
//! for the Extractor and VoiceTransport seams. `Encoder` itself is the real
//! implementation (it shells out to `ffmpeg`), so these scenarios are built
//! around inputs that make the real encoder fail deterministically — either
//! `ffmpeg` is missing entirely (spawn fails) or it is fed an unreachable
//! URL (it exits inside the startup probe window) — rather than depending
//! on an actual media source being reachable from the test environment.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use lyrebird_core::{
    Cache, EngineConfig, ExtractedInfo, Extractor, Format, GuildId, Player, PlayerPhase,
    PlaylistEntry, RecordingVoiceTransport, Resolver, ResolverTimeouts, TaskSpawner, TokioSpawner,
    UserId,
};

/// An extractor whose resolved track can never be played: `info` reports a
/// track with no usable format, and `best_audio_url` hands back a locator
/// `ffmpeg` cannot open. Every call is counted so tests can assert on how
/// many resolution attempts actually happened.
struct DoomedExtractor {
    best_audio_url_calls: AtomicUsize,
}

impl DoomedExtractor {
    fn new() -> Self {
        Self {
            best_audio_url_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Extractor for DoomedExtractor {
    async fn info(
        &self,
        query: &str,
        _timeout: Duration,
    ) -> Result<ExtractedInfo, lyrebird_core::error::ExtractorError> {
        Ok(ExtractedInfo {
            id: "doomed".into(),
            title: format!("doomed: {query}"),
            duration: Some(12.0),
            thumbnail: None,
            uploader: None,
            webpage_url: "https://media.example/watch?v=doomed".into(),
            is_live: false,
            // No formats at all: the scheduler must fall back to
            // `best_audio_url` to get a stream locator.
            formats: Vec::<Format>::new(),
        })
    }

    async fn flat_playlist(
        &self,
        _url: &str,
        _timeout: Duration,
    ) -> Result<Vec<PlaylistEntry>, lyrebird_core::error::ExtractorError> {
        Ok(vec![])
    }

    async fn best_audio_url(
        &self,
        _url: &str,
        _timeout: Duration,
    ) -> Result<String, lyrebird_core::error::ExtractorError> {
        self.best_audio_url_calls.fetch_add(1, Ordering::SeqCst);
        // Nonexistent host: ffmpeg either fails to resolve it immediately
        // or the subprocess itself can't be found, either way an Err from
        // `Encoder::new_at` within the startup probe window.
        Ok("https://lyrebird-test-doomed.invalid/nope.webm".into())
    }

    async fn download(
        &self,
        _url: &str,
        _dest: &Path,
        _timeout: Duration,
    ) -> Result<(), lyrebird_core::error::ExtractorError> {
        Ok(())
    }
}

async fn make_player(
    extractor: Arc<DoomedExtractor>,
    wait_after_queue_empty_seconds: u64,
) -> (Player, Arc<RecordingVoiceTransport>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(
        Cache::open(dir.path(), "webm", 64 * 1024 * 1024)
            .await
            .unwrap(),
    );
    let extractor_dyn: Arc<dyn Extractor> = extractor;
    let resolver = Arc::new(Resolver::new(
        Arc::clone(&extractor_dyn),
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

    let mut config = EngineConfig::default();
    config.wait_after_queue_empty_seconds = wait_after_queue_empty_seconds;

    let player = Player::new(
        GuildId(42),
        Arc::clone(&voice) as Arc<dyn lyrebird_core::VoiceTransport>,
        resolver,
        extractor_dyn,
        cache,
        config,
        spawner,
    );
    (player, voice, dir)
}

/// Polls `predicate` until it's true or `timeout` elapses, sleeping briefly
/// between checks. Returns whether it converged.
async fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// S3 (retry-once-then-fatal) composed with S6 (queue exhaustion
/// disconnects): the only track in the queue can never build an Encoder, so
/// the scheduler retries exactly once, records the failure, advances past
/// it, finds the queue exhausted, and disconnects without ever looping back
/// to replay the track.
#[tokio::test]
async fn unplayable_track_is_retried_once_then_disconnects() {
    let extractor = Arc::new(DoomedExtractor::new());
    let (player, voice, _dir) = make_player(Arc::clone(&extractor), 0).await;

    let added = player
        .enqueue("lofi hip hop radio", UserId::from("listener".to_string()))
        .await
        .unwrap();
    assert_eq!(added, 1);

    let disconnected = wait_until(Duration::from_secs(10), || voice.is_disconnected()).await;
    assert!(
        disconnected,
        "scheduler never disconnected after its only track became unplayable"
    );

    assert_eq!(player.phase(), PlayerPhase::Disconnected);
    assert_eq!(player.queue_len(), 0, "exhausted queue must end up empty");
    assert!(
        !player.is_loop_running(),
        "scheduler task must exit after disconnecting"
    );

    let last_error = player.take_last_error();
    assert!(
        last_error.is_some(),
        "a fatal per-track failure must be recorded for the command layer to relay"
    );

    // Exactly two build attempts: the first fails and clears the cached
    // stream URL, the second fails and is recorded as fatal.
    assert_eq!(extractor.best_audio_url_calls.load(Ordering::SeqCst), 2);
}

/// With a nonzero grace period, a fresh enqueue that arrives while the
/// scheduler is waiting after exhaustion must be picked up rather than the
/// player disconnecting — `re_enqueued` wakes the scheduler immediately
/// instead of waiting out the full grace window.
#[tokio::test]
async fn enqueue_during_grace_period_is_picked_up_instead_of_disconnecting() {
    let extractor = Arc::new(DoomedExtractor::new());
    let (player, voice, _dir) = make_player(Arc::clone(&extractor), 30).await;

    player
        .enqueue("first doomed track", UserId::from("listener".to_string()))
        .await
        .unwrap();

    // Wait for the first track to fail twice and the scheduler to fall
    // into its grace-period wait (phase goes Idle, not yet disconnected).
    let reached_idle = wait_until(Duration::from_secs(10), || {
        player.phase() == PlayerPhase::Idle
    })
    .await;
    assert!(reached_idle, "scheduler never reached the idle grace wait");
    assert!(!voice.is_disconnected());

    // A second enqueue during the grace window should wake the scheduler
    // rather than requiring it to time out.
    player
        .enqueue("second doomed track", UserId::from("listener".to_string()))
        .await
        .unwrap();

    let disconnected = wait_until(Duration::from_secs(10), || voice.is_disconnected()).await;
    assert!(
        disconnected,
        "scheduler should still disconnect once the second track also fails"
    );
    // Four best_audio_url calls total: two attempts per doomed track.
    assert_eq!(extractor.best_audio_url_calls.load(Ordering::SeqCst), 4);
}
