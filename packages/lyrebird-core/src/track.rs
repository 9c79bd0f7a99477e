//! Track descriptor and related types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// Where a track's metadata/media originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackSource {
    /// Resolved via the cross-catalog client then matched on the media catalog.
    PlatformA,
    /// Resolved directly on the media catalog (search or URL).
    PlatformB,
    /// A direct media URL with no catalog metadata.
    Direct,
}

/// Converts a floating point seconds value from the extractor into a
/// `Duration`, truncating (never rounding) sub-millisecond precision.
#[must_use]
pub fn duration_from_extractor_secs(secs: f64) -> Duration {
    let millis = (secs.max(0.0) * 1000.0).floor() as u64;
    Duration::from_millis(millis)
}

/// An immutable track descriptor.
///
/// Constructed by the [`crate::resolver::Resolver`] and consumed by the
/// [`crate::player::scheduler::Scheduler`]/[`crate::encoder::Encoder`].
/// `stream_url` and `local_path` are the only fields mutated after
/// construction, and only by the scheduler/encoder caching the result of a
/// lookup or download — the rest is read-only for the lifetime of the track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    /// Source-specific identifier string.
    pub id: String,
    pub title: String,
    pub artist: Option<String>,
    pub thumbnail: Option<String>,
    /// Non-negative; zero permitted for unknown; ignored when `is_live`.
    pub duration: Duration,
    pub source: TrackSource,
    /// User-facing URL of the track on its source.
    pub canonical_url: String,
    /// Direct media URL valid for a time-bounded window. Populated by the
    /// Resolver when cheap, by the Encoder otherwise.
    pub stream_url: Option<String>,
    /// Path into the cache once a full copy exists.
    pub local_path: Option<String>,
    /// If true, `duration` and seeking are invalid.
    pub is_live: bool,
    /// Opaque user id for attribution, set by the caller after the Resolver
    /// returns the track.
    pub requested_by: Option<UserId>,
}

impl Track {
    /// Returns whether this track currently has any means of playback
    /// (a prefetched stream URL, a cached local copy, or neither — in which
    /// case the Encoder must resolve one on demand).
    #[must_use]
    pub fn has_playable_locator(&self) -> bool {
        self.stream_url.is_some() || self.local_path.is_some()
    }
}
