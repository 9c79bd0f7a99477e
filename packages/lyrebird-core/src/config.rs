//! Process-wide engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Every process-wide tunable the engine exposes, plus encoder/resolver
/// tuning pulled in alongside them. Loading from a file or environment is
/// the caller's responsibility (see `apps/lyrebird-cli/src/config.rs`);
/// this type is just the validated, in-memory result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root directory for the content-addressed cache.
    pub cache_dir: PathBuf,
    /// Maximum total bytes the cache may occupy.
    pub cache_limit_bytes: u64,

    /// Default player volume (0-100) for newly created guild players.
    pub default_volume: u8,
    /// Whether to duck playback volume when other speakers are active in
    /// the same voice channel.
    pub reduce_on_voice: bool,
    /// Target volume (0-100) while ducked.
    pub reduce_on_voice_target: u8,

    /// Grace period after the queue empties before disconnecting. Zero
    /// means disconnect immediately.
    pub wait_after_queue_empty_seconds: u64,

    /// PCM sample rate fed to/read from the transcoder.
    pub sample_rate_hz: u32,
    /// PCM channel count.
    pub channels: u16,
    /// Duration of one compressed frame, in milliseconds.
    pub frame_duration_ms: u32,
    /// Capacity of the Encoder's bounded frame channel.
    pub frame_channel_capacity: usize,
    /// Target bitrate for the compressed audio encoder.
    pub bitrate_kbps: u32,

    /// Timeout for a single-result search.
    pub search_timeout: Duration,
    /// Timeout for a flat playlist listing.
    pub playlist_timeout: Duration,
    /// Timeout for a full container download.
    pub download_timeout: Duration,
    /// Timeout for a single playlist-item stream-URL prefetch.
    pub prefetch_timeout: Duration,
    /// Number of leading playlist tracks to prefetch stream URLs for.
    pub playlist_prefetch_count: usize,

    /// Opaque pass-through for the external command layer; the core never
    /// reads this field.
    pub register_commands_globally: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./cache"),
            cache_limit_bytes: 2 * 1024 * 1024 * 1024,
            default_volume: 100,
            reduce_on_voice: false,
            reduce_on_voice_target: 30,
            wait_after_queue_empty_seconds: 0,
            sample_rate_hz: 48_000,
            channels: 2,
            frame_duration_ms: 20,
            frame_channel_capacity: 300,
            bitrate_kbps: 128,
            search_timeout: Duration::from_secs(30),
            playlist_timeout: Duration::from_secs(60),
            download_timeout: Duration::from_secs(300),
            prefetch_timeout: Duration::from_secs(10),
            playlist_prefetch_count: 3,
            register_commands_globally: false,
        }
    }
}

/// Error parsing a human-written byte quantity like `"2GB"`.
#[derive(Debug, thiserror::Error)]
#[error("invalid byte size {0:?}: expected a number optionally suffixed with KB/MB/GB")]
pub struct ByteSizeParseError(String);

/// Parses a cache-limit string such as `"512MB"` or `"2GB"` into bytes.
/// A bare number (no suffix) is interpreted as raw bytes.
pub fn parse_byte_size(input: &str) -> Result<u64, ByteSizeParseError> {
    let trimmed = input.trim();
    let upper = trimmed.to_ascii_uppercase();

    let (digits, multiplier) = if let Some(n) = upper.strip_suffix("GB") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix("MB") {
        (n, 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix("KB") {
        (n, 1024)
    } else {
        (upper.as_str(), 1)
    };

    digits
        .trim()
        .parse::<u64>()
        .map(|n| n * multiplier)
        .map_err(|_| ByteSizeParseError(input.to_string()))
}

impl EngineConfig {
    /// Validates cross-field invariants not expressible via `serde` alone.
    pub fn validate(&self) -> Result<(), crate::error::EngineError> {
        if self.default_volume > 100 {
            return Err(crate::error::EngineError::User(
                "default_volume must be 0-100".into(),
            ));
        }
        if self.reduce_on_voice_target > 100 {
            return Err(crate::error::EngineError::User(
                "reduce_on_voice_target must be 0-100".into(),
            ));
        }
        if self.channels == 0 {
            return Err(crate::error::EngineError::User(
                "channels must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn parse_byte_size_handles_suffixes() {
        assert_eq!(parse_byte_size("2GB").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_byte_size("512MB").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_byte_size("10KB").unwrap(), 10 * 1024);
        assert_eq!(parse_byte_size("1024").unwrap(), 1024);
    }

    #[test]
    fn parse_byte_size_rejects_garbage() {
        assert!(parse_byte_size("not-a-size").is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_volume() {
        let mut config = EngineConfig::default();
        config.default_volume = 150;
        assert!(config.validate().is_err());
    }
}
