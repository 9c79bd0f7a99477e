//! Demo harness configuration.
//!
//! Supports loading from a TOML file with environment variable overrides,
//! the same two-stage pattern the engine's own config loading follows.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lyrebird_core::EngineConfig;
use serde::Deserialize;

/// Harness-level settings layered on top of [`EngineConfig`]: where the
/// extractor binary lives, and how to spend the extra process-wide knobs
/// the core itself has no opinion about (here, just the bind-free defaults
/// needed to run a demo player loop over stdin).
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Path to the media extractor binary.
    /// Override: `LYREBIRD_EXTRACTOR_BIN`
    pub extractor_bin: PathBuf,

    /// The engine's own process-wide tunables, loaded from the same file.
    #[serde(flatten)]
    pub engine: EngineConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            extractor_bin: PathBuf::from("yt-dlp"),
            engine: EngineConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Loads configuration from a TOML file, then applies environment
    /// overrides. `path = None` starts from defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("LYREBIRD_EXTRACTOR_BIN") {
            self.extractor_bin = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("LYREBIRD_CACHE_DIR") {
            self.engine.cache_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("LYREBIRD_CACHE_LIMIT") {
            if let Ok(bytes) = lyrebird_core::config::parse_byte_size(&val) {
                self.engine.cache_limit_bytes = bytes;
            }
        }
        if let Ok(val) = std::env::var("LYREBIRD_DEFAULT_VOLUME") {
            if let Ok(volume) = val.parse() {
                self.engine.default_volume = volume;
            }
        }
    }
}
