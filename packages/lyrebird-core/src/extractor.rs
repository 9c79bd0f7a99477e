//! The media extractor subprocess contract.
//!
//! Wraps the external metadata/download helper exactly as specified:
//! `extract --dump-json --no-playlist <query>`, `--flat-playlist <url>`,
//! `-f bestaudio -g <url>`, and `-f "bestaudio[ext=webm]/bestaudio" -o <path> <url>`.
//! The core treats this binary as a read-only collaborator; it is not part
//! of this crate and is never re-implemented here.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::error::ExtractorError;

/// One entry in a format list returned by the extractor.
#[derive(Debug, Clone, Deserialize)]
pub struct Format {
    pub format_id: String,
    pub url: String,
    pub ext: String,
    pub acodec: String,
    pub vcodec: String,
    #[serde(default)]
    pub abr: Option<f64>,
}

/// Full metadata for a single track, as returned by `--dump-json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedInfo {
    pub id: String,
    pub title: String,
    pub duration: Option<f64>,
    pub thumbnail: Option<String>,
    pub uploader: Option<String>,
    pub webpage_url: String,
    #[serde(default)]
    pub is_live: bool,
    #[serde(default)]
    pub formats: Vec<Format>,
}

/// One entry of a flat (ids-only) playlist listing.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistEntry {
    pub id: String,
    pub title: String,
    pub webpage_url: String,
    #[serde(default)]
    pub duration: Option<f64>,
}

/// Selects the best playable audio format from a format list:
/// among formats with a non-"none" `acodec` and a non-empty URL, prefer
/// audio-only (`vcodec == "none"`) with the highest `abr`; if none is
/// audio-only, fall back to any format with audio.
#[must_use]
pub fn pick_best_audio_format(formats: &[Format]) -> Option<&Format> {
    let playable = formats
        .iter()
        .filter(|f| f.acodec != "none" && !f.url.is_empty());

    let mut best_audio_only: Option<&Format> = None;
    let mut fallback: Option<&Format> = None;

    for format in playable {
        if format.vcodec == "none" {
            let better = match best_audio_only {
                Some(current) => format.abr.unwrap_or(0.0) > current.abr.unwrap_or(0.0),
                None => true,
            };
            if better {
                best_audio_only = Some(format);
            }
        } else if fallback.is_none() {
            fallback = Some(format);
        }
    }

    best_audio_only.or(fallback)
}

/// The external media extractor contract.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// `extract --dump-json --no-playlist <query-or-url>`.
    async fn info(&self, query: &str, timeout: Duration) -> Result<ExtractedInfo, ExtractorError>;

    /// `extract --dump-json --flat-playlist <url>`.
    async fn flat_playlist(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<Vec<PlaylistEntry>, ExtractorError>;

    /// `extract -f bestaudio -g <url>` — a single direct URL on stdout.
    async fn best_audio_url(&self, url: &str, timeout: Duration)
        -> Result<String, ExtractorError>;

    /// `extract -f "bestaudio[ext=webm]/bestaudio" -o <path> <url>`.
    async fn download(
        &self,
        url: &str,
        dest: &Path,
        timeout: Duration,
    ) -> Result<(), ExtractorError>;
}

/// Shells out to the real extractor binary.
pub struct ProcessExtractor {
    binary: PathBuf,
}

impl ProcessExtractor {
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, args: &[&str], timeout: Duration) -> Result<Vec<u8>, ExtractorError> {
        let mut command = Command::new(&self.binary);
        command.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());

        let child = command
            .spawn()
            .map_err(|e| ExtractorError::Spawn(e.to_string()))?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ExtractorError::Process("timed out".into()))?
            .map_err(|e| ExtractorError::Process(e.to_string()))?;

        if !output.status.success() {
            return Err(ExtractorError::Process(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl Extractor for ProcessExtractor {
    async fn info(&self, query: &str, timeout: Duration) -> Result<ExtractedInfo, ExtractorError> {
        let stdout = self
            .run(&["--dump-json", "--no-playlist", query], timeout)
            .await?;
        serde_json::from_slice(&stdout).map_err(|e| ExtractorError::Parse(e.to_string()))
    }

    async fn flat_playlist(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<Vec<PlaylistEntry>, ExtractorError> {
        let stdout = self
            .run(&["--dump-json", "--flat-playlist", url], timeout)
            .await?;
        let text = String::from_utf8_lossy(&stdout);
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(|e| ExtractorError::Parse(e.to_string())))
            .collect()
    }

    async fn best_audio_url(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<String, ExtractorError> {
        let stdout = self.run(&["-f", "bestaudio", "-g", url], timeout).await?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }

    async fn download(
        &self,
        url: &str,
        dest: &Path,
        timeout: Duration,
    ) -> Result<(), ExtractorError> {
        let dest = dest.to_string_lossy().to_string();
        self.run(
            &["-f", "bestaudio[ext=webm]/bestaudio", "-o", &dest, url],
            timeout,
        )
        .await?;
        Ok(())
    }
}
