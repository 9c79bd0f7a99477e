//! Streaming transcoder pipeline.
//!
//! Spawns an `ffmpeg` subprocess that decodes a local file or remote URL to
//! raw PCM, slices the PCM into fixed 20 ms frames, compresses each frame,
//! and offers it on a bounded channel that the frame pump drains. The
//! channel is the single rate-adaptive primitive between the bursty
//! subprocess and the strict 20 ms pump cadence.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use audiopus::coder::Encoder as OpusEncoder;
use audiopus::{Application, Bitrate, Channels, SampleRate};
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::error::EncoderError;

/// Where the Encoder reads its source container from.
#[derive(Debug, Clone)]
pub enum SourceLocator {
    /// A path into the content-addressed cache.
    LocalPath(PathBuf),
    /// A direct, time-bounded media URL. ffmpeg is configured to reconnect
    /// on disconnect for this source kind.
    Url(String),
}

/// Tuning knobs lifted from [`crate::config::EngineConfig`], kept narrow so
/// `Encoder` doesn't need the whole config type.
#[derive(Debug, Clone, Copy)]
pub struct EncoderParams {
    pub sample_rate_hz: u32,
    pub channels: u16,
    pub frame_duration_ms: u32,
    pub channel_capacity: usize,
    pub bitrate_kbps: u32,
}

impl EncoderParams {
    /// Samples per channel in one frame (F = R·0.020 = 960 at the
    /// default 48 kHz / 20 ms).
    #[must_use]
    pub fn frame_samples(&self) -> usize {
        (self.sample_rate_hz as usize * self.frame_duration_ms as usize) / 1000
    }

    /// Bytes of interleaved s16le PCM in one frame (F·K·2).
    #[must_use]
    pub fn frame_bytes(&self) -> usize {
        self.frame_samples() * self.channels as usize * 2
    }
}

/// How long construction waits to see whether ffmpeg exits immediately
/// (bad URL, missing codec) before committing to steady-state operation.
const STARTUP_PROBE_WINDOW: Duration = Duration::from_millis(75);

fn opus_sample_rate(hz: u32) -> Result<SampleRate, EncoderError> {
    match hz {
        8_000 => Ok(SampleRate::Hz8000),
        12_000 => Ok(SampleRate::Hz12000),
        16_000 => Ok(SampleRate::Hz16000),
        24_000 => Ok(SampleRate::Hz24000),
        48_000 => Ok(SampleRate::Hz48000),
        other => Err(EncoderError::Compression(format!(
            "unsupported sample rate {other}"
        ))),
    }
}

fn opus_channels(count: u16) -> Result<Channels, EncoderError> {
    match count {
        1 => Ok(Channels::Mono),
        2 => Ok(Channels::Stereo),
        other => Err(EncoderError::Compression(format!(
            "unsupported channel count {other}"
        ))),
    }
}

/// A lazy, finite sequence of compressed audio frames. Single-producer
/// (the internal worker), single-consumer (the frame pump).
pub struct Encoder {
    frames: Mutex<mpsc::Receiver<Bytes>>,
    cancel: CancellationToken,
    teardown: Mutex<Option<tokio::task::JoinHandle<()>>>,
    volume: Arc<AtomicU8>,
}

impl Encoder {
    /// Spawns the transcoder subprocess and starts the worker/stderr-drain
    /// tasks. Fails if the subprocess cannot be spawned at all, or exits
    /// within [`STARTUP_PROBE_WINDOW`] of starting (its stderr is captured
    /// into the returned error in that case).
    #[instrument(skip(params), fields(sample_rate = params.sample_rate_hz, channels = params.channels))]
    pub async fn new(locator: SourceLocator, params: EncoderParams) -> Result<Self, EncoderError> {
        Self::new_at(locator, params, Duration::ZERO).await
    }

    /// Like [`Self::new`], but starts decoding `start_offset` into the
    /// source (`-ss`, placed before `-i` for fast input seeking). Used by
    /// the scheduler to rebuild the pipeline on a seek command, since
    /// seeking is always a tear-down-and-reconstruct operation.
    #[instrument(skip(params), fields(sample_rate = params.sample_rate_hz, channels = params.channels))]
    pub async fn new_at(
        locator: SourceLocator,
        params: EncoderParams,
        start_offset: Duration,
    ) -> Result<Self, EncoderError> {
        let mut command = Command::new("ffmpeg");
        if matches!(locator, SourceLocator::Url(_)) {
            command.args([
                "-reconnect",
                "1",
                "-reconnect_streamed",
                "1",
                "-reconnect_delay_max",
                "5",
            ]);
        }
        if start_offset > Duration::ZERO {
            command.args(["-ss", &format!("{:.3}", start_offset.as_secs_f64())]);
        }
        let src = match &locator {
            SourceLocator::LocalPath(p) => p.to_string_lossy().to_string(),
            SourceLocator::Url(u) => u.clone(),
        };
        command
            .arg("-i")
            .arg(&src)
            .args([
                "-f",
                "s16le",
                "-ar",
                &params.sample_rate_hz.to_string(),
                "-ac",
                &params.channels.to_string(),
                "-loglevel",
                "error",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| EncoderError::SpawnFailed(e.to_string()))?;

        let mut stderr = child.stderr.take().expect("stderr was piped");
        if let Some(status) = probe_early_exit(&mut child).await {
            let mut captured = String::new();
            let _ = stderr.read_to_string(&mut captured).await;
            return Err(EncoderError::SpawnFailed(format!(
                "ffmpeg exited immediately ({status}): {}",
                captured.trim()
            )));
        }

        let stdout = child.stdout.take().expect("stdout was piped");

        let opus = OpusEncoder::new(
            opus_sample_rate(params.sample_rate_hz)?,
            opus_channels(params.channels)?,
            Application::Audio,
        )
        .map_err(|e| EncoderError::Compression(e.to_string()))?;

        let cancel = CancellationToken::new();
        let volume = Arc::new(AtomicU8::new(100));
        let (tx, rx) = mpsc::channel(params.channel_capacity);

        let stderr_drain = tokio::spawn(drain_stderr(stderr));

        let worker_cancel = cancel.clone();
        let worker_volume = volume.clone();
        let worker = tokio::spawn(run_worker(
            stdout, params, opus, worker_volume, tx, worker_cancel,
        ));

        let teardown = tokio::spawn(async move {
            let _ = worker.await;
            let _ = child.kill().await;
            let _ = child.wait().await;
            stderr_drain.abort();
        });

        Ok(Self {
            frames: Mutex::new(rx),
            cancel,
            teardown: Mutex::new(Some(teardown)),
            volume,
        })
    }

    /// Blocks until the next compressed frame is available, or returns
    /// `None` once the source is exhausted or [`Self::cleanup`] has run.
    pub async fn next_frame(&self) -> Option<Bytes> {
        let mut rx = self.frames.lock().await;
        rx.recv().await
    }

    /// Live volume scalar applied to PCM in the worker, 0-100 (open
    /// question: Encoder multiplies PCM rather than dropping the control).
    pub fn set_volume(&self, percent: u8) {
        self.volume.store(percent.min(100), Ordering::Relaxed);
    }

    /// Current value of the live volume scalar. Mainly useful to tests that
    /// need to confirm a freshly built Encoder started at the right volume
    /// rather than its own default.
    #[must_use]
    pub fn volume_percent(&self) -> u8 {
        self.volume.load(Ordering::Relaxed)
    }

    /// Idempotent; signals the worker to stop, kills the subprocess, waits
    /// for it to exit, and closes the frame channel. Safe to call from any
    /// thread, including while `next_frame` is blocked.
    pub async fn cleanup(&self) {
        self.cancel.cancel();
        let handle = self.teardown.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// Returns `Some(status)` if the child has already exited by the time the
/// probe window elapses; `None` if it's still running (the common case).
async fn probe_early_exit(child: &mut Child) -> Option<std::process::ExitStatus> {
    tokio::select! {
        status = child.wait() => status.ok(),
        () = tokio::time::sleep(STARTUP_PROBE_WINDOW) => None,
    }
}

async fn drain_stderr(stderr: ChildStderr) {
    let mut reader = tokio::io::BufReader::new(stderr);
    let mut line = String::new();
    loop {
        line.clear();
        match tokio::io::AsyncBufReadExt::read_line(&mut reader, &mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {
                let trimmed = line.trim_end();
                if !trimmed.is_empty() {
                    warn!(target: "lyrebird_core::encoder", "ffmpeg: {trimmed}");
                }
            }
        }
    }
}

/// Scales interleaved s16le PCM in place by `percent`/100, clamping to the
/// i16 range. A no-op at 100 (nominal); 0 produces silence.
fn apply_volume(samples: &mut [i16], percent: u8) {
    if percent == 100 {
        return;
    }
    let scale = f32::from(percent) / 100.0;
    for sample in samples {
        *sample = (f32::from(*sample) * scale).clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16;
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_worker(
    mut stdout: ChildStdout,
    params: EncoderParams,
    mut opus: OpusEncoder,
    volume: Arc<AtomicU8>,
    tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
) {
    let frame_bytes = params.frame_bytes();
    let frame_samples = params.frame_samples() * params.channels as usize;
    let _ = opus.set_bitrate(Bitrate::BitsPerSecond(i32::try_from(params.bitrate_kbps * 1000).unwrap_or(i32::MAX)));

    let mut staging = vec![0u8; frame_bytes];
    let mut filled = 0usize;
    let mut compressed = vec![0u8; 4000]; // generous upper bound for one 20ms Opus packet

    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            result = stdout.read(&mut staging[filled..]) => {
                let read = match result {
                    Ok(0) => break, // EOF: treated as normal end-of-stream
                    Ok(n) => n,
                    Err(e) => {
                        warn!(target: "lyrebird_core::encoder", "transcoder read error: {e}");
                        break;
                    }
                };
                filled += read;
                if filled < frame_bytes {
                    continue;
                }
                filled = 0;

                let mut samples: Vec<i16> = staging
                    .chunks_exact(2)
                    .map(|c| i16::from_le_bytes([c[0], c[1]]))
                    .collect();
                debug_assert_eq!(samples.len(), frame_samples);
                apply_volume(&mut samples, volume.load(Ordering::Relaxed));

                match opus.encode(&samples, &mut compressed) {
                    Ok(len) => {
                        let frame = Bytes::copy_from_slice(&compressed[..len]);
                        if tx.send(frame).await.is_err() {
                            // Pump side dropped the Encoder; stop producing.
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(target: "lyrebird_core::encoder", "compression error: {e}");
                        break;
                    }
                }
            }
        }
    }
    // `filled > 0` here means a partial frame remained at EOF; dropped
    // silently failure semantics. Dropping `tx` closes the
    // channel, which unblocks any in-flight `next_frame` with `None`.
}
