//! The external voice transport seam.
//!
//! The core never implements a chat-platform voice connection itself; it
//! only defines the trait the command layer's transport must satisfy, the
//! same way the Sonos control surface was abstracted behind a trait for
//! dependency injection and testability.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Errors a voice transport implementation may report back to the pump.
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("voice connection closed")]
    Closed,
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Obtained from the command layer as an opaque handle: a send channel for
/// compressed audio frames, a "set speaking state" method, and a
/// context-aware disconnect. Consumes one frame per 20 ms.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    /// Sends one compressed audio frame. Pacing is the transport's
    /// responsibility — the pump does not sleep between frames.
    async fn send_frame(&self, frame: Bytes) -> Result<(), VoiceError>;

    /// Sets the speaking indicator shown to other participants.
    async fn set_speaking(&self, speaking: bool) -> Result<(), VoiceError>;

    /// Tears down the voice connection.
    async fn disconnect(&self) -> Result<(), VoiceError>;
}

/// A no-op transport that records everything sent through it. Used by tests
/// and by the demo binary in place of a real chat-platform connection.
#[derive(Default)]
pub struct RecordingVoiceTransport {
    frames: parking_lot::Mutex<Vec<Bytes>>,
    speaking_log: parking_lot::Mutex<Vec<bool>>,
    disconnected: std::sync::atomic::AtomicBool,
}

impl RecordingVoiceTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(std::sync::atomic::Ordering::SeqCst)
    }

    #[must_use]
    pub fn speaking_log(&self) -> Vec<bool> {
        self.speaking_log.lock().clone()
    }
}

#[async_trait]
impl VoiceTransport for RecordingVoiceTransport {
    async fn send_frame(&self, frame: Bytes) -> Result<(), VoiceError> {
        self.frames.lock().push(frame);
        Ok(())
    }

    async fn set_speaking(&self, speaking: bool) -> Result<(), VoiceError> {
        self.speaking_log.lock().push(speaking);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), VoiceError> {
        self.disconnected
            .store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_transport_tracks_frames_and_disconnect() {
        let transport = RecordingVoiceTransport::new();
        transport
            .send_frame(Bytes::from_static(b"frame"))
            .await
            .unwrap();
        transport.set_speaking(true).await.unwrap();
        transport.disconnect().await.unwrap();

        assert_eq!(transport.frame_count(), 1);
        assert_eq!(transport.speaking_log(), vec![true]);
        assert!(transport.is_disconnected());
    }
}
