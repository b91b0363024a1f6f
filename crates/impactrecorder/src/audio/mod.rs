//! Continuous audio capture into a bounded rolling window.
//!
//! An [`AudioCapture`] device produces fixed-duration [`AudioChunk`]s. The
//! [`RollingAudioBuffer`] keeps only the newest few, and hands out a frozen
//! [`AudioWindow`] when a crash is detected.

mod buffer;
mod wav;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;

pub use buffer::RollingAudioBuffer;
pub use wav::{UnavailableCapture, WavFileCapture};

/// Default number of chunks kept in the window.
pub const DEFAULT_WINDOW_CHUNKS: usize = 10;

/// Default chunk length in milliseconds.
pub const DEFAULT_CHUNK_DURATION_MS: u64 = 1000;

/// One fixed-duration slice of recorded audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    /// Encoded audio (little-endian PCM16 for the bundled devices).
    pub bytes: Vec<u8>,
    /// Position of this chunk within its capture stream.
    pub sequence: u64,
}

impl AudioChunk {
    /// Create a chunk.
    #[must_use]
    pub fn new(bytes: Vec<u8>, sequence: u64) -> Self {
        Self { bytes, sequence }
    }
}

/// An immutable snapshot of the rolling window, oldest chunk first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioWindow {
    chunks: Vec<AudioChunk>,
}

impl AudioWindow {
    /// Build a window from chunks in capture order.
    #[must_use]
    pub fn new(chunks: Vec<AudioChunk>) -> Self {
        Self { chunks }
    }

    /// The chunks, oldest first.
    #[must_use]
    pub fn chunks(&self) -> &[AudioChunk] {
        &self.chunks
    }

    /// Number of chunks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether no audio was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Total audio bytes across all chunks.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.chunks.iter().map(|c| c.bytes.len()).sum()
    }

    /// Concatenate the chunks into one blob.
    #[must_use]
    pub fn into_blob(self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(self.byte_len());
        for chunk in self.chunks {
            blob.extend_from_slice(&chunk.bytes);
        }
        blob
    }
}

/// Recording state of the rolling buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingState {
    /// Not capturing: never started, device unavailable, or stream ended.
    Idle,
    /// Capturing continuously.
    Recording,
    /// Window snapshotted, capture stopped, restart pending.
    Freezing,
    /// Capture being reopened after a freeze.
    Restarting,
}

impl std::fmt::Display for RecordingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Recording => write!(f, "recording"),
            Self::Freezing => write!(f, "freezing"),
            Self::Restarting => write!(f, "restarting"),
        }
    }
}

/// An audio capture device.
///
/// Implementors deliver chunks in capture order through the returned channel
/// until [`AudioCapture::stop`] is called.
pub trait AudioCapture: Send {
    /// The name of this device (for logging/debugging).
    fn name(&self) -> &'static str;

    /// Begin capturing slices of `chunk_duration`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::CaptureUnavailable`] if the device is missing or
    /// access was denied.
    fn start(&mut self, chunk_duration: Duration) -> Result<mpsc::Receiver<AudioChunk>>;

    /// Stop capturing. Chunks not yet delivered are discarded.
    fn stop(&mut self);
}
