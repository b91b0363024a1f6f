use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::{AudioCapture, AudioChunk, AudioWindow, RecordingState};
use crate::error::Result;

/// Keeps the most recent `capacity` chunks of continuously captured audio.
///
/// The buffer owns its capture device and the receiving end of the device's
/// chunk stream. Callers drive it by awaiting [`next_chunk`](Self::next_chunk)
/// and feeding the result to [`on_chunk`](Self::on_chunk).
pub struct RollingAudioBuffer {
    capture: Box<dyn AudioCapture>,
    capacity: usize,
    chunk_duration: Duration,
    window: VecDeque<AudioChunk>,
    chunks: Option<mpsc::Receiver<AudioChunk>>,
    state: RecordingState,
    last_error: Option<String>,
}

impl std::fmt::Debug for RollingAudioBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollingAudioBuffer")
            .field("capture", &self.capture.name())
            .field("capacity", &self.capacity)
            .field("chunk_duration", &self.chunk_duration)
            .field("len", &self.window.len())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl RollingAudioBuffer {
    /// Create a stopped buffer. `capacity` is clamped to at least one chunk.
    #[must_use]
    pub fn new(capture: Box<dyn AudioCapture>, capacity: usize, chunk_duration: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capture,
            capacity,
            chunk_duration,
            window: VecDeque::with_capacity(capacity + 1),
            chunks: None,
            state: RecordingState::Idle,
            last_error: None,
        }
    }

    /// Begin continuous capture. A no-op while already recording.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::CaptureUnavailable`] if the device can't be
    /// opened. The buffer then stays empty and idle.
    pub fn start(&mut self) -> Result<()> {
        if self.chunks.is_some() {
            trace!("capture already running");
            return Ok(());
        }

        match self.capture.start(self.chunk_duration) {
            Ok(rx) => {
                self.chunks = Some(rx);
                self.state = RecordingState::Recording;
                self.last_error = None;
                info!(
                    device = self.capture.name(),
                    chunk_ms = self.chunk_duration.as_millis(),
                    window = self.capacity,
                    "audio capture started"
                );
                Ok(())
            }
            Err(e) => {
                self.state = RecordingState::Idle;
                self.last_error = Some(e.to_string());
                warn!(device = self.capture.name(), error = %e, "audio capture unavailable");
                Err(e)
            }
        }
    }

    /// Append a chunk, evicting the oldest ones beyond capacity.
    ///
    /// Chunks are ignored unless the buffer is recording.
    pub fn on_chunk(&mut self, chunk: AudioChunk) {
        if self.state != RecordingState::Recording {
            trace!(sequence = chunk.sequence, state = %self.state, "dropping chunk");
            return;
        }
        self.append(chunk);
    }

    fn append(&mut self, chunk: AudioChunk) {
        trace!(sequence = chunk.sequence, bytes = chunk.bytes.len(), "chunk");
        self.window.push_back(chunk);
        while self.window.len() > self.capacity {
            self.window.pop_front();
        }
    }

    /// Snapshot the window and stop capture.
    ///
    /// Chunks already delivered by the device are folded in first; nothing the
    /// device produces afterwards can reach the returned window.
    pub fn freeze(&mut self) -> AudioWindow {
        if let Some(mut rx) = self.chunks.take() {
            if self.state == RecordingState::Recording {
                while let Ok(chunk) = rx.try_recv() {
                    self.append(chunk);
                }
            }
            self.capture.stop();
        }
        self.state = RecordingState::Freezing;

        let window = AudioWindow::new(self.window.iter().cloned().collect());
        debug!(chunks = window.len(), bytes = window.byte_len(), "window frozen");
        window
    }

    /// Clear the window and resume capture.
    ///
    /// Must follow every [`freeze`](Self::freeze).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::CaptureUnavailable`] if capture can't resume;
    /// [`is_recording`](Self::is_recording) then reports `false`.
    pub fn restart(&mut self) -> Result<()> {
        self.state = RecordingState::Restarting;
        self.window.clear();
        if self.chunks.take().is_some() {
            self.capture.stop();
        }
        self.start()
    }

    /// Stop capture for good and discard the window.
    pub fn stop(&mut self) {
        if self.chunks.take().is_some() {
            self.capture.stop();
            info!(device = self.capture.name(), "audio capture stopped");
        }
        self.window.clear();
        self.state = RecordingState::Idle;
    }

    /// Wait for the next chunk from the device.
    ///
    /// Never resolves while capture is stopped. Returns `None` once if the
    /// device ends its stream; the buffer is idle from then on.
    pub async fn next_chunk(&mut self) -> Option<AudioChunk> {
        let Some(rx) = self.chunks.as_mut() else {
            return std::future::pending().await;
        };
        let chunk = rx.recv().await;
        if chunk.is_none() {
            warn!(device = self.capture.name(), "audio stream ended");
            self.chunks = None;
            self.state = RecordingState::Idle;
            self.last_error = Some("audio stream ended".to_string());
        }
        chunk
    }

    /// Current recording state.
    #[must_use]
    pub fn state(&self) -> RecordingState {
        self.state
    }

    /// Whether audio is being captured right now.
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.state == RecordingState::Recording
    }

    /// Why capture last failed, if it did.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Number of chunks currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// Whether the window is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Maximum number of chunks held.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockCapture;

    fn buffer(capture: &MockCapture, capacity: usize) -> RollingAudioBuffer {
        RollingAudioBuffer::new(Box::new(capture.clone()), capacity, Duration::from_secs(1))
    }

    fn chunk(sequence: u64) -> AudioChunk {
        AudioChunk::new(vec![u8::try_from(sequence % 256).unwrap(); 4], sequence)
    }

    #[test]
    fn test_start_is_idempotent() {
        let capture = MockCapture::new();
        let mut buf = buffer(&capture, 10);

        buf.start().unwrap();
        buf.start().unwrap();
        assert!(buf.is_recording());
        assert_eq!(capture.starts(), 1);
    }

    #[test]
    fn test_window_keeps_last_n_in_order() {
        let capture = MockCapture::new();
        let mut buf = buffer(&capture, 10);
        buf.start().unwrap();

        for seq in 0..25 {
            buf.on_chunk(chunk(seq));
            assert!(buf.len() <= 10);
        }

        let window = buf.freeze();
        let sequences: Vec<u64> = window.chunks().iter().map(|c| c.sequence).collect();
        assert_eq!(sequences, (15..25).collect::<Vec<_>>());
    }

    #[test]
    fn test_freeze_includes_delivered_chunks_and_stops() {
        let capture = MockCapture::new();
        let mut buf = buffer(&capture, 10);
        buf.start().unwrap();

        buf.on_chunk(chunk(0));
        // Delivered by the device but not yet consumed.
        assert!(capture.push(chunk(1)));
        assert!(capture.push(chunk(2)));

        let window = buf.freeze();
        assert_eq!(window.len(), 3);
        assert_eq!(capture.stops(), 1);
        assert_eq!(buf.state(), RecordingState::Freezing);

        // Anything after the freeze is excluded.
        assert!(!capture.push(chunk(3)));
        buf.on_chunk(chunk(4));
        assert_eq!(buf.freeze().len(), 3);
    }

    #[test]
    fn test_freeze_returns_copy() {
        let capture = MockCapture::new();
        let mut buf = buffer(&capture, 3);
        buf.start().unwrap();
        buf.on_chunk(chunk(0));

        let window = buf.freeze();
        buf.restart().unwrap();
        buf.on_chunk(chunk(7));

        assert_eq!(window.chunks()[0].sequence, 0);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_restart_clears_and_resumes() {
        let capture = MockCapture::new();
        let mut buf = buffer(&capture, 10);
        buf.start().unwrap();
        buf.on_chunk(chunk(0));
        buf.freeze();

        buf.restart().unwrap();
        assert!(buf.is_recording());
        assert!(buf.is_empty());
        assert_eq!(capture.starts(), 2);
    }

    #[test]
    fn test_unavailable_capture_degrades() {
        let capture = MockCapture::unavailable();
        let mut buf = buffer(&capture, 10);

        let err = buf.start().unwrap_err();
        assert!(err.is_capture_unavailable());
        assert!(!buf.is_recording());
        assert!(buf.last_error().is_some());

        buf.on_chunk(chunk(0));
        assert!(buf.freeze().is_empty());

        assert!(buf.restart().is_err());
        assert!(buf.freeze().is_empty());
    }

    #[tokio::test]
    async fn test_next_chunk_delivers_device_output() {
        let capture = MockCapture::new();
        let mut buf = buffer(&capture, 10);
        buf.start().unwrap();

        capture.push(chunk(5));
        let got = buf.next_chunk().await.unwrap();
        assert_eq!(got.sequence, 5);
        buf.on_chunk(got);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_stop_discards_and_idles() {
        let capture = MockCapture::new();
        let mut buf = buffer(&capture, 10);
        buf.start().unwrap();
        buf.on_chunk(chunk(0));

        buf.stop();
        assert!(buf.is_empty());
        assert_eq!(buf.state(), RecordingState::Idle);
        assert_eq!(capture.stops(), 1);

        buf.stop();
        assert_eq!(capture.stops(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_end_marks_not_recording() {
        let capture = MockCapture::new();
        let mut buf = buffer(&capture, 10);
        buf.start().unwrap();
        capture.hang_up();

        assert!(buf.next_chunk().await.is_none());
        assert!(!buf.is_recording());
        assert_eq!(buf.state(), RecordingState::Idle);
        assert_eq!(buf.last_error(), Some("audio stream ended"));

        // Reported once; afterwards the stopped buffer stays quiet.
        let waited =
            tokio::time::timeout(Duration::from_secs(1), buf.next_chunk()).await;
        assert!(waited.is_err());
    }
}
