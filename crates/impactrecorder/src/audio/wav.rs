//! File-backed capture devices.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{AudioCapture, AudioChunk};
use crate::error::{Error, Result};

/// Decoded PCM16 audio.
#[derive(Debug)]
struct PcmClip {
    sample_rate: u32,
    channels: u16,
    samples: Vec<i16>,
}

impl PcmClip {
    fn read(path: &Path) -> Result<Self> {
        let unavailable = |e: hound::Error| {
            Error::capture_unavailable(WavFileCapture::NAME, format!("{}: {e}", path.display()))
        };

        let reader = hound::WavReader::open(path).map_err(unavailable)?;
        let spec = reader.spec();

        let samples: Vec<i16> = match spec.sample_format {
            hound::SampleFormat::Int => {
                let bits = spec.bits_per_sample;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| to_pcm16(v, bits)))
                    .collect::<std::result::Result<_, _>>()
                    .map_err(unavailable)?
            }
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .map(|s| s.map(float_to_pcm16))
                .collect::<std::result::Result<_, _>>()
                .map_err(unavailable)?,
        };

        if samples.is_empty() {
            return Err(Error::capture_unavailable(
                WavFileCapture::NAME,
                format!("{}: no audio frames", path.display()),
            ));
        }

        Ok(Self {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Interleaved samples covering `duration`.
    fn samples_per_chunk(&self, duration: Duration) -> usize {
        let per_second = u128::from(self.sample_rate) * u128::from(self.channels);
        let n = per_second * duration.as_millis() / 1000;
        usize::try_from(n).unwrap_or(usize::MAX).max(1)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn to_pcm16(value: i32, bits: u16) -> i16 {
    if bits > 16 {
        (value >> (bits - 16)) as i16
    } else {
        (value << (16 - bits)) as i16
    }
}

#[allow(clippy::cast_possible_truncation)]
fn float_to_pcm16(value: f32) -> i16 {
    (value.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
}

/// Plays a WAV file as if it were a microphone, looping at the end.
///
/// Each chunk is little-endian PCM16 at the file's rate and channel count.
/// The file is decoded on the first [`start`](AudioCapture::start).
#[derive(Debug)]
pub struct WavFileCapture {
    path: PathBuf,
    clip: Option<Arc<PcmClip>>,
    running: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl WavFileCapture {
    const NAME: &'static str = "wav-file";

    /// Create a device for the given file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            clip: None,
            running: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    /// Check if the device is producing chunks.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn clip(&mut self) -> Result<Arc<PcmClip>> {
        if let Some(clip) = &self.clip {
            return Ok(Arc::clone(clip));
        }
        let clip = Arc::new(PcmClip::read(&self.path)?);
        info!(
            path = %self.path.display(),
            rate = clip.sample_rate,
            channels = clip.channels,
            "audio clip loaded"
        );
        self.clip = Some(Arc::clone(&clip));
        Ok(clip)
    }
}

impl AudioCapture for WavFileCapture {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn start(&mut self, chunk_duration: Duration) -> Result<mpsc::Receiver<AudioChunk>> {
        let clip = self.clip()?;
        self.stop();

        let (tx, rx) = mpsc::channel(16);
        let running = Arc::new(AtomicBool::new(true));
        self.running = Arc::clone(&running);

        let per_chunk = clip.samples_per_chunk(chunk_duration);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(chunk_duration);
            // The first tick is immediate; a chunk is only ready one period in.
            ticker.tick().await;

            let mut position = 0usize;
            let mut sequence = 0u64;
            loop {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                let mut bytes = Vec::with_capacity(per_chunk * 2);
                for _ in 0..per_chunk {
                    bytes.extend_from_slice(&clip.samples[position].to_le_bytes());
                    position = (position + 1) % clip.samples.len();
                }

                if tx.send(AudioChunk::new(bytes, sequence)).await.is_err() {
                    break;
                }
                sequence += 1;
            }
            running.store(false, Ordering::SeqCst);
        });

        self.task = Some(task);
        debug!(per_chunk, "wav capture started");
        Ok(rx)
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("wav capture stopped");
        }
    }
}

impl Drop for WavFileCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A capture device that is never available, e.g. when none is configured.
#[derive(Debug, Clone)]
pub struct UnavailableCapture {
    reason: String,
}

impl UnavailableCapture {
    /// Create a device that fails with `reason`.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl AudioCapture for UnavailableCapture {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn start(&mut self, _chunk_duration: Duration) -> Result<mpsc::Receiver<AudioChunk>> {
        Err(Error::capture_unavailable(self.name(), self.reason.clone()))
    }

    fn stop(&mut self) {}
}
