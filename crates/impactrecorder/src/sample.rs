//! Motion sensor samples and the sources that produce them.
//!
//! A [`SampleSource`] pushes readings into a channel for as long as the
//! [`Subscription`] it returns is alive. Dropping the subscription detaches the
//! listener, so tearing down the pipeline always releases its sensors.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::detector::Axis;
use crate::error::{Error, Result};

/// One 3-axis reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// X component.
    pub x: f64,
    /// Y component.
    pub y: f64,
    /// Z component.
    pub z: f64,
    /// Seconds since the sensor session started.
    pub timestamp: f64,
}

impl Sample {
    /// Create a sample.
    #[must_use]
    pub fn new(x: f64, y: f64, z: f64, timestamp: f64) -> Self {
        Self { x, y, z, timestamp }
    }

    /// The component along `axis`.
    #[must_use]
    pub fn axis(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }
}

/// What a sensor measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// Linear acceleration, fed to the crash detector.
    Acceleration,
    /// Gravity vector, displayed only.
    Gravity,
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Acceleration => write!(f, "acceleration"),
            Self::Gravity => write!(f, "gravity"),
        }
    }
}

/// An active listener on a sample source.
///
/// The listener is detached when the subscription is dropped.
#[derive(Debug)]
pub struct Subscription {
    name: &'static str,
    active: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Wrap a running feeder.
    ///
    /// `active` is cleared on drop; `task`, if given, is aborted.
    #[must_use]
    pub fn new(name: &'static str, active: Arc<AtomicBool>, task: Option<JoinHandle<()>>) -> Self {
        Self { name, active, task }
    }

    /// Name of the source this subscription belongs to.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the listener is still attached.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Detach the listener now.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        debug!(source = self.name, "unsubscribed");
    }
}

/// A stream of motion samples.
pub trait SampleSource: Send {
    /// The name of this source (for logging/debugging).
    fn name(&self) -> &'static str;

    /// What this source measures.
    fn kind(&self) -> SensorKind;

    /// Start delivering samples through `tx`, in arrival order.
    ///
    /// The channel is closed when the source has no more samples.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SensorUnavailable`] if the sensor can't be used.
    fn subscribe(&mut self, tx: mpsc::Sender<Sample>) -> Result<Subscription>;
}

/// One line of a recorded sensor log.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    /// Which sensor produced the reading.
    pub kind: SensorKind,
    /// The reading itself.
    #[serde(flatten)]
    pub sample: Sample,
}

/// Replays a recorded sensor log.
///
/// Logs are JSON lines of [`SampleRecord`]. Blank lines and lines starting with
/// `#` are skipped.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    kind: SensorKind,
    samples: Vec<Sample>,
    realtime: bool,
}

impl ReplaySource {
    /// Replay the given samples as fast as the consumer accepts them.
    #[must_use]
    pub fn new(kind: SensorKind, samples: Vec<Sample>) -> Self {
        Self {
            kind,
            samples,
            realtime: false,
        }
    }

    /// Pace delivery by the gaps between sample timestamps.
    #[must_use]
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Load the readings of one `kind` from a log file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SensorUnavailable`] if the file can't be read or a line
    /// doesn't parse.
    pub fn load(path: &Path, kind: SensorKind) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::sensor_unavailable("replay", format!("{}: {e}", path.display()))
        })?;
        let samples = Self::parse(&text, kind)
            .map_err(|e| Error::sensor_unavailable("replay", format!("{}:{e}", path.display())))?;

        info!(
            path = %path.display(),
            %kind,
            count = samples.len(),
            "loaded sensor log"
        );
        Ok(Self::new(kind, samples))
    }

    /// Parse log text, keeping readings of `kind`.
    ///
    /// The error string names the offending line.
    fn parse(text: &str, kind: SensorKind) -> std::result::Result<Vec<Sample>, String> {
        let mut samples = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let record: SampleRecord =
                serde_json::from_str(line).map_err(|e| format!("{}: {e}", index + 1))?;
            if record.kind == kind {
                samples.push(record.sample);
            }
        }
        Ok(samples)
    }

    /// Number of samples to replay.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether there is nothing to replay.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl SampleSource for ReplaySource {
    fn name(&self) -> &'static str {
        match self.kind {
            SensorKind::Acceleration => "replay-acceleration",
            SensorKind::Gravity => "replay-gravity",
        }
    }

    fn kind(&self) -> SensorKind {
        self.kind
    }

    fn subscribe(&mut self, tx: mpsc::Sender<Sample>) -> Result<Subscription> {
        let active = Arc::new(AtomicBool::new(true));
        let samples = std::mem::take(&mut self.samples);
        let realtime = self.realtime;
        let flag = Arc::clone(&active);

        let task = tokio::spawn(async move {
            let mut previous: Option<f64> = None;
            for sample in samples {
                if !flag.load(Ordering::SeqCst) {
                    break;
                }
                if realtime {
                    if let Some(prev) = previous {
                        tokio::time::sleep(replay_gap(prev, sample.timestamp)).await;
                    }
                    previous = Some(sample.timestamp);
                }
                if tx.send(sample).await.is_err() {
                    break;
                }
            }
            flag.store(false, Ordering::SeqCst);
        });

        debug!(source = self.name(), realtime, "subscribed");
        Ok(Subscription::new(self.name(), active, Some(task)))
    }
}

/// Delay between two recorded timestamps. Unusable gaps are not waited on.
fn replay_gap(previous: f64, next: f64) -> Duration {
    let gap = (next - previous).max(0.0);
    Duration::try_from_secs_f64(gap).unwrap_or_else(|e| {
        warn!(previous, next, error = %e, "skipping unusable timestamp gap");
        Duration::ZERO
    })
}
