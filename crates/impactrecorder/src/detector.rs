//! Threshold-based crash detection.
//!
//! A crash is a single sample whose magnitude on any monitored axis exceeds a
//! fixed threshold. There is no smoothing or hysteresis: each sample is judged
//! on its own, so a sharp but harmless jolt can also trigger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::sample::Sample;

/// Default per-axis threshold, in the sensor's native units.
pub const DEFAULT_THRESHOLD: f64 = 25.0;

/// One axis of a 3-axis reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    /// The x axis.
    X,
    /// The y axis.
    Y,
    /// The z axis.
    Z,
}

impl Axis {
    /// All three axes.
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::X => write!(f, "x"),
            Self::Y => write!(f, "y"),
            Self::Z => write!(f, "z"),
        }
    }
}

/// Detector configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Magnitude an axis must strictly exceed to count as a crash.
    pub threshold: f64,
    /// Axes that are checked.
    pub axes: Vec<Axis>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            axes: Axis::ALL.to_vec(),
        }
    }
}

/// A detected crash. Consumed once by the capture coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrashEvent {
    /// The sample that crossed the threshold.
    pub triggering_sample: Sample,
    /// The first axis found over the threshold.
    pub axis: Axis,
    /// Wall-clock time of detection.
    pub detected_at: DateTime<Utc>,
}

/// Stateless per-sample crash classifier.
#[derive(Debug, Clone)]
pub struct CrashDetector {
    config: DetectorConfig,
}

impl CrashDetector {
    /// Create a detector with the given configuration.
    #[must_use]
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Classify one sample.
    ///
    /// Returns a [`CrashEvent`] iff `|sample[axis]| > threshold` for at least one
    /// monitored axis.
    #[must_use]
    pub fn evaluate(&self, sample: &Sample) -> Option<CrashEvent> {
        let axis = self
            .config
            .axes
            .iter()
            .copied()
            .find(|&axis| sample.axis(axis).abs() > self.config.threshold)?;

        trace!(%axis, value = sample.axis(axis), "threshold exceeded");
        Some(CrashEvent {
            triggering_sample: *sample,
            axis,
            detected_at: Utc::now(),
        })
    }
}

impl Default for CrashDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}
