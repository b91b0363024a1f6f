//! `impactrecorder` - Crash detection with rolling audio evidence capture
//!
//! This library watches a stream of motion samples for crash-level
//! acceleration. It keeps a rolling window of recent audio, and on a crash it
//! freezes that window, tags it with the device location, and stores it as
//! evidence.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod audio;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod detector;
pub mod error;
pub mod evidence;
pub mod location;
pub mod logging;
pub mod pipeline;
pub mod sample;
pub mod status;
pub mod storage;
pub mod upload;

#[cfg(test)]
pub(crate) mod test_support;

pub use audio::{AudioCapture, AudioChunk, AudioWindow, RollingAudioBuffer, WavFileCapture};
pub use config::Config;
pub use coordinator::{CaptureCoordinator, CrashOutcome};
pub use detector::{Axis, CrashDetector, CrashEvent, DetectorConfig};
pub use error::{Error, Result};
pub use evidence::{Evidence, EvidenceRecord};
pub use location::{FixedLocation, Location, LocationProvider, NoLocation};
pub use logging::init_logging;
pub use pipeline::{Pipeline, PipelineReport};
pub use sample::{ReplaySource, Sample, SampleSource, SensorKind, Subscription};
pub use status::{Status, StatusPublisher, UploadStatus};
pub use storage::{SqliteBackend, StorageStats};
pub use upload::{EvidenceUploader, StorageBackend, UploadResult, UploadState};
