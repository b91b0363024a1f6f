//! Read-only state published for the display layer.
//!
//! The core writes through a [`StatusPublisher`]; displays hold a
//! `watch::Receiver<Status>` and can never write back.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::sample::Sample;
use crate::upload::{UploadResult, UploadState};

/// Upload phase shown to the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum UploadStatus {
    /// Nothing to show.
    #[default]
    Neutral,
    /// An upload is in progress.
    Uploading,
    /// The last upload succeeded.
    Success {
        /// Where the audio was stored.
        url: String,
    },
    /// The last upload failed.
    Failed {
        /// Why it failed.
        error: String,
    },
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Neutral => Ok(()),
            Self::Uploading => write!(f, "Uploading..."),
            Self::Success { .. } => write!(f, "Success"),
            Self::Failed { .. } => write!(f, "Failed"),
        }
    }
}

/// Diagnostic counters for the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    /// Crash events accepted for capture.
    pub crashes_detected: u64,
    /// Crash events dropped because a capture was in flight.
    pub coalesced_events: u64,
    /// Evidence successfully stored.
    pub evidence_uploaded: u64,
    /// Evidence that failed to store.
    pub uploads_failed: u64,
}

/// Everything the display layer can render.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Status {
    /// Latest acceleration reading.
    pub acceleration: Option<Sample>,
    /// Latest gravity reading.
    pub gravity: Option<Sample>,
    /// Alarm message for the most recent crash.
    pub alarm: Option<String>,
    /// Current upload phase.
    pub upload: UploadStatus,
    /// Whether rolling audio capture is running.
    pub recording: bool,
    /// Why audio capture is not running, if it failed.
    pub capture_error: Option<String>,
    /// Session counters.
    pub counters: Counters,
    #[serde(skip)]
    upload_ticket: u64,
}

/// Write side of the status channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct StatusPublisher {
    tx: Arc<watch::Sender<Status>>,
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusPublisher {
    /// Create a publisher with a neutral status.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Status::default());
        Self { tx: Arc::new(tx) }
    }

    /// A read-only view for the display layer.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.tx.subscribe()
    }

    /// A copy of the current status.
    #[must_use]
    pub fn snapshot(&self) -> Status {
        self.tx.borrow().clone()
    }

    /// Publish the latest acceleration reading.
    pub fn publish_acceleration(&self, sample: Sample) {
        self.tx.send_modify(|s| s.acceleration = Some(sample));
    }

    /// Publish the latest gravity reading.
    pub fn publish_gravity(&self, sample: Sample) {
        self.tx.send_modify(|s| s.gravity = Some(sample));
    }

    /// Count an accepted crash.
    pub fn record_crash(&self) {
        self.tx.send_modify(|s| s.counters.crashes_detected += 1);
    }

    /// Count a crash dropped while another capture was in flight.
    pub fn record_coalesced(&self) {
        self.tx.send_modify(|s| s.counters.coalesced_events += 1);
    }

    /// Show the crash alarm.
    pub fn raise_alarm(&self, message: impl Into<String>) {
        let message = message.into();
        self.tx.send_modify(|s| s.alarm = Some(message));
    }

    /// Publish whether audio capture is running, and why not.
    pub fn set_recording(&self, recording: bool, error: Option<String>) {
        self.tx.send_if_modified(|s| {
            if s.recording == recording && s.capture_error == error {
                return false;
            }
            s.recording = recording;
            s.capture_error = error;
            true
        });
    }

    /// Show the phase or outcome of an upload.
    ///
    /// Returns a ticket for [`clear_upload`](Self::clear_upload).
    pub fn publish_upload(&self, result: &UploadResult) -> u64 {
        let mut ticket = 0;
        self.tx.send_modify(|s| {
            match result.state {
                UploadState::Success => {
                    s.counters.evidence_uploaded += 1;
                    s.upload = UploadStatus::Success {
                        url: result.remote_url.clone().unwrap_or_default(),
                    };
                }
                UploadState::Failed => {
                    s.counters.uploads_failed += 1;
                    s.upload = UploadStatus::Failed {
                        error: result.error.clone().unwrap_or_default(),
                    };
                }
                UploadState::Pending => s.upload = UploadStatus::Uploading,
            }
            s.upload_ticket += 1;
            ticket = s.upload_ticket;
        });
        ticket
    }

    /// Revert the upload phase to neutral unless something newer replaced it.
    ///
    /// Returns `true` if the status was cleared.
    pub fn clear_upload(&self, ticket: u64) -> bool {
        self.tx.send_if_modified(|s| {
            if s.upload_ticket != ticket || s.upload == UploadStatus::Neutral {
                return false;
            }
            s.upload = UploadStatus::Neutral;
            true
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_status_text() {
        assert_eq!(UploadStatus::Neutral.to_string(), "");
        assert_eq!(UploadStatus::Uploading.to_string(), "Uploading...");
        assert_eq!(
            UploadStatus::Success { url: "u".into() }.to_string(),
            "Success"
        );
        assert_eq!(
            UploadStatus::Failed { error: "e".into() }.to_string(),
            "Failed"
        );
    }

    #[test]
    fn test_readings_are_published() {
        let publisher = StatusPublisher::new();
        let rx = publisher.subscribe();

        publisher.publish_acceleration(Sample::new(1.0, 2.0, 3.0, 0.1));
        publisher.publish_gravity(Sample::new(0.0, 9.81, 0.0, 0.1));

        let status = rx.borrow().clone();
        assert_eq!(status.acceleration, Some(Sample::new(1.0, 2.0, 3.0, 0.1)));
        assert!(status.gravity.is_some());
    }

    #[test]
    fn test_success_then_clear() {
        let publisher = StatusPublisher::new();
        publisher.publish_upload(&UploadResult::pending());
        assert_eq!(publisher.snapshot().upload, UploadStatus::Uploading);

        let ticket = publisher.publish_upload(&UploadResult::success("file:///x"));
        assert_eq!(publisher.snapshot().upload.to_string(), "Success");
        assert_eq!(publisher.snapshot().counters.evidence_uploaded, 1);

        assert!(publisher.clear_upload(ticket));
        assert_eq!(publisher.snapshot().upload, UploadStatus::Neutral);
        assert!(!publisher.clear_upload(ticket));
    }

    #[test]
    fn test_stale_clear_is_ignored() {
        let publisher = StatusPublisher::new();
        publisher.publish_upload(&UploadResult::pending());
        let first = publisher.publish_upload(&UploadResult::failed("boom"));
        assert_eq!(publisher.snapshot().counters.uploads_failed, 1);

        publisher.publish_upload(&UploadResult::pending());
        assert!(!publisher.clear_upload(first));
        assert_eq!(publisher.snapshot().upload, UploadStatus::Uploading);
    }

    #[test]
    fn test_counters_and_alarm() {
        let publisher = StatusPublisher::new();
        publisher.record_crash();
        publisher.record_coalesced();
        publisher.record_coalesced();
        publisher.raise_alarm("Crash detected");

        let status = publisher.snapshot();
        assert_eq!(status.counters.crashes_detected, 1);
        assert_eq!(status.counters.coalesced_events, 2);
        assert_eq!(status.alarm.as_deref(), Some("Crash detected"));
    }

    #[test]
    fn test_set_recording_only_notifies_on_change() {
        let publisher = StatusPublisher::new();
        let mut rx = publisher.subscribe();
        rx.mark_unchanged();

        publisher.set_recording(false, None);
        assert!(!rx.has_changed().unwrap());

        publisher.set_recording(true, None);
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().recording);
    }

    #[test]
    fn test_status_serializes_for_display() {
        let publisher = StatusPublisher::new();
        publisher.publish_upload(&UploadResult::pending());
        let json = serde_json::to_value(publisher.snapshot()).unwrap();
        assert_eq!(json["upload"]["phase"], "uploading");
        assert!(json.get("upload_ticket").is_none());
    }
}
