//! Crash capture coordination.
//!
//! On an accepted crash the coordinator freezes the rolling audio window,
//! restarts capture at once, and hands the evidence to the uploader once the
//! location lookup settles. Only one capture may be in flight: crashes that
//! arrive meanwhile are dropped, not queued.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::audio::{AudioChunk, RollingAudioBuffer};
use crate::detector::CrashEvent;
use crate::evidence::Evidence;
use crate::location::{resolve_location, Location, LocationProvider};
use crate::status::StatusPublisher;
use crate::upload::{EvidenceUploader, UploadResult};

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    /// Ready to accept a crash.
    Idle,
    /// A capture is in flight, from freeze until upload hand-off.
    Capturing,
}

/// What happened to a crash event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashOutcome {
    /// Capture started for this event.
    Accepted {
        /// Number of the evidence being built.
        evidence_id: u64,
    },
    /// Dropped because another capture was in flight.
    Coalesced,
}

/// Internal progress the coordinator must react to.
#[derive(Debug)]
pub enum CoordinatorEvent {
    /// The audio device delivered a chunk.
    Chunk(AudioChunk),
    /// Evidence was handed to the uploader.
    HandedOff(u64),
    /// The audio device ended its stream; monitoring has a gap.
    CaptureLost,
}

/// Owns the rolling buffer and drives the freeze/restart/hand-off cycle.
pub struct CaptureCoordinator {
    buffer: RollingAudioBuffer,
    location: Arc<dyn LocationProvider>,
    uploader: Arc<EvidenceUploader>,
    status: StatusPublisher,
    location_timeout: Duration,
    state: CaptureState,
    next_id: u64,
    handoff_tx: mpsc::UnboundedSender<u64>,
    handoff_rx: mpsc::UnboundedReceiver<u64>,
    captures: JoinSet<UploadResult>,
    completed: Vec<UploadResult>,
}

impl std::fmt::Debug for CaptureCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureCoordinator")
            .field("buffer", &self.buffer)
            .field("location", &self.location.name())
            .field("location_timeout", &self.location_timeout)
            .field("state", &self.state)
            .field("next_id", &self.next_id)
            .field("completed", &self.completed.len())
            .finish_non_exhaustive()
    }
}

impl CaptureCoordinator {
    /// Create an idle coordinator. Capture is not started yet.
    #[must_use]
    pub fn new(
        buffer: RollingAudioBuffer,
        location: Arc<dyn LocationProvider>,
        uploader: Arc<EvidenceUploader>,
        status: StatusPublisher,
        location_timeout: Duration,
    ) -> Self {
        let (handoff_tx, handoff_rx) = mpsc::unbounded_channel();
        Self {
            buffer,
            location,
            uploader,
            status,
            location_timeout,
            state: CaptureState::Idle,
            next_id: 1,
            handoff_tx,
            handoff_rx,
            captures: JoinSet::new(),
            completed: Vec::new(),
        }
    }

    /// Start continuous audio capture.
    ///
    /// An unavailable device is reported on the status channel; the pipeline
    /// keeps running without audio.
    pub fn start_recording(&mut self) {
        let _ = self.buffer.start();
        self.publish_recording();
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Whether a capture is in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.state != CaptureState::Idle
    }

    /// The rolling buffer.
    #[must_use]
    pub fn buffer(&self) -> &RollingAudioBuffer {
        &self.buffer
    }

    /// React to a crash.
    ///
    /// When idle, the window is frozen and capture restarted before this
    /// returns; the location lookup and upload continue in the background.
    pub fn handle_crash(&mut self, event: CrashEvent) -> CrashOutcome {
        if self.is_busy() {
            self.status.record_coalesced();
            debug!(axis = %event.axis, "crash coalesced into in-flight capture");
            return CrashOutcome::Coalesced;
        }

        self.state = CaptureState::Capturing;
        self.status.record_crash();
        let evidence_id = self.next_id;
        self.next_id += 1;

        // Ask for the location first so the lookup overlaps the freeze.
        let provider = Arc::clone(&self.location);
        let timeout = self.location_timeout;
        let lookup =
            tokio::spawn(async move { resolve_location(provider.as_ref(), timeout).await });

        let window = self.buffer.freeze();
        let captured_at = Utc::now();
        if let Err(e) = self.buffer.restart() {
            warn!(error = %e, "audio capture did not resume after freeze");
        }
        self.publish_recording();

        info!(
            evidence_id,
            axis = %event.axis,
            chunks = window.len(),
            "crash captured"
        );

        let status = self.status.clone();
        let uploader = Arc::clone(&self.uploader);
        let handoff = self.handoff_tx.clone();
        self.captures.spawn(async move {
            let location = lookup.await.ok().flatten();
            let evidence = Evidence::new(
                evidence_id,
                window,
                location,
                event.triggering_sample,
                captured_at,
            );
            status.raise_alarm(alarm_message(location));
            let _ = handoff.send(evidence_id);
            uploader.upload(evidence).await
        });

        CrashOutcome::Accepted { evidence_id }
    }

    /// Wait for the next audio chunk, stream loss or hand-off.
    pub async fn next_event(&mut self) -> CoordinatorEvent {
        tokio::select! {
            chunk = self.buffer.next_chunk() => match chunk {
                Some(chunk) => CoordinatorEvent::Chunk(chunk),
                None => CoordinatorEvent::CaptureLost,
            },
            Some(id) = self.handoff_rx.recv() => CoordinatorEvent::HandedOff(id),
        }
    }

    /// Apply an event returned by [`next_event`](Self::next_event).
    pub fn handle(&mut self, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::Chunk(chunk) => {
                self.buffer.on_chunk(chunk);
                self.publish_recording();
            }
            CoordinatorEvent::HandedOff(id) => {
                debug!(evidence_id = id, "evidence handed off");
                self.state = CaptureState::Idle;
                self.reap();
            }
            CoordinatorEvent::CaptureLost => {
                warn!("audio capture lost; not recording");
                self.publish_recording();
            }
        }
    }

    /// Stop capture and wait for in-flight captures to finish uploading.
    ///
    /// Returns the outcome of every upload this coordinator started, in
    /// completion order.
    pub async fn shutdown(mut self) -> Vec<UploadResult> {
        self.buffer.stop();
        self.publish_recording();

        let mut results = std::mem::take(&mut self.completed);
        while let Some(joined) = self.captures.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "capture task did not complete"),
            }
        }
        debug!(uploads = results.len(), "coordinator stopped");
        results
    }

    fn reap(&mut self) {
        while let Some(joined) = self.captures.try_join_next() {
            match joined {
                Ok(result) => self.completed.push(result),
                Err(e) => warn!(error = %e, "capture task did not complete"),
            }
        }
    }

    fn publish_recording(&self) {
        let error = if self.buffer.is_recording() {
            None
        } else {
            self.buffer.last_error().map(str::to_string)
        };
        self.status.set_recording(self.buffer.is_recording(), error);
    }
}

fn alarm_message(location: Option<Location>) -> String {
    match location {
        Some(location) => format!("Crash detected at {location}"),
        None => "Crash detected (location unavailable)".to_string(),
    }
}
