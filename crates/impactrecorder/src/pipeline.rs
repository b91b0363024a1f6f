//! The event loop tying sensors, detection and capture together.
//!
//! All state lives on one task: sensor samples, audio chunks and capture
//! hand-offs are multiplexed with `tokio::select!`, so the detector and the
//! coordinator are never touched concurrently.

use std::future::Future;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::coordinator::{CaptureCoordinator, CrashOutcome};
use crate::detector::CrashDetector;
use crate::error::Result;
use crate::sample::{Sample, SampleSource, Subscription};
use crate::status::{Status, StatusPublisher};
use crate::upload::UploadResult;

const SAMPLE_CHANNEL_CAPACITY: usize = 256;

/// Summary of a finished run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    /// Acceleration samples evaluated.
    pub samples: u64,
    /// Crashes that started a capture.
    pub crashes: u64,
    /// Crashes dropped during an in-flight capture.
    pub coalesced: u64,
    /// Outcome of every upload, in completion order.
    pub uploads: Vec<UploadResult>,
}

/// Sensors, detector and coordinator wired together.
pub struct Pipeline {
    detector: CrashDetector,
    coordinator: CaptureCoordinator,
    status: StatusPublisher,
    motion: Box<dyn SampleSource>,
    gravity: Option<Box<dyn SampleSource>>,
    report: PipelineReport,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("detector", &self.detector)
            .field("coordinator", &self.coordinator)
            .field("motion", &self.motion.name())
            .field("gravity", &self.gravity.as_ref().map(|g| g.name()))
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Wire a pipeline around an acceleration source.
    #[must_use]
    pub fn new(
        detector: CrashDetector,
        coordinator: CaptureCoordinator,
        status: StatusPublisher,
        motion: Box<dyn SampleSource>,
    ) -> Self {
        Self {
            detector,
            coordinator,
            status,
            motion,
            gravity: None,
            report: PipelineReport::default(),
        }
    }

    /// Also display readings from a gravity source.
    #[must_use]
    pub fn with_gravity(mut self, gravity: Box<dyn SampleSource>) -> Self {
        self.gravity = Some(gravity);
        self
    }

    /// A read-only view of the published status.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<Status> {
        self.status.subscribe()
    }

    /// Run until `shutdown` resolves or the acceleration stream ends.
    ///
    /// Sensors are released and in-flight uploads awaited before returning.
    /// A missing sensor or microphone degrades the run instead of failing it.
    ///
    /// # Errors
    ///
    /// Reserved for failures that make running impossible; none of the
    /// current sources produce one.
    pub async fn run<F>(mut self, shutdown: F) -> Result<PipelineReport>
    where
        F: Future<Output = ()>,
    {
        let (motion_tx, mut motion_rx) = mpsc::channel(SAMPLE_CHANNEL_CAPACITY);
        let motion_sub = subscribe(self.motion.as_mut(), motion_tx);
        let mut motion_open = motion_sub.is_some();
        if !motion_open {
            warn!("running without a motion sensor; no crashes will be detected");
        }

        let mut gravity_sub = None;
        let mut gravity_rx = None;
        if let Some(source) = self.gravity.as_mut() {
            let (tx, rx) = mpsc::channel(SAMPLE_CHANNEL_CAPACITY);
            gravity_sub = subscribe(source.as_mut(), tx);
            if gravity_sub.is_some() {
                gravity_rx = Some(rx);
            }
        }

        self.coordinator.start_recording();
        info!("pipeline running");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                sample = motion_rx.recv(), if motion_open => match sample {
                    Some(sample) => self.on_sample(sample),
                    None => {
                        info!(samples = self.report.samples, "motion stream ended");
                        motion_open = false;
                        break;
                    }
                },
                reading = next_reading(&mut gravity_rx) => match reading {
                    Some(sample) => self.status.publish_gravity(sample),
                    None => {
                        debug!("gravity stream ended");
                        gravity_rx = None;
                    }
                },
                event = self.coordinator.next_event() => self.coordinator.handle(event),
            }
        }
        debug!(motion_open, "leaving event loop");

        drop(motion_sub);
        drop(gravity_sub);

        let mut report = self.report;
        report.uploads = self.coordinator.shutdown().await;
        info!(
            samples = report.samples,
            crashes = report.crashes,
            coalesced = report.coalesced,
            uploads = report.uploads.len(),
            "pipeline stopped"
        );
        Ok(report)
    }

    fn on_sample(&mut self, sample: Sample) {
        trace!(x = sample.x, y = sample.y, z = sample.z, "acceleration");
        self.report.samples += 1;
        self.status.publish_acceleration(sample);

        let Some(event) = self.detector.evaluate(&sample) else {
            return;
        };
        let magnitude = sample.axis(event.axis);
        match self.coordinator.handle_crash(event) {
            CrashOutcome::Accepted { evidence_id } => {
                self.report.crashes += 1;
                warn!(evidence_id, magnitude, "crash detected");
            }
            CrashOutcome::Coalesced => {
                self.report.coalesced += 1;
            }
        }
    }
}

fn subscribe(source: &mut dyn SampleSource, tx: mpsc::Sender<Sample>) -> Option<Subscription> {
    match source.subscribe(tx) {
        Ok(subscription) => {
            info!(source = source.name(), kind = %source.kind(), "sensor subscribed");
            Some(subscription)
        }
        Err(e) => {
            warn!(source = source.name(), kind = %source.kind(), error = %e, "sensor unavailable");
            None
        }
    }
}

async fn next_reading(rx: &mut Option<mpsc::Receiver<Sample>>) -> Option<Sample> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::audio::{AudioChunk, RollingAudioBuffer};
    use crate::detector::DetectorConfig;
    use crate::location::{FixedLocation, Location, LocationProvider};
    use crate::sample::{ReplaySource, SensorKind};
    use crate::status::UploadStatus;
    use crate::test_support::{HangingLocation, MissingSensor, MockBackend, MockCapture};
    use crate::upload::{EvidenceUploader, StorageBackend};

    const HOME: Location = Location {
        latitude: 48.8566,
        longitude: 2.3522,
    };

    fn chunks(n: u8) -> Vec<AudioChunk> {
        (0..n)
            .map(|i| AudioChunk::new(vec![i; 4], u64::from(i)))
            .collect()
    }

    fn pipeline(
        capture: &MockCapture,
        backend: &Arc<MockBackend>,
        location: Arc<dyn LocationProvider>,
        motion: Box<dyn SampleSource>,
    ) -> Pipeline {
        let status = StatusPublisher::new();
        let uploader = Arc::new(EvidenceUploader::new(
            Arc::clone(backend) as Arc<dyn StorageBackend>,
            status.clone(),
            "crash_evidence",
            Duration::from_secs(5),
        ));
        let buffer =
            RollingAudioBuffer::new(Box::new(capture.clone()), 10, Duration::from_secs(1));
        let coordinator = CaptureCoordinator::new(
            buffer,
            location,
            uploader,
            status.clone(),
            Duration::from_millis(3000),
        );
        Pipeline::new(
            CrashDetector::new(DetectorConfig::default()),
            coordinator,
            status,
            motion,
        )
    }

    fn replay(samples: Vec<Sample>) -> Box<dyn SampleSource> {
        Box::new(ReplaySource::new(SensorKind::Acceleration, samples).realtime(true))
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_uploads_last_ten_chunks() {
        crate::logging::init_test_logging();
        let capture = MockCapture::preloaded(chunks(12));
        let backend = Arc::new(MockBackend::new());
        let motion = replay(vec![
            Sample::new(0.1, 0.2, 9.8, 0.0),
            Sample::new(30.0, 0.0, 0.0, 1.0),
        ]);
        let pipeline = pipeline(&capture, &backend, Arc::new(FixedLocation(HOME)), motion);
        let status = pipeline.status();

        let report = pipeline.run(std::future::pending()).await.unwrap();

        assert_eq!(report.samples, 2);
        assert_eq!(report.crashes, 1);
        assert_eq!(report.uploads.len(), 1);
        assert!(report.uploads[0].is_success());

        let blobs = backend.blobs();
        assert_eq!(blobs.len(), 1);
        let expected: Vec<u8> = (2..12).flat_map(|i| vec![i; 4]).collect();
        assert_eq!(blobs[0].1, expected);

        let records = backend.records();
        assert_eq!(records[0].1.chunk_count, 10);
        assert_eq!(records[0].1.latitude, Some(48.8566));

        assert_eq!(status.borrow().upload.to_string(), "Success");
        assert_eq!(
            status.borrow().acceleration,
            Some(Sample::new(30.0, 0.0, 0.0, 1.0))
        );
        assert!(status.borrow().alarm.is_some());

        tokio::time::sleep(Duration::from_millis(4990)).await;
        assert_eq!(status.borrow().upload.to_string(), "Success");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(status.borrow().upload, UploadStatus::Neutral);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_samples_never_capture() {
        let capture = MockCapture::preloaded(chunks(3));
        let backend = Arc::new(MockBackend::new());
        let motion = replay(vec![
            Sample::new(24.9, -24.9, 0.0, 0.0),
            Sample::new(0.0, 0.0, 25.0, 0.5),
        ]);
        let pipeline = pipeline(&capture, &backend, Arc::new(FixedLocation(HOME)), motion);

        let report = pipeline.run(std::future::pending()).await.unwrap();

        assert_eq!(report.samples, 2);
        assert_eq!(report.crashes, 0);
        assert_eq!(backend.blob_count(), 0);
        assert_eq!(capture.starts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_during_location_wait_is_coalesced() {
        let capture = MockCapture::preloaded(chunks(4));
        let backend = Arc::new(MockBackend::new());
        let motion = replay(vec![
            Sample::new(0.0, 31.0, 0.0, 0.0),
            Sample::new(0.0, 0.0, -40.0, 0.5),
            Sample::new(0.0, 0.0, 0.0, 1.0),
        ]);
        let pipeline = pipeline(&capture, &backend, Arc::new(HangingLocation), motion);
        let status = pipeline.status();

        let report = pipeline.run(std::future::pending()).await.unwrap();

        assert_eq!(report.crashes, 1);
        assert_eq!(report.coalesced, 1);
        assert_eq!(backend.blob_count(), 1);
        assert!(backend.records()[0].1.latitude.is_none());
        assert_eq!(status.borrow().counters.coalesced_events, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_motion_sensor_runs_until_shutdown() {
        let capture = MockCapture::new();
        let backend = Arc::new(MockBackend::new());
        let sensor = MissingSensor::new(SensorKind::Acceleration);
        let attempted = sensor.attempted();
        let pipeline = pipeline(
            &capture,
            &backend,
            Arc::new(FixedLocation(HOME)),
            Box::new(sensor),
        );
        let status = pipeline.status();

        let report = pipeline
            .run(tokio::time::sleep(Duration::from_secs(2)))
            .await
            .unwrap();

        assert!(attempted.load(Ordering::SeqCst));
        assert_eq!(report.samples, 0);
        // Audio still ran and is released at shutdown.
        assert_eq!(capture.starts(), 1);
        assert_eq!(capture.stops(), 1);
        assert!(!status.borrow().recording);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gravity_is_displayed_not_evaluated() {
        let capture = MockCapture::new();
        let backend = Arc::new(MockBackend::new());
        let motion = replay(vec![Sample::new(0.0, 0.0, 0.0, 0.0), Sample::new(0.0, 0.0, 0.0, 2.0)]);
        let gravity = ReplaySource::new(
            SensorKind::Gravity,
            vec![Sample::new(0.0, 99.0, 0.0, 0.0)],
        );
        let pipeline = pipeline(&capture, &backend, Arc::new(FixedLocation(HOME)), motion)
            .with_gravity(Box::new(gravity));
        let status = pipeline.status();

        let report = pipeline.run(std::future::pending()).await.unwrap();

        assert_eq!(report.crashes, 0);
        assert_eq!(
            status.borrow().gravity,
            Some(Sample::new(0.0, 99.0, 0.0, 0.0))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_microphone_is_published() {
        let capture = MockCapture::unavailable();
        let backend = Arc::new(MockBackend::new());
        let motion = replay(vec![Sample::new(26.0, 0.0, 0.0, 0.0)]);
        let pipeline = pipeline(&capture, &backend, Arc::new(FixedLocation(HOME)), motion);
        let mut status = pipeline.status();

        let report = pipeline.run(std::future::pending()).await.unwrap();

        assert_eq!(report.crashes, 1);
        assert_eq!(backend.blobs()[0].1.len(), 0);
        let snapshot = status.borrow_and_update().clone();
        assert!(!snapshot.recording);
        assert!(snapshot.capture_error.unwrap().contains("no microphone"));
    }
}
