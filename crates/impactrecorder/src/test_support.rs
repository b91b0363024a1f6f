//! Mock implementations for unit testing.
//!
//! These stand in for audio devices, sensors, storage, and geolocation so the
//! capture pipeline can be exercised without hardware.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::audio::{AudioCapture, AudioChunk};
use crate::error::{Error, Result};
use crate::evidence::EvidenceRecord;
use crate::location::{Location, LocationProvider};
use crate::sample::{Sample, SampleSource, SensorKind, Subscription};
use crate::upload::StorageBackend;

#[derive(Default)]
struct CaptureState {
    sender: Option<mpsc::Sender<AudioChunk>>,
    starts: usize,
    stops: usize,
    unavailable: bool,
    fail_after: Option<usize>,
    preload: Vec<AudioChunk>,
}

/// Mock audio device.
///
/// Clones share state, so a test keeps one handle while the buffer owns
/// another. Chunks reach the buffer only when the test pushes them.
#[derive(Clone, Default)]
pub struct MockCapture {
    state: Arc<Mutex<CaptureState>>,
}

impl MockCapture {
    /// A working device.
    pub fn new() -> Self {
        Self::default()
    }

    /// A device that refuses to start.
    pub fn unavailable() -> Self {
        let capture = Self::new();
        capture.state.lock().unwrap().unavailable = true;
        capture
    }

    /// A device that starts `n` times and then refuses.
    pub fn fail_after(n: usize) -> Self {
        let capture = Self::new();
        capture.state.lock().unwrap().fail_after = Some(n);
        capture
    }

    /// A device that delivers `chunks` immediately on every start.
    pub fn preloaded(chunks: Vec<AudioChunk>) -> Self {
        let capture = Self::new();
        capture.state.lock().unwrap().preload = chunks;
        capture
    }

    /// Deliver a chunk. Returns `false` if the device isn't running.
    pub fn push(&self, chunk: AudioChunk) -> bool {
        let state = self.state.lock().unwrap();
        match &state.sender {
            Some(tx) => tx.try_send(chunk).is_ok(),
            None => false,
        }
    }

    /// End the stream as if the device vanished.
    pub fn hang_up(&self) {
        self.state.lock().unwrap().sender = None;
    }

    /// Number of successful starts.
    pub fn starts(&self) -> usize {
        self.state.lock().unwrap().starts
    }

    /// Number of stops.
    pub fn stops(&self) -> usize {
        self.state.lock().unwrap().stops
    }
}

impl AudioCapture for MockCapture {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn start(&mut self, _chunk_duration: Duration) -> Result<mpsc::Receiver<AudioChunk>> {
        let mut state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(Error::capture_unavailable("mock", "no microphone"));
        }
        if state.fail_after.is_some_and(|n| state.starts >= n) {
            return Err(Error::capture_unavailable("mock", "microphone disconnected"));
        }
        let (tx, rx) = mpsc::channel(64);
        for chunk in &state.preload {
            tx.try_send(chunk.clone()).unwrap();
        }
        state.sender = Some(tx);
        state.starts += 1;
        Ok(rx)
    }

    fn stop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.sender = None;
        state.stops += 1;
    }
}

/// Mock storage backend that keeps everything in memory.
#[derive(Default)]
pub struct MockBackend {
    blobs: Mutex<Vec<(String, Vec<u8>)>>,
    records: Mutex<Vec<(String, EvidenceRecord)>>,
    insert_attempts: AtomicUsize,
    fail_blobs: bool,
    fail_inserts: bool,
    empty_urls: bool,
}

impl MockBackend {
    /// A backend where every write succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make blob writes fail.
    #[must_use]
    pub fn fail_blobs(mut self) -> Self {
        self.fail_blobs = true;
        self
    }

    /// Make record inserts fail.
    #[must_use]
    pub fn fail_inserts(mut self) -> Self {
        self.fail_inserts = true;
        self
    }

    /// Return an empty address from blob writes.
    #[must_use]
    pub fn with_empty_urls(mut self) -> Self {
        self.empty_urls = true;
        self
    }

    /// Stored blobs, in write order.
    pub fn blobs(&self) -> Vec<(String, Vec<u8>)> {
        self.blobs.lock().unwrap().clone()
    }

    /// Number of stored blobs.
    pub fn blob_count(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    /// Inserted records with their table names.
    pub fn records(&self) -> Vec<(String, EvidenceRecord)> {
        self.records.lock().unwrap().clone()
    }

    /// Number of insert calls, failed or not.
    pub fn insert_attempts(&self) -> usize {
        self.insert_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn store_blob(&self, key: &str, bytes: &[u8]) -> Result<String> {
        if self.fail_blobs {
            return Err(Error::internal("bucket unreachable"));
        }
        let mut blobs = self.blobs.lock().unwrap();
        if blobs.iter().any(|(k, _)| k == key) {
            return Err(Error::internal(format!("{key} already exists")));
        }
        blobs.push((key.to_string(), bytes.to_vec()));
        if self.empty_urls {
            return Ok(String::new());
        }
        Ok(format!("mock://evidence/{key}"))
    }

    async fn insert_record(&self, table: &str, record: &EvidenceRecord) -> Result<()> {
        self.insert_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_inserts {
            return Err(Error::internal("table rejected insert"));
        }
        self.records
            .lock()
            .unwrap()
            .push((table.to_string(), record.clone()));
        Ok(())
    }
}

/// A location provider that never answers.
pub struct HangingLocation;

#[async_trait::async_trait]
impl LocationProvider for HangingLocation {
    fn name(&self) -> &'static str {
        "hanging"
    }

    async fn current_position(&self) -> Result<Location> {
        std::future::pending().await
    }
}

/// A sensor that can't be subscribed to.
pub struct MissingSensor {
    kind: SensorKind,
    attempted: Arc<AtomicBool>,
}

impl MissingSensor {
    /// A missing sensor of the given kind.
    pub fn new(kind: SensorKind) -> Self {
        Self {
            kind,
            attempted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared flag set when a subscription is attempted.
    pub fn attempted(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.attempted)
    }
}

impl SampleSource for MissingSensor {
    fn name(&self) -> &'static str {
        "missing"
    }

    fn kind(&self) -> SensorKind {
        self.kind
    }

    fn subscribe(&mut self, _tx: mpsc::Sender<Sample>) -> Result<Subscription> {
        self.attempted.store(true, Ordering::SeqCst);
        Err(Error::sensor_unavailable("missing", "no such sensor"))
    }
}
