//! The evidence bundle built for each accepted crash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audio::AudioWindow;
use crate::location::Location;
use crate::sample::Sample;

/// Frozen audio plus optional location for one crash. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Evidence {
    id: u64,
    audio: Vec<u8>,
    chunk_count: usize,
    location: Option<Location>,
    trigger: Sample,
    captured_at: DateTime<Utc>,
}

impl Evidence {
    /// Bundle a frozen window.
    ///
    /// `id` must be unique within the session; together with `captured_at` it
    /// makes the storage key unique.
    #[must_use]
    pub fn new(
        id: u64,
        window: AudioWindow,
        location: Option<Location>,
        trigger: Sample,
        captured_at: DateTime<Utc>,
    ) -> Self {
        let chunk_count = window.len();
        Self {
            id,
            audio: window.into_blob(),
            chunk_count,
            location,
            trigger,
            captured_at,
        }
    }

    /// Session-unique evidence number.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The concatenated audio.
    #[must_use]
    pub fn audio(&self) -> &[u8] {
        &self.audio
    }

    /// How many chunks the audio was built from.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// Where the crash happened, if known.
    #[must_use]
    pub fn location(&self) -> Option<Location> {
        self.location
    }

    /// The sample that triggered capture.
    #[must_use]
    pub fn trigger(&self) -> &Sample {
        &self.trigger
    }

    /// When the window was frozen.
    #[must_use]
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Storage key for the audio blob.
    ///
    /// Derived from the capture time at nanosecond precision plus the evidence
    /// number, so rapid-fire captures never collide.
    #[must_use]
    pub fn key(&self) -> String {
        format!(
            "crash-{}-{:06}.pcm",
            self.captured_at.format("%Y%m%dT%H%M%S%.9fZ"),
            self.id
        )
    }

    /// BLAKE3 hash of the audio.
    #[must_use]
    pub fn content_hash(&self) -> String {
        blake3::hash(&self.audio).to_hex().to_string()
    }

    /// The metadata record that points at the stored blob.
    #[must_use]
    pub fn record(&self, key: &str, url: &str) -> EvidenceRecord {
        EvidenceRecord {
            id: None,
            key: key.to_string(),
            url: url.to_string(),
            latitude: self.location.map(|l| l.latitude),
            longitude: self.location.map(|l| l.longitude),
            captured_at: self.captured_at,
            chunk_count: self.chunk_count,
            byte_len: self.audio.len(),
            content_hash: self.content_hash(),
        }
    }
}

/// Metadata row stored alongside each audio blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    /// Row identifier (assigned by storage layer).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Blob storage key.
    pub key: String,
    /// Retrieval address of the blob.
    pub url: String,
    /// Latitude, when the location resolved.
    pub latitude: Option<f64>,
    /// Longitude, when the location resolved.
    pub longitude: Option<f64>,
    /// When the audio window was frozen.
    pub captured_at: DateTime<Utc>,
    /// Number of audio chunks in the blob.
    pub chunk_count: usize,
    /// Blob size in bytes.
    pub byte_len: usize,
    /// BLAKE3 hash of the blob.
    pub content_hash: String,
}
