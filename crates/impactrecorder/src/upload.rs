//! Evidence persistence.
//!
//! An upload is two dependent steps: store the audio blob, then insert a
//! metadata record pointing at it. The record is only written once the blob is
//! stored. There is no retry; a failed upload is final for that evidence.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result, UploadStage};
use crate::evidence::{Evidence, EvidenceRecord};
use crate::status::StatusPublisher;

/// Durable storage for evidence.
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync {
    /// The name of this backend (for logging/debugging).
    fn name(&self) -> &'static str;

    /// Store `bytes` under `key` and return its retrieval address.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob can't be stored. An existing blob under
    /// `key` is an error, not an overwrite.
    async fn store_blob(&self, key: &str, bytes: &[u8]) -> Result<String>;

    /// Insert a metadata record into `table`.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    async fn insert_record(&self, table: &str, record: &EvidenceRecord) -> Result<()>;
}

/// Outcome state of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    /// Still running.
    Pending,
    /// Blob and record both stored.
    Success,
    /// Either step failed.
    Failed,
}

/// Result of uploading one evidence bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    /// Outcome.
    pub state: UploadState,
    /// Retrieval address of the stored blob, on success.
    pub remote_url: Option<String>,
    /// What went wrong, on failure.
    pub error: Option<String>,
}

impl UploadResult {
    /// An upload that hasn't finished.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            state: UploadState::Pending,
            remote_url: None,
            error: None,
        }
    }

    /// A completed upload.
    #[must_use]
    pub fn success(url: impl Into<String>) -> Self {
        Self {
            state: UploadState::Success,
            remote_url: Some(url.into()),
            error: None,
        }
    }

    /// A failed upload.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            state: UploadState::Failed,
            remote_url: None,
            error: Some(error.into()),
        }
    }

    /// Whether the upload succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.state == UploadState::Success
    }
}

/// Persists evidence and reports progress to the status publisher.
pub struct EvidenceUploader {
    backend: Arc<dyn StorageBackend>,
    status: StatusPublisher,
    table: String,
    display_for: Duration,
}

impl std::fmt::Debug for EvidenceUploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvidenceUploader")
            .field("backend", &self.backend.name())
            .field("table", &self.table)
            .field("display_for", &self.display_for)
            .finish_non_exhaustive()
    }
}

impl EvidenceUploader {
    /// Create an uploader writing records to `table`.
    ///
    /// Upload status stays on display for `display_for` before reverting.
    #[must_use]
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        status: StatusPublisher,
        table: impl Into<String>,
        display_for: Duration,
    ) -> Self {
        Self {
            backend,
            status,
            table: table.into(),
            display_for,
        }
    }

    /// Store the evidence and publish the outcome.
    ///
    /// Never returns an error: failures are reported in the result and on the
    /// status channel, and the evidence is dropped.
    pub async fn upload(&self, evidence: Evidence) -> UploadResult {
        self.status.publish_upload(&UploadResult::pending());
        info!(
            id = evidence.id(),
            chunks = evidence.chunk_count(),
            bytes = evidence.audio().len(),
            located = evidence.location().is_some(),
            trigger = ?evidence.trigger(),
            "uploading evidence"
        );

        let result = match self.persist(&evidence).await {
            Ok(url) => {
                info!(id = evidence.id(), %url, "evidence stored");
                UploadResult::success(url)
            }
            Err(e) => {
                warn!(
                    id = evidence.id(),
                    stage = ?e.upload_stage(),
                    error = %e,
                    "evidence upload failed"
                );
                UploadResult::failed(e.to_string())
            }
        };

        let ticket = self.status.publish_upload(&result);
        self.schedule_clear(ticket);
        result
    }

    async fn persist(&self, evidence: &Evidence) -> Result<String> {
        let key = evidence.key();

        let url = self
            .backend
            .store_blob(&key, evidence.audio())
            .await
            .map_err(|e| Error::upload_failed(UploadStage::BlobStore, e.to_string()))?;
        if url.is_empty() {
            return Err(Error::upload_failed(
                UploadStage::BlobStore,
                "backend returned no retrieval address",
            ));
        }
        debug!(%key, %url, "blob stored");

        let record = evidence.record(&key, &url);
        if let Err(e) = self.backend.insert_record(&self.table, &record).await {
            // The stored blob is left in place.
            warn!(%key, "blob stored without a metadata record");
            return Err(Error::upload_failed(
                UploadStage::MetadataInsert,
                e.to_string(),
            ));
        }

        Ok(url)
    }

    fn schedule_clear(&self, ticket: u64) {
        let status = self.status.clone();
        let display_for = self.display_for;
        tokio::spawn(async move {
            tokio::time::sleep(display_for).await;
            if status.clear_upload(ticket) {
                debug!("upload status cleared");
            }
        });
    }
}
