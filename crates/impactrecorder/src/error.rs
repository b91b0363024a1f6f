//! Error types for impactrecorder.
//!
//! Every failure in the capture pipeline is expressed through [`Error`]. The
//! pipeline never lets one of these escape into the sensor event loop; each
//! component catches its own failures and turns them into a status update.

use std::path::PathBuf;
use thiserror::Error;

/// Which half of an evidence upload failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    /// Storing the audio blob.
    BlobStore,
    /// Inserting the metadata record that references the blob.
    MetadataInsert,
}

impl std::fmt::Display for UploadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlobStore => write!(f, "blob store"),
            Self::MetadataInsert => write!(f, "metadata insert"),
        }
    }
}

/// The main error type for impactrecorder operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Capture Errors ===
    /// The audio capture device is missing or access was denied.
    #[error("audio capture unavailable ({name}): {message}")]
    CaptureUnavailable {
        /// Name of the capture device.
        name: &'static str,
        /// Description of what went wrong.
        message: String,
    },

    /// A motion sensor could not be subscribed to.
    #[error("sensor unavailable ({name}): {message}")]
    SensorUnavailable {
        /// Name of the sensor source.
        name: &'static str,
        /// Description of what went wrong.
        message: String,
    },

    // === Location Errors ===
    /// The geolocation provider failed or did not answer in time.
    #[error("location unresolved: {message}")]
    LocationUnresolved {
        /// Description of what went wrong.
        message: String,
    },

    // === Upload Errors ===
    /// Persisting evidence failed. Terminal for that evidence.
    #[error("upload failed during {stage}: {message}")]
    UploadFailed {
        /// Which step failed.
        stage: UploadStage,
        /// Description of what went wrong.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Generic Errors ===
    /// An operation timed out.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
    },

    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for impactrecorder operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a capture-unavailable error.
    #[must_use]
    pub fn capture_unavailable(name: &'static str, message: impl Into<String>) -> Self {
        Self::CaptureUnavailable {
            name,
            message: message.into(),
        }
    }

    /// Create a sensor-unavailable error.
    #[must_use]
    pub fn sensor_unavailable(name: &'static str, message: impl Into<String>) -> Self {
        Self::SensorUnavailable {
            name,
            message: message.into(),
        }
    }

    /// Create a location-unresolved error.
    #[must_use]
    pub fn location_unresolved(message: impl Into<String>) -> Self {
        Self::LocationUnresolved {
            message: message.into(),
        }
    }

    /// Create an upload failure for the given stage.
    #[must_use]
    pub fn upload_failed(stage: UploadStage, message: impl Into<String>) -> Self {
        Self::UploadFailed {
            stage,
            message: message.into(),
        }
    }

    /// Check if this error means the audio device can't be used.
    #[must_use]
    pub fn is_capture_unavailable(&self) -> bool {
        matches!(self, Self::CaptureUnavailable { .. })
    }

    /// The upload stage that failed, if this is an upload failure.
    #[must_use]
    pub fn upload_stage(&self) -> Option<UploadStage> {
        match self {
            Self::UploadFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
