//! Configuration management for impactrecorder.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::detector::{Axis, DetectorConfig};
use crate::error::{Error, Result};
use crate::location::Location;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "impactrecorder";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "evidence.db";

/// Default blob directory name.
const BLOB_DIR_NAME: &str = "blobs";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `IMPACTREC_`, sections split on `__`)
/// 2. TOML config file at `~/.config/impactrecorder/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Crash detection configuration.
    pub detector: DetectorConfig,
    /// Rolling audio configuration.
    pub audio: AudioConfig,
    /// Geolocation configuration.
    pub location: LocationConfig,
    /// Evidence upload configuration.
    pub upload: UploadConfig,
    /// Storage backend configuration.
    pub storage: StorageConfig,
}

/// Rolling audio buffer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Duration of one audio chunk in milliseconds.
    pub chunk_duration_ms: u64,
    /// Number of chunks retained in the rolling window.
    pub window_chunks: usize,
    /// WAV file used as the capture device.
    /// When unset, capture is unavailable and the pipeline runs without audio.
    pub source: Option<PathBuf>,
}

/// Geolocation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// How long to wait for a position fix before giving up.
    pub timeout_ms: u64,
    /// Fixed latitude reported by the location provider.
    pub latitude: Option<f64>,
    /// Fixed longitude reported by the location provider.
    pub longitude: Option<f64>,
}

/// Evidence upload configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Table that receives evidence metadata records.
    pub table: String,
    /// How long an upload status stays visible before reverting to neutral.
    pub status_display_secs: u64,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the metadata database.
    /// Defaults to `~/.local/share/impactrecorder/evidence.db`
    pub database_path: Option<PathBuf>,
    /// Directory that receives audio blobs.
    /// Defaults to `~/.local/share/impactrecorder/blobs`
    pub blob_dir: Option<PathBuf>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            chunk_duration_ms: crate::audio::DEFAULT_CHUNK_DURATION_MS,
            window_chunks: crate::audio::DEFAULT_WINDOW_CHUNKS,
            source: None,
        }
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 3000,
            latitude: None,
            longitude: None,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            table: crate::storage::schema::DEFAULT_EVIDENCE_TABLE.to_string(),
            status_display_secs: 5,
        }
    }
}

impl Config {
    /// Load configuration from all sources, reading the TOML layer from
    /// `config_path` or the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("IMPACTREC_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        let threshold = self.detector.threshold;
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(invalid(format!(
                "detector threshold must be a positive number, got {threshold}"
            )));
        }

        if self.detector.axes.is_empty() {
            return Err(invalid("detector axes must name at least one axis"));
        }

        if self.audio.chunk_duration_ms == 0 {
            return Err(invalid("chunk_duration_ms must be greater than 0"));
        }

        if self.audio.window_chunks == 0 {
            return Err(invalid("window_chunks must be greater than 0"));
        }

        match (self.location.latitude, self.location.longitude) {
            (Some(lat), Some(lon)) => {
                if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
                    return Err(invalid(format!(
                        "fixed location out of range: {lat}, {lon}"
                    )));
                }
            }
            (None, None) => {}
            _ => {
                return Err(invalid(
                    "latitude and longitude must be set together",
                ))
            }
        }

        if !crate::storage::schema::is_valid_table_name(&self.upload.table) {
            return Err(invalid(format!(
                "upload table is not a valid identifier: {}",
                self.upload.table
            )));
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the blob directory, resolving defaults if not set.
    #[must_use]
    pub fn blob_dir(&self) -> PathBuf {
        self.storage
            .blob_dir
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(BLOB_DIR_NAME))
    }

    /// Get the audio chunk duration.
    #[must_use]
    pub fn chunk_duration(&self) -> Duration {
        Duration::from_millis(self.audio.chunk_duration_ms)
    }

    /// Get the geolocation deadline.
    #[must_use]
    pub fn location_timeout(&self) -> Duration {
        Duration::from_millis(self.location.timeout_ms)
    }

    /// Get how long upload status stays on display.
    #[must_use]
    pub fn status_display(&self) -> Duration {
        Duration::from_secs(self.upload.status_display_secs)
    }

    /// The configured fixed location, if any.
    #[must_use]
    pub fn fixed_location(&self) -> Option<Location> {
        match (self.location.latitude, self.location.longitude) {
            (Some(latitude), Some(longitude)) => Some(Location {
                latitude,
                longitude,
            }),
            _ => None,
        }
    }

    /// Whether the given axis is monitored by the detector.
    #[must_use]
    pub fn monitors_axis(&self, axis: Axis) -> bool {
        self.detector.axes.contains(&axis)
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::ConfigValidation {
        message: message.into(),
    }
}
