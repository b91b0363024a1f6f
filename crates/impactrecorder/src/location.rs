//! Geolocation lookup with a bounded wait.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// A position fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.5}, {:.5}", self.latitude, self.longitude)
    }
}

/// Asynchronous source of the device's current position.
#[async_trait::async_trait]
pub trait LocationProvider: Send + Sync {
    /// The name of this provider (for logging/debugging).
    fn name(&self) -> &'static str;

    /// Fetch the current position. May be slow.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LocationUnresolved`] if no fix can be obtained.
    async fn current_position(&self) -> Result<Location>;
}

/// Always reports the same position.
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation(pub Location);

#[async_trait::async_trait]
impl LocationProvider for FixedLocation {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn current_position(&self) -> Result<Location> {
        Ok(self.0)
    }
}

/// A device with no geolocation capability.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocation;

#[async_trait::async_trait]
impl LocationProvider for NoLocation {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn current_position(&self) -> Result<Location> {
        Err(Error::location_unresolved("no location provider configured"))
    }
}

/// Ask `provider` for a fix, giving up after `timeout`.
///
/// Failure and timeout both yield `None`; evidence is then captured without a
/// location.
pub async fn resolve_location(
    provider: &dyn LocationProvider,
    timeout: Duration,
) -> Option<Location> {
    match tokio::time::timeout(timeout, provider.current_position()).await {
        Ok(Ok(location)) => {
            debug!(provider = provider.name(), %location, "location resolved");
            Some(location)
        }
        Ok(Err(e)) => {
            warn!(provider = provider.name(), error = %e, "location unavailable");
            None
        }
        Err(_) => {
            let err = Error::Timeout {
                operation: format!("location lookup after {}ms", timeout.as_millis()),
            };
            warn!(provider = provider.name(), error = %err, "location unavailable");
            None
        }
    }
}
