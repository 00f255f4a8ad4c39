//! Parameters of a synchronization call.

use std::time::Duration;

use crate::coords::MAX_ZOOM;
use crate::error::{Error, Result};

/// Default zoom level.
pub const DEFAULT_ZOOM: u8 = 15;
/// Default neighbourhood radius, in tiles.
pub const DEFAULT_RADIUS: u32 = 1;
/// Largest accepted radius: at most 65 × 65 tiles per point.
pub const MAX_RADIUS: u32 = 32;
/// Default number of addresses per batch.
pub const DEFAULT_BATCH_SIZE: usize = 1;
/// Default pause after each batch.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(1000);

/// How batches are handed to the caching agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Post and move on. A batch that finds no reachable agent is dropped,
    /// and the agent's success or failure is never observed.
    #[default]
    FireAndForget,
    /// Wait for the agent's outcome for every batch and retry undelivered
    /// or failed batches.
    Acknowledged {
        /// Attempts per batch, including the first. At least 1.
        max_attempts: u32,
        /// Base backoff; attempt `n` waits `n * backoff` before retrying.
        backoff: Duration,
    },
}

/// Configuration of one synchronization call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Zoom level of the requested tiles.
    pub zoom: u8,
    /// Tiles to include on each side of every point's centre tile.
    pub radius: u32,
    /// Maximum addresses per message to the caching agent.
    pub batch_size: usize,
    /// Pause after each batch.
    pub delay: Duration,
    /// Delivery semantics.
    pub delivery: DeliveryMode,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            zoom: DEFAULT_ZOOM,
            radius: DEFAULT_RADIUS,
            batch_size: DEFAULT_BATCH_SIZE,
            delay: DEFAULT_DELAY,
            delivery: DeliveryMode::FireAndForget,
        }
    }
}

impl SyncConfig {
    /// Set the zoom level.
    #[must_use]
    pub fn with_zoom(mut self, zoom: u8) -> Self {
        self.zoom = zoom;
        self
    }

    /// Set the neighbourhood radius.
    #[must_use]
    pub fn with_radius(mut self, radius: u32) -> Self {
        self.radius = radius;
        self
    }

    /// Set the batch size.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the inter-batch delay.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set the delivery mode.
    #[must_use]
    pub fn with_delivery(mut self, delivery: DeliveryMode) -> Self {
        self.delivery = delivery;
        self
    }

    /// Check every field against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.zoom > MAX_ZOOM {
            return Err(Error::InvalidConfig {
                field: "zoom",
                detail: format!("{} is above {MAX_ZOOM}", self.zoom),
            });
        }
        if self.radius > MAX_RADIUS {
            return Err(Error::InvalidConfig {
                field: "radius",
                detail: format!("{} is above {MAX_RADIUS}", self.radius),
            });
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig {
                field: "batch_size",
                detail: "must be at least 1".to_string(),
            });
        }
        if let DeliveryMode::Acknowledged { max_attempts: 0, .. } = self.delivery {
            return Err(Error::InvalidConfig {
                field: "max_attempts",
                detail: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.zoom, 15);
        assert_eq!(config.radius, 1);
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.delay, Duration::from_secs(1));
        assert_eq!(config.delivery, DeliveryMode::FireAndForget);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let result = SyncConfig::default().with_batch_size(0).validate();
        assert!(matches!(
            result,
            Err(Error::InvalidConfig {
                field: "batch_size",
                ..
            })
        ));
    }

    #[test]
    fn test_zoom_above_max_rejected() {
        let result = SyncConfig::default().with_zoom(MAX_ZOOM + 1).validate();
        assert!(matches!(
            result,
            Err(Error::InvalidConfig { field: "zoom", .. })
        ));
    }

    #[test]
    fn test_radius_above_max_rejected() {
        assert!(SyncConfig::default().with_radius(MAX_RADIUS).validate().is_ok());

        let result = SyncConfig::default().with_radius(100_000).validate();
        assert!(matches!(
            result,
            Err(Error::InvalidConfig {
                field: "radius",
                ..
            })
        ));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let result = SyncConfig::default()
            .with_delivery(DeliveryMode::Acknowledged {
                max_attempts: 0,
                backoff: Duration::ZERO,
            })
            .validate();
        assert!(result.is_err());
    }
}
