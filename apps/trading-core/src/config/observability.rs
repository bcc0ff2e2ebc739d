//! Metrics exporter configuration.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::observability::MetricsConfig;

/// Prometheus exporter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSection {
    /// Whether to start the exporter.
    pub enabled: bool,
    /// Listen address of the `/metrics` endpoint.
    pub listen_addr: String,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "0.0.0.0:9090".to_string(),
        }
    }
}

impl MetricsSection {
    /// Exporter settings, or `None` when disabled.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if the address does not parse.
    pub fn to_settings(&self) -> Result<Option<MetricsConfig>, ConfigError> {
        if !self.enabled {
            return Ok(None);
        }
        let addr: SocketAddr = self.listen_addr.parse().map_err(|e| {
            ConfigError::ValidationError(format!(
                "metrics.listen_addr '{}' is invalid: {e}",
                self.listen_addr
            ))
        })?;
        Ok(Some(MetricsConfig::with_addr(addr)))
    }
}
