//! Risk engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::application::services::RiskSettings;
use crate::domain::risk::{RiskLimits, RiskScoring, SizingParameters};

/// Risk limits plus engine tuning.
///
/// The limits sit directly under `risk:`; scoring and sizing are nested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Portfolio limits.
    #[serde(flatten)]
    pub limits: RiskLimits,
    /// Whether failed checks reject orders.
    pub enforce: bool,
    /// How long computed metrics are served from cache.
    pub cache_ttl_secs: u64,
    /// Days of daily portfolio values read for return statistics.
    pub lookback_days: u32,
    /// Annual risk-free rate for Sharpe and Sortino.
    pub risk_free_rate: f64,
    /// Score weights and hard blocks.
    pub scoring: RiskScoring,
    /// Position sizing parameters.
    pub sizing: SizingParameters,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            limits: RiskLimits::default(),
            enforce: true,
            cache_ttl_secs: 60,
            lookback_days: 252,
            risk_free_rate: 0.0,
            scoring: RiskScoring::default(),
            sizing: SizingParameters::default(),
        }
    }
}

impl RiskConfig {
    /// Settings for the risk engine.
    #[must_use]
    pub fn to_settings(&self) -> RiskSettings {
        RiskSettings {
            limits: self.limits.clone(),
            scoring: self.scoring.clone(),
            sizing: self.sizing.clone(),
            enforce: self.enforce,
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            lookback_days: self.lookback_days,
            risk_free_rate: self.risk_free_rate,
        }
    }
}
