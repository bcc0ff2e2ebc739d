//! Order lifecycle configuration.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::application::services::OrderSettings;

/// Order validation and acknowledgment settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrdersConfig {
    /// Largest accepted quantity.
    pub max_quantity: Decimal,
    /// Bound on waiting for the gateway to accept an order.
    pub ack_timeout_ms: u64,
    /// Poll interval while waiting for the acknowledgment.
    pub ack_poll_interval_ms: u64,
    /// Largest accepted distance of a limit price from the last price.
    pub max_limit_deviation: Decimal,
    /// Whether market orders are refused outside the session.
    pub enforce_trading_hours: bool,
    /// Completed orders kept for queries.
    pub completed_capacity: usize,
}

impl Default for OrdersConfig {
    fn default() -> Self {
        Self {
            max_quantity: Decimal::from(10_000),
            ack_timeout_ms: 5_000,
            ack_poll_interval_ms: 50,
            max_limit_deviation: Decimal::new(10, 2),
            enforce_trading_hours: true,
            completed_capacity: 1_000,
        }
    }
}

impl OrdersConfig {
    /// Settings for the lifecycle manager.
    #[must_use]
    pub const fn to_settings(&self) -> OrderSettings {
        OrderSettings {
            max_quantity: self.max_quantity,
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
            max_limit_deviation: self.max_limit_deviation,
            enforce_trading_hours: self.enforce_trading_hours,
            completed_capacity: self.completed_capacity,
        }
    }
}
