//! Market Context Port (Driven Port)
//!
//! Synchronous view of prices, halts and the trading session used by
//! order validation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Port for market state lookups.
pub trait MarketContext: Send + Sync {
    /// Last observed price of a ticker.
    fn last_price(&self, ticker: &str) -> Option<Decimal>;

    /// Whether trading in a ticker is halted.
    fn is_halted(&self, ticker: &str) -> bool;

    /// Whether the regular session is open at `at`.
    fn is_market_open(&self, at: DateTime<Utc>) -> bool;
}
