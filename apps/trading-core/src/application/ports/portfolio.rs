//! Portfolio Read Model Port (Driven Port)
//!
//! Positions, trade history and daily portfolio values the risk
//! engine computes its metrics from, plus the write side that keeps
//! them current as orders are placed and executed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::risk::{AccountSnapshot, PortfolioValuePoint, Position, TradeRecord};

/// Read model error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadModelError {
    /// The backing store could not be reached.
    #[error("Portfolio read model unavailable: {0}")]
    Unavailable(String),

    /// A query failed.
    #[error("Portfolio query failed: {0}")]
    Query(String),
}

/// Port for portfolio reads.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PortfolioReadModel: Send + Sync {
    /// Account balances.
    async fn account(&self) -> Result<AccountSnapshot, ReadModelError>;

    /// Open positions.
    async fn positions(&self) -> Result<Vec<Position>, ReadModelError>;

    /// Open position in one ticker.
    async fn position(&self, ticker: &str) -> Result<Option<Position>, ReadModelError>;

    /// Trades executed at or after `since`.
    async fn trades_since(&self, since: DateTime<Utc>) -> Result<Vec<TradeRecord>, ReadModelError>;

    /// Daily closing portfolio values for the last `days` days, oldest first.
    async fn daily_values(&self, days: u32) -> Result<Vec<PortfolioValuePoint>, ReadModelError>;

    /// Sector of a ticker, if known.
    async fn sector_of(&self, ticker: &str) -> Result<Option<String>, ReadModelError>;

    /// Orders submitted at or after `since`.
    async fn order_count_since(&self, since: DateTime<Utc>) -> Result<u32, ReadModelError>;
}

/// Port for portfolio writes.
///
/// Fed by the gateway connector: every execution is booked as a trade and
/// every order placed at the gateway is counted, so trade-based risk checks
/// see activity since startup and not only the initial seed.
#[async_trait]
pub trait PortfolioLedger: Send + Sync {
    /// Append a trade to the history and move the position in its ticker.
    ///
    /// Returns `false` without changing anything if a trade with the same
    /// execution id was already booked.
    async fn apply_trade(&self, trade: &TradeRecord) -> Result<bool, ReadModelError>;

    /// Count an order placed at the gateway at `at`.
    async fn count_order(&self, at: DateTime<Utc>) -> Result<(), ReadModelError>;
}
