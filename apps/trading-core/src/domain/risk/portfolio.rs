//! Portfolio read-model records consumed by the risk engine.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::domain::connection::ExecutionReport;
use crate::domain::order::OrderSide;
use crate::domain::shared::ExecutionId;

/// An open position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Ticker symbol.
    pub ticker: String,
    /// Signed share quantity (negative when short).
    pub quantity: Decimal,
    /// Average cost per share.
    pub avg_cost: Decimal,
    /// Current market value.
    pub market_value: Decimal,
    /// Unrealized profit and loss.
    pub unrealized_pnl: Decimal,
    /// Sector of the symbol, if known.
    #[serde(default)]
    pub sector: Option<String>,
    /// When the position was opened.
    #[serde(default)]
    pub opened_at: Option<DateTime<Utc>>,
}

impl Position {
    /// Create a position valued at `price` with no sector or open time.
    #[must_use]
    pub fn new(ticker: impl Into<String>, quantity: Decimal, avg_cost: Decimal, price: Decimal) -> Self {
        Self {
            ticker: ticker.into(),
            quantity,
            avg_cost,
            market_value: quantity * price,
            unrealized_pnl: (price - avg_cost) * quantity,
            sector: None,
            opened_at: None,
        }
    }

    /// Attach a sector.
    #[must_use]
    pub fn with_sector(mut self, sector: impl Into<String>) -> Self {
        self.sector = Some(sector.into());
        self
    }

    /// Attach an open time.
    #[must_use]
    pub const fn opened_at(mut self, at: DateTime<Utc>) -> Self {
        self.opened_at = Some(at);
        self
    }

    /// Apply a trade in this ticker and return the profit or loss it realizes.
    ///
    /// Adding to the position moves the average cost. Reducing it realizes
    /// against the average cost, and trading through zero reopens the
    /// remainder at the trade price. The position is revalued at the trade
    /// price.
    pub fn apply_trade(&mut self, trade: &TradeRecord) -> Decimal {
        let delta = trade.signed_quantity();
        let held = self.quantity;
        let mut realized = Decimal::ZERO;

        if held.is_zero() || held.is_sign_positive() == delta.is_sign_positive() {
            let total = held.abs() + delta.abs();
            if !total.is_zero() {
                self.avg_cost = (held.abs() * self.avg_cost + delta.abs() * trade.price) / total;
            }
            if held.is_zero() {
                self.opened_at = Some(trade.executed_at);
            }
        } else {
            let closed = delta.abs().min(held.abs());
            let direction = if held.is_sign_positive() {
                Decimal::ONE
            } else {
                Decimal::NEGATIVE_ONE
            };
            realized = closed * (trade.price - self.avg_cost) * direction;
            if delta.abs() > held.abs() {
                self.avg_cost = trade.price;
                self.opened_at = Some(trade.executed_at);
            }
        }

        self.quantity = held + delta;
        self.market_value = self.quantity * trade.price;
        self.unrealized_pnl = (trade.price - self.avg_cost) * self.quantity;
        realized
    }
}

/// An executed trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Gateway execution id, when the trade came from an execution report.
    #[serde(default)]
    pub execution_id: Option<ExecutionId>,
    /// Ticker symbol.
    pub ticker: String,
    /// Buy or sell.
    pub side: OrderSide,
    /// Shares executed.
    pub quantity: Decimal,
    /// Execution price.
    pub price: Decimal,
    /// Profit or loss realized by the trade.
    #[serde(default)]
    pub realized_pnl: Decimal,
    /// Commission paid.
    #[serde(default)]
    pub commission: Decimal,
    /// Execution time.
    pub executed_at: DateTime<Utc>,
}

impl TradeRecord {
    /// Signed share change: positive for a buy, negative for a sell.
    #[must_use]
    pub fn signed_quantity(&self) -> Decimal {
        match self.side {
            OrderSide::Buy => self.quantity,
            OrderSide::Sell => -self.quantity,
        }
    }
}

impl From<&ExecutionReport> for TradeRecord {
    fn from(report: &ExecutionReport) -> Self {
        Self {
            execution_id: Some(report.execution_id.clone()),
            ticker: report.ticker.clone(),
            side: report.side,
            quantity: report.quantity,
            price: report.price,
            realized_pnl: Decimal::ZERO,
            commission: report.commission,
            executed_at: report.executed_at,
        }
    }
}

/// End-of-day portfolio value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortfolioValuePoint {
    /// Trading date.
    pub date: NaiveDate,
    /// Portfolio value at the close.
    pub value: Decimal,
}

/// Account balances.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// Total portfolio value (cash plus positions).
    pub portfolio_value: Decimal,
    /// Cash balance.
    pub cash: Decimal,
    /// Margin in use.
    pub margin_used: Decimal,
    /// Margin still available for new orders.
    pub margin_available: Decimal,
}

/// Everything the metrics computation reads, gathered at one instant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortfolioSnapshot {
    /// Account balances.
    pub account: AccountSnapshot,
    /// Open positions.
    pub positions: Vec<Position>,
    /// Trades executed today.
    pub trades_today: Vec<TradeRecord>,
    /// Daily closes, oldest first.
    pub daily_values: Vec<PortfolioValuePoint>,
    /// Orders created today.
    pub orders_today: u32,
}

/// Lossy conversion for analytics. Money stays in `Decimal` elsewhere.
pub(crate) fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}
