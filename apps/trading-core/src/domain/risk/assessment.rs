//! Risk check inputs and results.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::order::OrderSide;

/// Kind of limit an order breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    /// Order value over the single-position limit.
    PositionSize,
    /// Daily loss limit reached.
    DailyLoss,
    /// Post-trade symbol concentration over the limit.
    Concentration,
    /// Post-trade sector exposure over the limit.
    SectorExposure,
    /// Same-symbol trade count reached.
    PatternDayTrade,
    /// Portfolio volatility over the limit.
    Volatility,
    /// Not enough margin for the order value.
    Margin,
    /// Estimated correlation with holdings over the limit.
    Correlation,
    /// Current drawdown over the limit.
    Drawdown,
    /// Daily order count reached.
    DailyOrderLimit,
    /// Post-trade leverage over the limit.
    Leverage,
    /// Sell before the minimum hold time.
    MinHoldTime,
}

impl ViolationKind {
    /// SCREAMING_SNAKE name, as serialized.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PositionSize => "POSITION_SIZE",
            Self::DailyLoss => "DAILY_LOSS",
            Self::Concentration => "CONCENTRATION",
            Self::SectorExposure => "SECTOR_EXPOSURE",
            Self::PatternDayTrade => "PATTERN_DAY_TRADE",
            Self::Volatility => "VOLATILITY",
            Self::Margin => "MARGIN",
            Self::Correlation => "CORRELATION",
            Self::Drawdown => "DRAWDOWN",
            Self::DailyOrderLimit => "DAILY_ORDER_LIMIT",
            Self::Leverage => "LEVERAGE",
            Self::MinHoldTime => "MIN_HOLD_TIME",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk level bucket of a 0-100 score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    /// Score below 40.
    Low,
    /// Score 40 to 59.
    Medium,
    /// Score 60 to 79.
    High,
    /// Score 80 and above.
    Critical,
}

impl RiskLevel {
    /// Bucket a score.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Self::Critical
        } else if score >= 60.0 {
            Self::High
        } else if score >= 40.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// A prospective order as seen by the risk checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderProposal {
    /// Ticker symbol.
    pub ticker: String,
    /// Buy or sell.
    pub side: OrderSide,
    /// Share quantity.
    pub quantity: Decimal,
    /// Expected execution price.
    pub price: Decimal,
    /// Protective stop, if any.
    pub stop_loss: Option<Decimal>,
    /// Sector of the symbol, if known.
    pub sector: Option<String>,
}

impl OrderProposal {
    /// Create a proposal without stop-loss or sector.
    #[must_use]
    pub fn new(ticker: impl Into<String>, side: OrderSide, quantity: Decimal, price: Decimal) -> Self {
        Self {
            ticker: ticker.into(),
            side,
            quantity,
            price,
            stop_loss: None,
            sector: None,
        }
    }

    /// Attach a stop-loss.
    #[must_use]
    pub const fn with_stop_loss(mut self, stop_loss: Decimal) -> Self {
        self.stop_loss = Some(stop_loss);
        self
    }

    /// Attach a sector.
    #[must_use]
    pub fn with_sector(mut self, sector: impl Into<String>) -> Self {
        self.sector = Some(sector.into());
        self
    }

    /// Notional value of the order.
    #[must_use]
    pub fn order_value(&self) -> Decimal {
        self.quantity * self.price
    }
}

/// Effect of the order on the portfolio.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PositionImpact {
    /// Order notional.
    pub order_value: f64,
    /// Order notional over portfolio value.
    pub position_fraction: f64,
    /// Symbol value over portfolio value after the trade.
    pub post_trade_symbol_fraction: f64,
    /// Gross exposure over portfolio value after the trade.
    pub post_trade_exposure: f64,
}

/// Outcome of a pre-trade risk check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskCheckResult {
    /// Whether the order may proceed.
    pub approved: bool,
    /// Accumulated score, 0-100.
    pub risk_score: f64,
    /// Bucket of the score.
    pub risk_level: RiskLevel,
    /// Limits broken, in check order.
    pub violations: Vec<ViolationKind>,
    /// Human-readable findings, including non-violations such as a missing stop.
    pub reasons: Vec<String>,
    /// Suggested remedies.
    pub recommendations: Vec<String>,
    /// Largest quantity that fits the position-size limit, when that limit is broken.
    pub recommended_quantity: Option<Decimal>,
    /// Effect of the order on the portfolio.
    pub position_impact: PositionImpact,
}

impl RiskCheckResult {
    /// Returns true if `kind` was found.
    #[must_use]
    pub fn has_violation(&self, kind: ViolationKind) -> bool {
        self.violations.contains(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    #[test_case(0.0, RiskLevel::Low ; "zero is low")]
    #[test_case(39.9, RiskLevel::Low ; "just under medium")]
    #[test_case(40.0, RiskLevel::Medium ; "medium lower bound")]
    #[test_case(59.99, RiskLevel::Medium ; "medium upper bound")]
    #[test_case(60.0, RiskLevel::High ; "high lower bound")]
    #[test_case(79.0, RiskLevel::High ; "high upper bound")]
    #[test_case(80.0, RiskLevel::Critical ; "critical lower bound")]
    #[test_case(100.0, RiskLevel::Critical ; "max score")]
    fn test_risk_level_buckets(score: f64, expected: RiskLevel) {
        assert_eq!(RiskLevel::from_score(score), expected);
    }

    #[test]
    fn test_violation_kind_serde_matches_display() {
        let json = serde_json::to_string(&ViolationKind::PatternDayTrade).unwrap();
        assert_eq!(json, "\"PATTERN_DAY_TRADE\"");
        assert_eq!(ViolationKind::PatternDayTrade.to_string(), "PATTERN_DAY_TRADE");
    }

    #[test]
    fn test_proposal_order_value() {
        let proposal = OrderProposal::new("AAPL", OrderSide::Buy, dec!(200), dec!(150))
            .with_stop_loss(dec!(145))
            .with_sector("Technology");
        assert_eq!(proposal.order_value(), dec!(30000));
        assert_eq!(proposal.sector.as_deref(), Some("Technology"));
    }
}
