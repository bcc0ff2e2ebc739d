//! Risk domain.
//!
//! - `limits`: configured limits plus scoring and sizing parameters
//! - `portfolio`: read-model records the metrics are computed from
//! - `metrics`: derived `RiskMetrics`
//! - `assessment`: check inputs and `RiskCheckResult`
//! - `evaluation`: the pure check, sizing and health functions
//! - `health`: the portfolio health report

mod assessment;
mod evaluation;
mod health;
mod limits;
mod metrics;
mod portfolio;
pub mod stats;

pub use assessment::{OrderProposal, PositionImpact, RiskCheckResult, RiskLevel, ViolationKind};
pub use evaluation::{adjust_position_size, assess_portfolio_health, evaluate_order};
pub use health::{HealthStatus, PortfolioHealth};
pub use limits::{RiskLimits, RiskScoring, SizingParameters};
pub use metrics::RiskMetrics;
pub use portfolio::{
    AccountSnapshot, PortfolioSnapshot, PortfolioValuePoint, Position, TradeRecord,
};
