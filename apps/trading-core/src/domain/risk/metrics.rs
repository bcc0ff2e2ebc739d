//! Derived portfolio risk metrics.
//!
//! Exposure figures are fractions of portfolio value. Return-based figures
//! (volatility, Sharpe, Sortino, VaR, drawdown) come from the daily close
//! series; fewer than two returns leaves them at zero.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::portfolio::{PortfolioSnapshot, Position, to_f64};
use super::stats;

/// Snapshot of portfolio risk at `calculated_at`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RiskMetrics {
    /// Total portfolio value.
    pub portfolio_value: f64,
    /// Sum of absolute position values.
    pub gross_exposure: f64,
    /// Gross exposure over portfolio value.
    pub total_exposure: f64,
    /// Largest single position over portfolio value.
    pub largest_position: f64,
    /// Exposure per sector over portfolio value. Unknown sectors are grouped as "Unknown".
    pub sector_exposure: BTreeMap<String, f64>,
    /// Open positions by ticker.
    pub positions: BTreeMap<String, Position>,
    /// Profit and loss realized today.
    pub realized_pnl: f64,
    /// Unrealized profit and loss on open positions.
    pub unrealized_pnl: f64,
    /// Change in portfolio value since the previous close.
    pub daily_pnl: f64,
    /// Annualized volatility of daily returns.
    pub volatility: f64,
    /// Annualized Sharpe ratio.
    pub sharpe_ratio: f64,
    /// Annualized Sortino ratio.
    pub sortino_ratio: f64,
    /// One-day historical VaR at 95%, as a loss fraction.
    pub var_95: f64,
    /// One-day historical VaR at 99%, as a loss fraction.
    pub var_99: f64,
    /// Largest peak-to-trough decline.
    pub max_drawdown: f64,
    /// Decline of the current value from the peak.
    pub current_drawdown: f64,
    /// Margin in use.
    pub margin_used: f64,
    /// Margin available.
    pub margin_available: f64,
    /// Herfindahl index of sector weights (1.0 = one sector).
    pub correlation_risk: f64,
    /// Orders created today.
    pub orders_today: u32,
    /// Trades executed today per ticker.
    pub symbol_trades_today: BTreeMap<String, u32>,
    /// When the metrics were computed.
    pub calculated_at: DateTime<Utc>,
}

const UNKNOWN_SECTOR: &str = "Unknown";

impl RiskMetrics {
    /// Compute metrics from a read-model snapshot.
    ///
    /// `risk_free_rate` is annual.
    #[must_use]
    pub fn compute(snapshot: &PortfolioSnapshot, risk_free_rate: f64, now: DateTime<Utc>) -> Self {
        let portfolio_value = to_f64(snapshot.account.portfolio_value);
        let fraction = |value: f64| {
            if portfolio_value > 0.0 {
                value / portfolio_value
            } else {
                0.0
            }
        };

        // Exposure and concentration
        let mut gross_exposure = 0.0;
        let mut largest = 0.0_f64;
        let mut sector_values: BTreeMap<String, f64> = BTreeMap::new();
        let mut positions = BTreeMap::new();
        let mut unrealized_pnl = 0.0;

        for position in &snapshot.positions {
            let value = to_f64(position.market_value).abs();
            gross_exposure += value;
            largest = largest.max(value);
            unrealized_pnl += to_f64(position.unrealized_pnl);
            let sector = position.sector.clone().unwrap_or_else(|| UNKNOWN_SECTOR.to_string());
            *sector_values.entry(sector).or_default() += value;
            positions.insert(position.ticker.clone(), position.clone());
        }

        let correlation_risk = if gross_exposure > 0.0 {
            sector_values
                .values()
                .map(|v| (v / gross_exposure).powi(2))
                .sum::<f64>()
        } else {
            0.0
        };
        let sector_exposure = sector_values
            .into_iter()
            .map(|(sector, value)| (sector, fraction(value)))
            .collect();

        // Today's activity
        let realized_pnl: f64 = snapshot
            .trades_today
            .iter()
            .map(|t| to_f64(t.realized_pnl))
            .sum();
        let mut symbol_trades_today: BTreeMap<String, u32> = BTreeMap::new();
        for trade in &snapshot.trades_today {
            *symbol_trades_today.entry(trade.ticker.clone()).or_default() += 1;
        }

        let today = now.date_naive();
        let previous_close = snapshot
            .daily_values
            .iter()
            .rev()
            .find(|p| p.date < today)
            .map(|p| to_f64(p.value));
        let daily_pnl = previous_close.map_or(realized_pnl, |close| portfolio_value - close);

        // Return-based figures
        let mut values: Vec<f64> = snapshot
            .daily_values
            .iter()
            .filter(|p| p.date < today)
            .map(|p| to_f64(p.value))
            .collect();
        if portfolio_value > 0.0 {
            values.push(portfolio_value);
        }
        let returns = stats::daily_returns(&values);

        let mut metrics = Self {
            portfolio_value,
            gross_exposure,
            total_exposure: fraction(gross_exposure),
            largest_position: fraction(largest),
            sector_exposure,
            positions,
            realized_pnl,
            unrealized_pnl,
            daily_pnl,
            margin_used: to_f64(snapshot.account.margin_used),
            margin_available: to_f64(snapshot.account.margin_available),
            correlation_risk,
            orders_today: snapshot.orders_today,
            symbol_trades_today,
            calculated_at: now,
            ..Self::default()
        };

        if returns.len() >= 2 {
            let mean = stats::mean(&returns).unwrap_or(0.0);
            let sd = stats::std_dev(&returns).unwrap_or(0.0);
            let downside = stats::downside_deviation(&returns).unwrap_or(0.0);
            let rf_daily = risk_free_rate / stats::TRADING_DAYS_PER_YEAR;

            metrics.volatility = sd * stats::TRADING_DAYS_PER_YEAR.sqrt();
            metrics.sharpe_ratio = stats::annualized_ratio(mean, rf_daily, sd);
            metrics.sortino_ratio = stats::annualized_ratio(mean, rf_daily, downside);
            metrics.var_95 = stats::historical_var(&returns, 0.95);
            metrics.var_99 = stats::historical_var(&returns, 0.99);
            metrics.max_drawdown = stats::max_drawdown(&values);
            metrics.current_drawdown = stats::current_drawdown(&values);
        }

        metrics
    }

    /// Open position in `ticker`, if any.
    #[must_use]
    pub fn position(&self, ticker: &str) -> Option<&Position> {
        self.positions.get(ticker)
    }

    /// Today's loss as a positive fraction of portfolio value; zero on a gain.
    #[must_use]
    pub fn daily_loss_fraction(&self) -> f64 {
        if self.portfolio_value <= 0.0 || self.daily_pnl >= 0.0 {
            return 0.0;
        }
        -self.daily_pnl / self.portfolio_value
    }

    /// Exposure to `sector` as a fraction of portfolio value.
    #[must_use]
    pub fn sector_fraction(&self, sector: &str) -> f64 {
        self.sector_exposure.get(sector).copied().unwrap_or(0.0)
    }

    /// Trades executed today in `ticker`.
    #[must_use]
    pub fn trades_today(&self, ticker: &str) -> u32 {
        self.symbol_trades_today.get(ticker).copied().unwrap_or(0)
    }
}
