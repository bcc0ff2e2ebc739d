//! Risk limits and the tunable parameters of scoring and sizing.
//!
//! All three are plain configuration: read-only during a run, swapped as a
//! whole between runs.

use serde::{Deserialize, Serialize};

use super::assessment::ViolationKind;

/// Portfolio risk limits. Fractions are of total portfolio value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Max value of a single new position.
    #[serde(default = "default_max_position_size")]
    pub max_position_size: f64,
    /// Max loss in one day before new orders are refused.
    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss: f64,
    /// Max gross exposure.
    #[serde(default = "default_max_total_exposure")]
    pub max_total_exposure: f64,
    /// Max post-trade value held in one symbol.
    #[serde(default = "default_max_concentration")]
    pub max_concentration: f64,
    /// Max post-trade exposure to one sector.
    #[serde(default = "default_max_sector_exposure")]
    pub max_sector_exposure: f64,
    /// Max estimated correlation with existing holdings.
    #[serde(default = "default_max_correlation")]
    pub max_correlation: f64,
    /// Max annualized portfolio volatility.
    #[serde(default = "default_max_volatility")]
    pub max_volatility: f64,
    /// Max drawdown from peak.
    #[serde(default = "default_max_drawdown")]
    pub max_drawdown: f64,
    /// Max orders across all symbols per day.
    #[serde(default = "default_max_orders_per_day")]
    pub max_orders_per_day: u32,
    /// Max trades in one symbol per day (pattern-day-trade guard).
    #[serde(default = "default_max_trades_per_symbol_per_day")]
    pub max_trades_per_symbol_per_day: u32,
    /// Minimum minutes a position is held before it may be sold.
    #[serde(default)]
    pub min_hold_minutes: u32,
    /// Whether BUY orders need a stop-loss.
    #[serde(default = "default_require_stop_loss")]
    pub require_stop_loss: bool,
    /// Max gross exposure as a multiple of portfolio value.
    #[serde(default = "default_max_leverage")]
    pub max_leverage: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_size: default_max_position_size(),
            max_daily_loss: default_max_daily_loss(),
            max_total_exposure: default_max_total_exposure(),
            max_concentration: default_max_concentration(),
            max_sector_exposure: default_max_sector_exposure(),
            max_correlation: default_max_correlation(),
            max_volatility: default_max_volatility(),
            max_drawdown: default_max_drawdown(),
            max_orders_per_day: default_max_orders_per_day(),
            max_trades_per_symbol_per_day: default_max_trades_per_symbol_per_day(),
            min_hold_minutes: 0,
            require_stop_loss: default_require_stop_loss(),
            max_leverage: default_max_leverage(),
        }
    }
}

const fn default_max_position_size() -> f64 {
    0.10
}

const fn default_max_daily_loss() -> f64 {
    0.05
}

const fn default_max_total_exposure() -> f64 {
    1.0
}

const fn default_max_concentration() -> f64 {
    0.25
}

const fn default_max_sector_exposure() -> f64 {
    0.40
}

const fn default_max_correlation() -> f64 {
    0.70
}

const fn default_max_volatility() -> f64 {
    0.30
}

const fn default_max_drawdown() -> f64 {
    0.15
}

const fn default_max_orders_per_day() -> u32 {
    50
}

const fn default_max_trades_per_symbol_per_day() -> u32 {
    3
}

const fn default_require_stop_loss() -> bool {
    true
}

const fn default_max_leverage() -> f64 {
    1.0
}

/// Weights that turn violations and elevated metrics into a 0-100 score.
///
/// Violations listed in `hard_block` reject regardless of score. The default
/// list includes `POSITION_SIZE`, so oversized orders are refused outright.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskScoring {
    /// Position size over the limit.
    pub position_size: f64,
    /// Daily loss limit reached.
    pub daily_loss: f64,
    /// Symbol concentration over the limit.
    pub concentration: f64,
    /// Sector exposure over the limit.
    pub sector_exposure: f64,
    /// Same-symbol trade count reached.
    pub pattern_day_trade: f64,
    /// Volatility over the limit.
    pub volatility: f64,
    /// Not enough margin for the order.
    pub margin: f64,
    /// Correlated with existing holdings.
    pub correlation: f64,
    /// Drawdown over the limit.
    pub drawdown: f64,
    /// Daily order count reached.
    pub daily_order_limit: f64,
    /// Leverage over the limit.
    pub leverage: f64,
    /// Position sold before the minimum hold time.
    pub min_hold_time: f64,
    /// Added when volatility is above `elevated_fraction` of its limit.
    pub elevated_volatility: f64,
    /// Added when drawdown is above `elevated_fraction` of its limit.
    pub elevated_drawdown: f64,
    /// Added when the order alone is above `elevated_fraction` of the position limit.
    pub outsized_position: f64,
    /// Fraction of a limit at which a metric counts as elevated.
    pub elevated_fraction: f64,
    /// Violations that reject an order outright when enforcement is on.
    ///
    /// Defaults to daily loss, margin and pattern day trading plus position
    /// size and the daily order limit. Position size is blocking so an
    /// oversized order is refused rather than approved with a warning; drop
    /// `POSITION_SIZE` from this list to let the score decide instead.
    pub hard_block: Vec<ViolationKind>,
}

impl Default for RiskScoring {
    fn default() -> Self {
        Self {
            position_size: 20.0,
            daily_loss: 40.0,
            concentration: 15.0,
            sector_exposure: 10.0,
            pattern_day_trade: 25.0,
            volatility: 15.0,
            margin: 40.0,
            correlation: 10.0,
            drawdown: 20.0,
            daily_order_limit: 25.0,
            leverage: 15.0,
            min_hold_time: 5.0,
            elevated_volatility: 10.0,
            elevated_drawdown: 10.0,
            outsized_position: 5.0,
            elevated_fraction: 0.8,
            hard_block: vec![
                ViolationKind::DailyLoss,
                ViolationKind::Margin,
                ViolationKind::PatternDayTrade,
                ViolationKind::PositionSize,
                ViolationKind::DailyOrderLimit,
            ],
        }
    }
}

impl RiskScoring {
    /// Score weight of one violation.
    #[must_use]
    pub const fn weight(&self, kind: ViolationKind) -> f64 {
        match kind {
            ViolationKind::PositionSize => self.position_size,
            ViolationKind::DailyLoss => self.daily_loss,
            ViolationKind::Concentration => self.concentration,
            ViolationKind::SectorExposure => self.sector_exposure,
            ViolationKind::PatternDayTrade => self.pattern_day_trade,
            ViolationKind::Volatility => self.volatility,
            ViolationKind::Margin => self.margin,
            ViolationKind::Correlation => self.correlation,
            ViolationKind::Drawdown => self.drawdown,
            ViolationKind::DailyOrderLimit => self.daily_order_limit,
            ViolationKind::Leverage => self.leverage,
            ViolationKind::MinHoldTime => self.min_hold_time,
        }
    }

    /// Whether `kind` rejects an order regardless of score.
    #[must_use]
    pub fn is_hard_block(&self, kind: ViolationKind) -> bool {
        self.hard_block.contains(&kind)
    }
}

/// Inputs of the position-size adjustment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingParameters {
    /// Assumed probability that a trade wins.
    pub win_rate: f64,
    /// Assumed average win divided by average loss.
    pub win_loss_ratio: f64,
    /// Upper bound on the Kelly fraction.
    pub kelly_cap: f64,
    /// Share of the confidence/regime-adjusted size in the blend.
    pub adjusted_weight: f64,
    /// Share of the Kelly size in the blend.
    pub kelly_weight: f64,
    /// Volatility above which sizes shrink.
    pub high_volatility: f64,
    /// Volatility below which sizes grow.
    pub low_volatility: f64,
    /// Drawdown above which sizes halve.
    pub drawdown_threshold: f64,
}

impl Default for SizingParameters {
    fn default() -> Self {
        Self {
            win_rate: 0.55,
            win_loss_ratio: 1.5,
            kelly_cap: 0.25,
            adjusted_weight: 0.7,
            kelly_weight: 0.3,
            high_volatility: 0.20,
            low_volatility: 0.10,
            drawdown_threshold: 0.10,
        }
    }
}

impl SizingParameters {
    /// Kelly fraction `(p·b − q) / b`, floored at zero and capped.
    #[must_use]
    pub fn kelly_fraction(&self) -> f64 {
        if self.win_loss_ratio <= 0.0 {
            return 0.0;
        }
        let p = self.win_rate;
        let q = 1.0 - p;
        let kelly = p.mul_add(self.win_loss_ratio, -q) / self.win_loss_ratio;
        kelly.clamp(0.0, self.kelly_cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = RiskLimits::default();
        assert!((limits.max_position_size - 0.10).abs() < f64::EPSILON);
        assert!((limits.max_daily_loss - 0.05).abs() < f64::EPSILON);
        assert_eq!(limits.max_trades_per_symbol_per_day, 3);
        assert!(limits.require_stop_loss);
    }

    #[test]
    fn test_limits_deserialize_partial() {
        let yaml = "max_position_size: 0.2\nmin_hold_minutes: 30\n";
        let limits: RiskLimits = serde_yaml_bw::from_str(yaml).unwrap();
        assert!((limits.max_position_size - 0.2).abs() < f64::EPSILON);
        assert_eq!(limits.min_hold_minutes, 30);
        assert!((limits.max_drawdown - 0.15).abs() < f64::EPSILON);
    }

    #[test]
    fn test_default_hard_block_set() {
        let scoring = RiskScoring::default();
        assert!(scoring.is_hard_block(ViolationKind::DailyLoss));
        assert!(scoring.is_hard_block(ViolationKind::Margin));
        assert!(scoring.is_hard_block(ViolationKind::PatternDayTrade));
        assert!(scoring.is_hard_block(ViolationKind::PositionSize));
        assert!(!scoring.is_hard_block(ViolationKind::Volatility));
        assert!(scoring.weight(ViolationKind::Margin) >= scoring.weight(ViolationKind::Drawdown));
    }

    #[test]
    fn test_kelly_fraction_defaults_hit_cap() {
        // (0.55 * 1.5 - 0.45) / 1.5 = 0.25
        let sizing = SizingParameters::default();
        assert!((sizing.kelly_fraction() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_kelly_fraction_never_negative() {
        let sizing = SizingParameters {
            win_rate: 0.3,
            win_loss_ratio: 1.0,
            ..SizingParameters::default()
        };
        assert_eq!(sizing.kelly_fraction(), 0.0);
    }
}
