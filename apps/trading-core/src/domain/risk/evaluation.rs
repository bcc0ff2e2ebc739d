//! Pure risk evaluation: pre-trade checks, position sizing and health.
//!
//! Every function here depends only on its arguments, so identical metrics
//! and limits always give identical results.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::assessment::{
    OrderProposal, PositionImpact, RiskCheckResult, RiskLevel, ViolationKind,
};
use super::health::{HealthStatus, PortfolioHealth};
use super::limits::{RiskLimits, RiskScoring, SizingParameters};
use super::metrics::RiskMetrics;
use super::portfolio::to_f64;
use crate::domain::order::OrderSide;

/// Sharpe ratio under which the health score is reduced.
const LOW_SHARPE: f64 = 0.5;

struct Findings {
    violations: Vec<ViolationKind>,
    reasons: Vec<String>,
    recommendations: Vec<String>,
}

impl Findings {
    const fn new() -> Self {
        Self {
            violations: Vec::new(),
            reasons: Vec::new(),
            recommendations: Vec::new(),
        }
    }

    fn violation(&mut self, kind: ViolationKind, reason: String, recommendation: impl Into<String>) {
        self.violations.push(kind);
        self.reasons.push(reason);
        self.recommendations.push(recommendation.into());
    }
}

fn pct(fraction: f64) -> f64 {
    fraction * 100.0
}

/// Run every pre-trade check for `proposal`.
///
/// When `enforce` is false the result is populated the same way but
/// `approved` is always true.
#[must_use]
pub fn evaluate_order(
    proposal: &OrderProposal,
    metrics: &RiskMetrics,
    limits: &RiskLimits,
    scoring: &RiskScoring,
    enforce: bool,
    now: DateTime<Utc>,
) -> RiskCheckResult {
    let pv = metrics.portfolio_value;
    let ratio = |value: f64| {
        if pv > 0.0 {
            value / pv
        } else if value > 0.0 {
            1.0
        } else {
            0.0
        }
    };

    let is_buy = proposal.side == OrderSide::Buy;
    let order_value = to_f64(proposal.order_value());
    let signed_delta = if is_buy { order_value } else { -order_value };

    let existing = metrics.position(&proposal.ticker);
    let existing_value = existing.map_or(0.0, |p| to_f64(p.market_value));
    let existing_quantity = existing.map_or(Decimal::ZERO, |p| p.quantity);
    let post_symbol_value = existing_value + signed_delta;
    let post_gross = metrics.gross_exposure - existing_value.abs() + post_symbol_value.abs();

    let impact = PositionImpact {
        order_value,
        position_fraction: ratio(order_value),
        post_trade_symbol_fraction: ratio(post_symbol_value.abs()),
        post_trade_exposure: ratio(post_gross),
    };

    let sector = proposal
        .sector
        .clone()
        .or_else(|| existing.and_then(|p| p.sector.clone()));

    let mut findings = Findings::new();
    let mut recommended_quantity = None;

    // 1. Position size
    if impact.position_fraction > limits.max_position_size {
        let fit = if proposal.price > Decimal::ZERO {
            (Decimal::try_from(limits.max_position_size * pv).unwrap_or(Decimal::ZERO)
                / proposal.price)
                .floor()
        } else {
            Decimal::ZERO
        };
        recommended_quantity = Some(fit);
        findings.violation(
            ViolationKind::PositionSize,
            format!(
                "Position size {:.1}% exceeds limit {:.1}%",
                pct(impact.position_fraction),
                pct(limits.max_position_size)
            ),
            format!("Reduce quantity to {fit} shares"),
        );
    }

    // 2. Daily loss
    let daily_loss = metrics.daily_loss_fraction();
    if daily_loss > 0.0 && daily_loss >= limits.max_daily_loss {
        findings.violation(
            ViolationKind::DailyLoss,
            format!(
                "Daily loss {:.1}% reached limit {:.1}%",
                pct(daily_loss),
                pct(limits.max_daily_loss)
            ),
            "Stop opening positions until the next session",
        );
    }

    // 3. Concentration
    if is_buy && existing.is_some() && impact.post_trade_symbol_fraction > limits.max_concentration {
        findings.violation(
            ViolationKind::Concentration,
            format!(
                "{} would be {:.1}% of the portfolio, limit {:.1}%",
                proposal.ticker,
                pct(impact.post_trade_symbol_fraction),
                pct(limits.max_concentration)
            ),
            format!("Diversify away from {}", proposal.ticker),
        );
    }

    // 4. Sector exposure
    if let Some(sector) = &sector {
        let post_sector = metrics.sector_fraction(sector) + ratio(order_value) * signed_delta.signum();
        if post_sector > limits.max_sector_exposure {
            findings.violation(
                ViolationKind::SectorExposure,
                format!(
                    "{sector} exposure would be {:.1}%, limit {:.1}%",
                    pct(post_sector),
                    pct(limits.max_sector_exposure)
                ),
                format!("Add exposure outside {sector}"),
            );
        }
    }

    // 5. Stop-loss (advisory)
    if is_buy && limits.require_stop_loss && proposal.stop_loss.is_none() {
        findings
            .reasons
            .push("Stop-loss required but not provided".to_string());
        findings
            .recommendations
            .push("Attach a stop-loss to the order".to_string());
    }

    // 6. Pattern day trade
    let symbol_trades = metrics.trades_today(&proposal.ticker);
    if symbol_trades >= limits.max_trades_per_symbol_per_day {
        findings.violation(
            ViolationKind::PatternDayTrade,
            format!(
                "{symbol_trades} trades in {} today, limit {}",
                proposal.ticker, limits.max_trades_per_symbol_per_day
            ),
            format!("Wait until the next session to trade {}", proposal.ticker),
        );
    }

    // 7. Volatility
    if metrics.volatility > limits.max_volatility {
        findings.violation(
            ViolationKind::Volatility,
            format!(
                "Portfolio volatility {:.1}% exceeds limit {:.1}%",
                pct(metrics.volatility),
                pct(limits.max_volatility)
            ),
            "Reduce position sizes while volatility is elevated",
        );
    }

    // 8. Margin (not needed to reduce an existing long)
    let needs_margin = is_buy || existing_quantity < proposal.quantity;
    if needs_margin && metrics.margin_available < order_value {
        findings.violation(
            ViolationKind::Margin,
            format!(
                "Order value ${order_value:.2} exceeds available margin ${:.2}",
                metrics.margin_available
            ),
            "Free margin or reduce the order",
        );
    }

    // 9. Correlation (same-sector share of holdings)
    if is_buy && let Some(sector) = &sector {
        let estimate = if metrics.gross_exposure > 0.0 {
            metrics.sector_fraction(sector) * pv / metrics.gross_exposure
        } else {
            0.0
        };
        if estimate > limits.max_correlation {
            findings.violation(
                ViolationKind::Correlation,
                format!(
                    "Estimated correlation {estimate:.2} with holdings exceeds limit {:.2}",
                    limits.max_correlation
                ),
                "Prefer symbols outside the dominant sector",
            );
        }
    }

    // 10. Drawdown
    if metrics.current_drawdown > limits.max_drawdown {
        findings.violation(
            ViolationKind::Drawdown,
            format!(
                "Drawdown {:.1}% exceeds limit {:.1}%",
                pct(metrics.current_drawdown),
                pct(limits.max_drawdown)
            ),
            "Trade smaller until the portfolio recovers",
        );
    }

    // 11. Daily order count
    if metrics.orders_today >= limits.max_orders_per_day {
        findings.violation(
            ViolationKind::DailyOrderLimit,
            format!(
                "{} orders today, limit {}",
                metrics.orders_today, limits.max_orders_per_day
            ),
            "Wait until the next session",
        );
    }

    // 12. Leverage
    if impact.post_trade_exposure > limits.max_leverage {
        findings.violation(
            ViolationKind::Leverage,
            format!(
                "Leverage would be {:.2}x, limit {:.2}x",
                impact.post_trade_exposure, limits.max_leverage
            ),
            "Reduce gross exposure before adding",
        );
    }

    // 13. Minimum hold time
    if !is_buy
        && limits.min_hold_minutes > 0
        && let Some(opened_at) = existing.and_then(|p| p.opened_at)
    {
        let held = (now - opened_at).num_minutes();
        if held < i64::from(limits.min_hold_minutes) {
            findings.violation(
                ViolationKind::MinHoldTime,
                format!(
                    "{} held {held} minutes, minimum {}",
                    proposal.ticker, limits.min_hold_minutes
                ),
                "Hold the position longer before selling",
            );
        }
    }

    let risk_score = score(&findings.violations, &impact, metrics, limits, scoring);
    let risk_level = RiskLevel::from_score(risk_score);

    let approved = !enforce
        || !(risk_level == RiskLevel::Critical
            || findings.violations.iter().any(|v| scoring.is_hard_block(*v)));

    RiskCheckResult {
        approved,
        risk_score,
        risk_level,
        violations: findings.violations,
        reasons: findings.reasons,
        recommendations: findings.recommendations,
        recommended_quantity,
        position_impact: impact,
    }
}

fn score(
    violations: &[ViolationKind],
    impact: &PositionImpact,
    metrics: &RiskMetrics,
    limits: &RiskLimits,
    scoring: &RiskScoring,
) -> f64 {
    let mut total: f64 = violations.iter().map(|v| scoring.weight(*v)).sum();

    let elevated = scoring.elevated_fraction;
    if metrics.volatility > limits.max_volatility * elevated {
        total += scoring.elevated_volatility;
    }
    if metrics.current_drawdown > limits.max_drawdown * elevated {
        total += scoring.elevated_drawdown;
    }
    if impact.position_fraction > limits.max_position_size * elevated {
        total += scoring.outsized_position;
    }

    total.clamp(0.0, 100.0)
}

/// Scale a position-size fraction for confidence and market conditions.
///
/// The result is always within `[0.25, 1.0] × max_position_size`.
#[must_use]
pub fn adjust_position_size(
    base_size: f64,
    confidence: f64,
    metrics: &RiskMetrics,
    has_position: bool,
    limits: &RiskLimits,
    sizing: &SizingParameters,
) -> f64 {
    let max = limits.max_position_size;
    if max.is_nan() || max <= 0.0 {
        return 0.0;
    }
    let floor = max * 0.25;

    let confidence = if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 100.0)
    };
    let mut adjusted = base_size * (0.5 + 0.5 * confidence / 100.0);

    if metrics.volatility > sizing.high_volatility {
        adjusted *= 0.7;
    } else if metrics.volatility < sizing.low_volatility {
        adjusted *= 1.2;
    }
    if metrics.current_drawdown > sizing.drawdown_threshold {
        adjusted *= 0.5;
    }
    if has_position {
        adjusted *= 0.8;
    }

    let blended = sizing
        .adjusted_weight
        .mul_add(adjusted, sizing.kelly_weight * sizing.kelly_fraction());

    if blended.is_nan() {
        return floor;
    }
    blended.clamp(floor, max)
}

/// Score the portfolio as a whole.
#[must_use]
pub fn assess_portfolio_health(
    metrics: &RiskMetrics,
    limits: &RiskLimits,
    now: DateTime<Utc>,
) -> PortfolioHealth {
    let mut score = 100.0_f64;
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();
    let mut deduct = |points: f64, issue: String, recommendation: &str| {
        score -= points;
        issues.push(issue);
        recommendations.push(recommendation.to_string());
    };

    if metrics.total_exposure > limits.max_total_exposure {
        deduct(
            20.0,
            format!("Gross exposure {:.1}% above limit", pct(metrics.total_exposure)),
            "Reduce gross exposure",
        );
    }
    if metrics.largest_position > limits.max_concentration {
        deduct(
            15.0,
            format!("Largest position {:.1}% of portfolio", pct(metrics.largest_position)),
            "Trim the largest position",
        );
    }
    if metrics.volatility > limits.max_volatility {
        deduct(
            15.0,
            format!("Volatility {:.1}% above limit", pct(metrics.volatility)),
            "Lower exposure to volatile names",
        );
    }
    if metrics.volatility > 0.0 && metrics.sharpe_ratio < LOW_SHARPE {
        deduct(
            10.0,
            format!("Sharpe ratio {:.2} is low", metrics.sharpe_ratio),
            "Review strategy performance",
        );
    }
    if metrics.current_drawdown > limits.max_drawdown {
        deduct(
            20.0,
            format!("Drawdown {:.1}% above limit", pct(metrics.current_drawdown)),
            "Cut risk until the drawdown recovers",
        );
    } else if metrics.current_drawdown > limits.max_drawdown * 0.5 {
        deduct(
            10.0,
            format!("Drawdown {:.1}% building", pct(metrics.current_drawdown)),
            "Watch the drawdown closely",
        );
    }
    let daily_loss = metrics.daily_loss_fraction();
    if daily_loss > 0.0 && daily_loss >= limits.max_daily_loss {
        deduct(
            20.0,
            format!("Daily loss {:.1}% at limit", pct(daily_loss)),
            "Halt new positions for the day",
        );
    } else if daily_loss >= limits.max_daily_loss * 0.5 && daily_loss > 0.0 {
        deduct(
            10.0,
            format!("Daily loss {:.1}%", pct(daily_loss)),
            "Be selective with new positions today",
        );
    }

    let score = score.max(0.0);
    PortfolioHealth {
        score,
        status: HealthStatus::from_score(score),
        issues,
        recommendations,
        assessed_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::risk::portfolio::Position;
    use chrono::Duration;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn metrics() -> RiskMetrics {
        RiskMetrics {
            portfolio_value: 100_000.0,
            margin_available: 100_000.0,
            calculated_at: Utc::now(),
            ..RiskMetrics::default()
        }
    }

    fn limits() -> RiskLimits {
        RiskLimits {
            max_position_size: 0.20,
            ..RiskLimits::default()
        }
    }

    fn evaluate(proposal: &OrderProposal, metrics: &RiskMetrics) -> RiskCheckResult {
        evaluate_order(proposal, metrics, &limits(), &RiskScoring::default(), true, Utc::now())
    }

    #[test]
    fn test_small_order_with_stop_is_clean() {
        let proposal =
            OrderProposal::new("AAPL", OrderSide::Buy, dec!(10), dec!(150)).with_stop_loss(dec!(145));
        let result = evaluate(&proposal, &metrics());

        assert!(result.approved);
        assert!(result.violations.is_empty());
        assert!(result.reasons.is_empty());
        assert_eq!(result.risk_level, RiskLevel::Low);
        assert!((result.position_impact.position_fraction - 0.015).abs() < 1e-12);
    }

    #[test]
    fn test_oversized_position_rejected_with_recommendation() {
        let proposal =
            OrderProposal::new("AAPL", OrderSide::Buy, dec!(200), dec!(150)).with_stop_loss(dec!(145));
        let result = evaluate(&proposal, &metrics());

        assert!(!result.approved);
        assert!(result.has_violation(ViolationKind::PositionSize));
        // 20_000 / 150
        assert_eq!(result.recommended_quantity, Some(dec!(133)));
    }

    #[test]
    fn test_daily_loss_halts_any_order() {
        let halted = RiskMetrics {
            daily_pnl: -6_000.0,
            ..metrics()
        };
        let tiny = OrderProposal::new("F", OrderSide::Buy, dec!(1), dec!(10)).with_stop_loss(dec!(9));
        let result = evaluate(&tiny, &halted);

        assert!(!result.approved);
        assert!(result.has_violation(ViolationKind::DailyLoss));
        assert!(result.risk_level < RiskLevel::Critical);
    }

    #[test]
    fn test_missing_stop_is_reason_not_violation() {
        let proposal = OrderProposal::new("AAPL", OrderSide::Buy, dec!(10), dec!(150));
        let result = evaluate(&proposal, &metrics());

        assert!(result.approved);
        assert!(result.violations.is_empty());
        assert_eq!(result.reasons.len(), 1);
    }

    #[test]
    fn test_soft_violation_approved_when_enforced() {
        let volatile = RiskMetrics {
            volatility: 0.45,
            ..metrics()
        };
        let proposal =
            OrderProposal::new("AAPL", OrderSide::Buy, dec!(10), dec!(150)).with_stop_loss(dec!(145));
        let result = evaluate(&proposal, &volatile);

        assert!(result.approved);
        assert_eq!(result.violations, vec![ViolationKind::Volatility]);
        // weight 15 + elevated 10
        assert!((result.risk_score - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_enforcement_off_never_rejects() {
        let halted = RiskMetrics {
            daily_pnl: -6_000.0,
            margin_available: 0.0,
            ..metrics()
        };
        let proposal = OrderProposal::new("AAPL", OrderSide::Buy, dec!(200), dec!(150));
        let result = evaluate_order(
            &proposal,
            &halted,
            &limits(),
            &RiskScoring::default(),
            false,
            Utc::now(),
        );

        assert!(result.approved);
        assert!(result.has_violation(ViolationKind::Margin));
        assert!(result.has_violation(ViolationKind::DailyLoss));
    }

    #[test]
    fn test_pattern_day_trade_and_order_limit() {
        let mut busy = metrics();
        busy.symbol_trades_today.insert("TSLA".to_string(), 3);
        busy.orders_today = 50;
        let proposal =
            OrderProposal::new("TSLA", OrderSide::Buy, dec!(1), dec!(200)).with_stop_loss(dec!(190));
        let result = evaluate(&proposal, &busy);

        assert!(!result.approved);
        assert!(result.has_violation(ViolationKind::PatternDayTrade));
        assert!(result.has_violation(ViolationKind::DailyOrderLimit));
    }

    #[test]
    fn test_concentration_and_sector_on_existing_position() {
        let mut held = metrics();
        held.positions.insert(
            "NVDA".to_string(),
            Position::new("NVDA", dec!(200), dec!(100), dec!(110)).with_sector("Technology"),
        );
        held.gross_exposure = 22_000.0;
        held.sector_exposure.insert("Technology".to_string(), 0.22);

        // 19_470 keeps the order under the 20% position limit
        let proposal =
            OrderProposal::new("NVDA", OrderSide::Buy, dec!(177), dec!(110)).with_stop_loss(dec!(100));
        let result = evaluate(&proposal, &held);

        assert!(result.has_violation(ViolationKind::Concentration));
        assert!(result.has_violation(ViolationKind::SectorExposure));
        assert!(result.has_violation(ViolationKind::Correlation));
        assert!(!result.has_violation(ViolationKind::PositionSize));
    }

    #[test]
    fn test_sell_closing_long_needs_no_margin() {
        let mut held = metrics();
        held.margin_available = 0.0;
        held.positions.insert(
            "AAPL".to_string(),
            Position::new("AAPL", dec!(100), dec!(140), dec!(150)),
        );
        let proposal = OrderProposal::new("AAPL", OrderSide::Sell, dec!(50), dec!(150));
        let result = evaluate(&proposal, &held);

        assert!(!result.has_violation(ViolationKind::Margin));
    }

    #[test]
    fn test_min_hold_time_on_sell() {
        let now = Utc::now();
        let mut held = metrics();
        held.positions.insert(
            "AAPL".to_string(),
            Position::new("AAPL", dec!(100), dec!(140), dec!(150)).opened_at(now - Duration::minutes(5)),
        );
        let limits = RiskLimits {
            min_hold_minutes: 30,
            ..limits()
        };
        let proposal = OrderProposal::new("AAPL", OrderSide::Sell, dec!(100), dec!(150));
        let result = evaluate_order(&proposal, &held, &limits, &RiskScoring::default(), true, now);

        assert!(result.has_violation(ViolationKind::MinHoldTime));
        assert!(result.approved);
    }

    #[test]
    fn test_critical_score_rejects_without_hard_block() {
        let stressed = RiskMetrics {
            volatility: 0.5,
            current_drawdown: 0.3,
            gross_exposure: 150_000.0,
            ..metrics()
        };
        let scoring = RiskScoring {
            hard_block: Vec::new(),
            volatility: 30.0,
            drawdown: 30.0,
            ..RiskScoring::default()
        };
        let proposal =
            OrderProposal::new("AAPL", OrderSide::Buy, dec!(10), dec!(150)).with_stop_loss(dec!(145));
        let result = evaluate_order(&proposal, &stressed, &limits(), &scoring, true, Utc::now());

        // 30 + 30 + 15 leverage + 10 + 10
        assert_eq!(result.risk_level, RiskLevel::Critical);
        assert!(!result.approved);
    }

    #[test]
    fn test_adjust_position_size_examples() {
        let limits = RiskLimits::default();
        let sizing = SizingParameters::default();
        let calm = RiskMetrics {
            volatility: 0.15,
            ..metrics()
        };

        // 0.7 * 0.10 + 0.3 * 0.25 = 0.145, clamped to 0.10
        let full = adjust_position_size(0.10, 100.0, &calm, false, &limits, &sizing);
        assert!((full - 0.10).abs() < 1e-12);

        let zero_base = adjust_position_size(0.0, 0.0, &calm, false, &limits, &sizing);
        // 0.3 * 0.25 = 0.075
        assert!((zero_base - 0.075).abs() < 1e-12);
    }

    #[test]
    fn test_adjust_position_size_nan_inputs() {
        let size = adjust_position_size(
            f64::NAN,
            f64::NAN,
            &metrics(),
            false,
            &RiskLimits::default(),
            &SizingParameters::default(),
        );
        assert!((size - 0.025).abs() < 1e-12);
    }

    #[test]
    fn test_health_of_quiet_portfolio() {
        let health = assess_portfolio_health(&metrics(), &RiskLimits::default(), Utc::now());
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!((health.score - 100.0).abs() < f64::EPSILON);
        assert!(health.issues.is_empty());
    }

    #[test]
    fn test_health_deductions() {
        let stressed = RiskMetrics {
            total_exposure: 1.3,
            largest_position: 0.4,
            volatility: 0.5,
            sharpe_ratio: -0.2,
            current_drawdown: 0.2,
            daily_pnl: -6_000.0,
            ..metrics()
        };
        let health = assess_portfolio_health(&stressed, &RiskLimits::default(), Utc::now());

        // 100 - 20 - 15 - 15 - 10 - 20 - 20
        assert!(health.score.abs() < f64::EPSILON);
        assert_eq!(health.status, HealthStatus::Critical);
        assert_eq!(health.issues.len(), 6);
        assert_eq!(health.recommendations.len(), 6);
    }

    fn any_metrics() -> impl Strategy<Value = RiskMetrics> {
        (0.0..1.0_f64, 0.0..0.5_f64).prop_map(|(volatility, current_drawdown)| RiskMetrics {
            volatility,
            current_drawdown,
            ..RiskMetrics::default()
        })
    }

    proptest! {
        #[test]
        fn prop_adjusted_size_within_bounds(
            base in 0.0..1.0_f64,
            confidence in 0.0..=100.0_f64,
            has_position in any::<bool>(),
            max in 0.01..0.5_f64,
            m in any_metrics(),
        ) {
            let limits = RiskLimits { max_position_size: max, ..RiskLimits::default() };
            let size = adjust_position_size(base, confidence, &m, has_position, &limits, &SizingParameters::default());
            prop_assert!(size >= max * 0.25 - 1e-12);
            prop_assert!(size <= max + 1e-12);
        }

        #[test]
        fn prop_check_is_deterministic(
            quantity in 1u32..2_000,
            daily_pnl in -10_000.0..10_000.0_f64,
            m in any_metrics(),
        ) {
            let metrics = RiskMetrics { portfolio_value: 100_000.0, daily_pnl, margin_available: 50_000.0, ..m };
            let proposal = OrderProposal::new("AAPL", OrderSide::Buy, Decimal::from(quantity), dec!(150));
            let now = Utc::now();
            let a = evaluate_order(&proposal, &metrics, &limits(), &RiskScoring::default(), true, now);
            let b = evaluate_order(&proposal, &metrics, &limits(), &RiskScoring::default(), true, now);
            prop_assert_eq!(a, b);
        }
    }
}
