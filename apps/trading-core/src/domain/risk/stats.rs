//! Statistical helpers for portfolio risk figures.
//!
//! Inputs are daily portfolio values or daily returns. Every function is
//! total: too little data yields `None` or zero rather than an error.

/// Trading days per year, used to annualize daily figures.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Arithmetic mean.
#[must_use]
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n − 1 denominator).
#[must_use]
pub fn std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let avg = mean(values)?;
    let variance =
        values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(variance.sqrt())
}

/// Downside deviation: root mean square of negative returns over all observations.
#[must_use]
pub fn downside_deviation(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let sum_sq: f64 = values.iter().filter(|v| **v < 0.0).map(|v| v * v).sum();
    Some((sum_sq / values.len() as f64).sqrt())
}

/// Simple returns between consecutive values. Non-positive bases are skipped.
#[must_use]
pub fn daily_returns(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect()
}

/// Historical Value-at-Risk as a positive loss fraction.
///
/// `confidence` is e.g. 0.95; the result is the loss not exceeded on that
/// share of days.
#[must_use]
pub fn historical_var(returns: &[f64], confidence: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mut sorted = returns.to_vec();
    sorted.sort_by(f64::total_cmp);

    let tail = (1.0 - confidence).clamp(0.0, 1.0);
    let index = ((sorted.len() as f64) * tail).floor() as usize;
    let quantile = sorted[index.min(sorted.len() - 1)];
    (-quantile).max(0.0)
}

/// Largest peak-to-trough decline as a fraction of the peak.
#[must_use]
pub fn max_drawdown(values: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0_f64;
    for &value in values {
        peak = peak.max(value);
        if peak > 0.0 {
            worst = worst.max((peak - value) / peak);
        }
    }
    worst
}

/// Decline of the last value from the running peak.
#[must_use]
pub fn current_drawdown(values: &[f64]) -> f64 {
    let Some(&last) = values.last() else {
        return 0.0;
    };
    let peak = values.iter().copied().fold(f64::MIN, f64::max);
    if peak <= 0.0 {
        return 0.0;
    }
    ((peak - last) / peak).max(0.0)
}

/// Annualized risk-adjusted return over a daily deviation figure.
#[must_use]
pub fn annualized_ratio(mean_return: f64, risk_free_daily: f64, deviation: f64) -> f64 {
    if deviation <= f64::EPSILON {
        return 0.0;
    }
    (mean_return - risk_free_daily) / deviation * TRADING_DAYS_PER_YEAR.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[10.0, 20.0, 30.0]), Some(20.0));
        assert_eq!(mean(&[]), None);
    }

    #[test]
    fn test_std_dev_sample() {
        let sd = std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((sd - 2.138_089_935).abs() < 1e-6);
        assert_eq!(std_dev(&[1.0]), None);
    }

    #[test]
    fn test_downside_deviation_ignores_gains() {
        let dd = downside_deviation(&[0.02, -0.01, 0.03, -0.03]).unwrap();
        // sqrt((0.0001 + 0.0009) / 4)
        assert!((dd - 0.000_25_f64.sqrt()).abs() < 1e-12);
        assert_eq!(downside_deviation(&[0.01, 0.02]), Some(0.0));
    }

    #[test]
    fn test_daily_returns() {
        let returns = daily_returns(&[100.0, 110.0, 99.0]);
        assert_eq!(returns.len(), 2);
        assert!((returns[0] - 0.10).abs() < 1e-12);
        assert!((returns[1] + 0.10).abs() < 1e-12);
        assert!(daily_returns(&[100.0]).is_empty());
    }

    #[test]
    fn test_historical_var() {
        let returns: Vec<f64> = (0..100).map(|i| f64::from(i - 50) / 1000.0).collect();
        // index 5 of the sorted -0.050..0.049 series
        assert!((historical_var(&returns, 0.95) - 0.045).abs() < 1e-12);
        assert!(historical_var(&returns, 0.99) >= historical_var(&returns, 0.95));
        assert_eq!(historical_var(&[0.01], 0.95), 0.0);
    }

    #[test]
    fn test_drawdowns() {
        let values = [100.0, 120.0, 90.0, 110.0, 108.0];
        assert!((max_drawdown(&values) - 0.25).abs() < 1e-12);
        assert!((current_drawdown(&values) - 0.1).abs() < 1e-12);
        assert_eq!(max_drawdown(&[]), 0.0);
        assert_eq!(current_drawdown(&[]), 0.0);
    }

    #[test]
    fn test_annualized_ratio_zero_deviation() {
        assert_eq!(annualized_ratio(0.01, 0.0, 0.0), 0.0);
        let ratio = annualized_ratio(0.001, 0.0, 0.01);
        assert!((ratio - 0.1 * TRADING_DAYS_PER_YEAR.sqrt()).abs() < 1e-9);
    }
}
