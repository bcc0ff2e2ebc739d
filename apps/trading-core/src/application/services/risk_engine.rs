//! Risk Engine Service
//!
//! Computes portfolio risk metrics from the read model, caches them for a
//! bounded time, and gates proposed orders against the configured limits.
//! The evaluation itself is pure (`domain::risk`); this service owns the
//! I/O, the cache and the swappable settings.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveTime, Utc};
use parking_lot::RwLock;
use thiserror::Error;

use crate::application::ports::{PortfolioReadModel, ReadModelError};
use crate::domain::risk::{
    OrderProposal, PortfolioHealth, PortfolioSnapshot, RiskCheckResult, RiskLimits, RiskMetrics,
    RiskScoring, SizingParameters, adjust_position_size, assess_portfolio_health, evaluate_order,
};
use crate::observability;

/// Everything the risk engine is configured with.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskSettings {
    /// Portfolio limits.
    pub limits: RiskLimits,
    /// Score weights and hard blocks.
    pub scoring: RiskScoring,
    /// Position sizing parameters.
    pub sizing: SizingParameters,
    /// Whether failed checks reject orders.
    pub enforce: bool,
    /// How long computed metrics are served from cache.
    pub cache_ttl: Duration,
    /// Days of daily portfolio values read for return statistics.
    pub lookback_days: u32,
    /// Annual risk-free rate for Sharpe and Sortino.
    pub risk_free_rate: f64,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            limits: RiskLimits::default(),
            scoring: RiskScoring::default(),
            sizing: SizingParameters::default(),
            enforce: true,
            cache_ttl: Duration::from_secs(60),
            lookback_days: 252,
            risk_free_rate: 0.0,
        }
    }
}

/// Risk engine errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RiskError {
    /// The portfolio read model failed.
    #[error("risk metrics unavailable: {0}")]
    ReadModel(#[from] ReadModelError),
}

#[derive(Debug)]
struct CachedMetrics {
    metrics: Arc<RiskMetrics>,
    computed: Instant,
}

/// Risk engine over a portfolio read model.
pub struct RiskEngine<P>
where
    P: PortfolioReadModel,
{
    read_model: Arc<P>,
    settings: RwLock<Arc<RiskSettings>>,
    cache: RwLock<Option<CachedMetrics>>,
    /// Serializes refreshes so concurrent stale reads compute once.
    refresh: tokio::sync::Mutex<()>,
}

impl<P> RiskEngine<P>
where
    P: PortfolioReadModel,
{
    /// Create a risk engine.
    #[must_use]
    pub fn new(read_model: Arc<P>, settings: RiskSettings) -> Self {
        Self {
            read_model,
            settings: RwLock::new(Arc::new(settings)),
            cache: RwLock::new(None),
            refresh: tokio::sync::Mutex::new(()),
        }
    }

    /// Current settings.
    #[must_use]
    pub fn settings(&self) -> Arc<RiskSettings> {
        Arc::clone(&self.settings.read())
    }

    /// Swap the limits. Checks already running keep the limits they started with.
    pub fn replace_limits(&self, limits: RiskLimits) {
        let mut settings = self.settings.write();
        let mut next = (**settings).clone();
        next.limits = limits;
        *settings = Arc::new(next);
        tracing::info!("Risk limits replaced");
    }

    /// Swap every setting and drop cached metrics.
    pub fn replace_settings(&self, settings: RiskSettings) {
        *self.settings.write() = Arc::new(settings);
        self.cache.write().take();
        tracing::info!("Risk settings replaced");
    }

    /// Drop cached metrics so the next check reads the portfolio again.
    ///
    /// Called when an order reaches the gateway or an execution is booked.
    pub fn invalidate_metrics(&self) {
        if self.cache.write().take().is_some() {
            tracing::trace!("Cached risk metrics invalidated");
        }
    }

    /// Current risk metrics, served from cache unless stale or `force_refresh`.
    pub async fn calculate_risk_metrics(
        &self,
        force_refresh: bool,
    ) -> Result<Arc<RiskMetrics>, RiskError> {
        let ttl = self.settings.read().cache_ttl;
        if !force_refresh && let Some(metrics) = self.fresh_metrics(ttl) {
            return Ok(metrics);
        }

        let _refresh = self.refresh.lock().await;
        if !force_refresh && let Some(metrics) = self.fresh_metrics(ttl) {
            return Ok(metrics);
        }

        let settings = self.settings();
        let now = Utc::now();
        let snapshot = self.load_snapshot(&settings, now).await?;
        let metrics = Arc::new(RiskMetrics::compute(&snapshot, settings.risk_free_rate, now));

        tracing::debug!(
            portfolio_value = metrics.portfolio_value,
            total_exposure = metrics.total_exposure,
            volatility = metrics.volatility,
            current_drawdown = metrics.current_drawdown,
            daily_pnl = metrics.daily_pnl,
            "Risk metrics refreshed"
        );

        *self.cache.write() = Some(CachedMetrics {
            metrics: Arc::clone(&metrics),
            computed: Instant::now(),
        });
        Ok(metrics)
    }

    fn fresh_metrics(&self, ttl: Duration) -> Option<Arc<RiskMetrics>> {
        self.cache
            .read()
            .as_ref()
            .filter(|cached| cached.computed.elapsed() < ttl)
            .map(|cached| Arc::clone(&cached.metrics))
    }

    async fn load_snapshot(
        &self,
        settings: &RiskSettings,
        now: DateTime<Utc>,
    ) -> Result<PortfolioSnapshot, ReadModelError> {
        let start_of_day = now.date_naive().and_time(NaiveTime::MIN).and_utc();

        let account = self.read_model.account().await?;
        let mut positions = self.read_model.positions().await?;
        for position in positions.iter_mut().filter(|p| p.sector.is_none()) {
            position.sector = self.read_model.sector_of(&position.ticker).await?;
        }
        let trades_today = self.read_model.trades_since(start_of_day).await?;
        let daily_values = self.read_model.daily_values(settings.lookback_days).await?;
        let orders_today = self.read_model.order_count_since(start_of_day).await?;

        Ok(PortfolioSnapshot {
            account,
            positions,
            trades_today,
            daily_values,
            orders_today,
        })
    }

    /// Run the pre-trade checks for a proposed order.
    ///
    /// A proposal without a sector is looked up in the read model.
    pub async fn check_order(&self, proposal: &OrderProposal) -> Result<RiskCheckResult, RiskError> {
        let mut proposal = proposal.clone();
        if proposal.sector.is_none() {
            proposal.sector = self.read_model.sector_of(&proposal.ticker).await?;
        }

        let metrics = self.calculate_risk_metrics(false).await?;
        let settings = self.settings();
        let result = evaluate_order(
            &proposal,
            &metrics,
            &settings.limits,
            &settings.scoring,
            settings.enforce,
            Utc::now(),
        );

        observability::record_risk_check(
            result.approved,
            &result.risk_level.to_string(),
            result.risk_score,
        );
        if result.approved {
            tracing::debug!(
                ticker = %proposal.ticker,
                side = %proposal.side,
                quantity = %proposal.quantity,
                risk_score = result.risk_score,
                risk_level = %result.risk_level,
                violations = result.violations.len(),
                "Order passed risk checks"
            );
        } else {
            for violation in &result.violations {
                observability::record_risk_rejection(violation.as_str());
            }
            tracing::warn!(
                ticker = %proposal.ticker,
                side = %proposal.side,
                quantity = %proposal.quantity,
                risk_score = result.risk_score,
                risk_level = %result.risk_level,
                reasons = ?result.reasons,
                "Order rejected by risk checks"
            );
        }

        Ok(result)
    }

    /// Scale a position-size fraction for confidence and current conditions.
    pub async fn apply_risk_adjustment(
        &self,
        ticker: &str,
        base_size: f64,
        confidence: f64,
    ) -> Result<f64, RiskError> {
        let metrics = self.calculate_risk_metrics(false).await?;
        let settings = self.settings();
        let has_position = metrics.position(ticker).is_some();

        let adjusted = adjust_position_size(
            base_size,
            confidence,
            &metrics,
            has_position,
            &settings.limits,
            &settings.sizing,
        );

        tracing::debug!(
            ticker,
            base_size,
            confidence,
            adjusted,
            "Position size adjusted"
        );
        Ok(adjusted)
    }

    /// Score the portfolio as a whole.
    pub async fn check_portfolio_health(&self) -> Result<PortfolioHealth, RiskError> {
        let metrics = self.calculate_risk_metrics(false).await?;
        let settings = self.settings();
        let health = assess_portfolio_health(&metrics, &settings.limits, Utc::now());

        tracing::info!(
            score = health.score,
            status = %health.status,
            issues = health.issues.len(),
            "Portfolio health assessed"
        );
        Ok(health)
    }
}
