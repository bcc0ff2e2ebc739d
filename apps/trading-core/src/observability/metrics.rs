//! Prometheus metrics for the trading core.
//!
//! Covers the order lifecycle, risk gating, the gateway connection and the
//! circuit breaker. Recording is a no-op until [`init_metrics`] installs a
//! recorder, so library code and tests call these freely.
//!
//! # Example
//!
//! ```ignore
//! use trading_core::observability::{init_metrics, MetricsConfig};
//!
//! init_metrics(&MetricsConfig::default())?;
//! record_order_stage("submitted");
//! ```

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::domain::connection::ConnectionState;

/// Configuration for the metrics exporter.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Address to bind the metrics HTTP listener.
    pub listen_addr: SocketAddr,
    /// Histogram buckets for latency measurements (in seconds).
    pub latency_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
            // 1ms to 10s
            latency_buckets: vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        }
    }
}

impl MetricsConfig {
    /// Create a new metrics configuration with custom address.
    #[must_use]
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            listen_addr: addr,
            ..Default::default()
        }
    }
}

/// Initialize the Prometheus metrics exporter.
///
/// This starts an HTTP server that exposes metrics at `/metrics`.
///
/// # Errors
///
/// Returns an error if the metrics exporter fails to start (e.g., port already in use).
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(config.listen_addr)
        .set_buckets(&config.latency_buckets)
        .map_err(|e| MetricsError::Configuration(e.to_string()))?
        .install()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    tracing::info!(
        addr = %config.listen_addr,
        "Prometheus metrics exporter started"
    );

    Ok(())
}

/// Error type for metrics operations.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Failed to configure metrics exporter.
    #[error("metrics configuration error: {0}")]
    Configuration(String),
    /// Failed to install metrics exporter.
    #[error("metrics installation error: {0}")]
    Installation(String),
}

// ============================================================================
// Order Lifecycle Metrics
// ============================================================================

/// Count an order reaching a lifecycle stage.
///
/// # Arguments
///
/// * `stage` - `"created"`, `"submitted"` or a terminal state name
pub fn record_order_stage(stage: &str) {
    counter!("orders_total", "stage" => stage.to_string()).increment(1);
}

/// Record the time from submission to gateway acknowledgment.
pub fn record_ack_latency(order_kind: &str, latency_seconds: f64) {
    histogram!(
        "order_ack_latency_seconds",
        "order_kind" => order_kind.to_string()
    )
    .record(latency_seconds);
}

/// Update the active orders gauge.
pub fn update_active_orders(count: usize) {
    gauge!("active_orders").set(count as f64);
}

// ============================================================================
// Risk Metrics
// ============================================================================

/// Record a pre-trade risk check.
///
/// # Arguments
///
/// * `approved` - Whether the order passed
/// * `level` - Risk level (`"LOW"` .. `"CRITICAL"`)
/// * `score` - Risk score 0-100
pub fn record_risk_check(approved: bool, level: &str, score: f64) {
    counter!(
        "risk_checks_total",
        "approved" => approved.to_string(),
        "level" => level.to_string()
    )
    .increment(1);

    histogram!("risk_score").record(score);
}

/// Record a risk rejection by violation.
pub fn record_risk_rejection(violation: &str) {
    counter!(
        "risk_rejections_total",
        "violation" => violation.to_string()
    )
    .increment(1);
}

// ============================================================================
// Gateway Connection Metrics
// ============================================================================

/// Update the connection state gauge.
pub fn record_connection_state(state: ConnectionState) {
    gauge!("gateway_connection_state").set(state.gauge_value());
}

/// Count a reconnection attempt.
pub fn record_reconnect_attempt() {
    counter!("gateway_reconnect_attempts_total").increment(1);
}

/// Record heartbeat round-trip latency.
pub fn record_heartbeat_latency(latency_seconds: f64) {
    histogram!("gateway_heartbeat_latency_seconds").record(latency_seconds);
}

/// Count an error event from the gateway.
pub fn record_gateway_error(code: i32, critical: bool) {
    counter!(
        "gateway_errors_total",
        "code" => code.to_string(),
        "critical" => critical.to_string()
    )
    .increment(1);
}

// ============================================================================
// Circuit Breaker Metrics
// ============================================================================

/// Circuit breaker state values for the gauge.
pub mod circuit_breaker_state {
    /// Circuit is closed (healthy).
    pub const CLOSED: f64 = 0.0;
    /// Circuit is open (failing).
    pub const OPEN: f64 = 1.0;
    /// Circuit is half-open (testing).
    pub const HALF_OPEN: f64 = 2.0;
}

/// Update circuit breaker state gauge.
///
/// # Arguments
///
/// * `service` - Service name (e.g., "gateway")
/// * `state` - Numeric state (0=closed, 1=open, 2=`half_open`)
pub fn record_circuit_breaker_state(service: &str, state: f64) {
    gauge!(
        "circuit_breaker_state",
        "service" => service.to_string()
    )
    .set(state);
}

/// Record a circuit breaker failure.
pub fn record_circuit_breaker_failure(service: &str) {
    counter!(
        "circuit_breaker_failures_total",
        "service" => service.to_string()
    )
    .increment(1);
}

/// Record a circuit breaker rejection (call rejected due to open circuit).
pub fn record_circuit_breaker_rejected(service: &str) {
    counter!(
        "circuit_breaker_rejected_total",
        "service" => service.to_string()
    )
    .increment(1);
}
