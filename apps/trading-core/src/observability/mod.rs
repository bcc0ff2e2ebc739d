//! Observability module for metrics.
//!
//! Prometheus counters, gauges and histograms for the order lifecycle,
//! risk gating and the gateway connection. Tracing setup lives in
//! `telemetry`.

mod metrics;

pub use metrics::{
    MetricsConfig, MetricsError, circuit_breaker_state, init_metrics, record_ack_latency,
    record_circuit_breaker_failure, record_circuit_breaker_rejected, record_circuit_breaker_state,
    record_connection_state, record_gateway_error, record_heartbeat_latency,
    record_order_stage, record_reconnect_attempt, record_risk_check, record_risk_rejection,
    update_active_orders,
};
