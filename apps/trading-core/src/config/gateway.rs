//! Gateway connection and circuit breaker configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::infrastructure::gateway::{ConnectorSettings, MonitorConfig, ReconnectConfig};
use crate::infrastructure::resilience::CircuitBreakerConfig;

/// Gateway connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Attempts made by the initial connect.
    pub connect_max_attempts: u32,
    /// First backoff delay of the initial connect.
    pub connect_initial_delay_ms: u64,
    /// Backoff cap of the initial connect.
    pub connect_max_delay_ms: u64,
    /// Attempts made to recover a lost session.
    pub reconnect_max_attempts: u32,
    /// First backoff delay when recovering.
    pub reconnect_initial_delay_ms: u64,
    /// Backoff cap when recovering.
    pub reconnect_max_delay_ms: u64,
    /// Bound on every gateway request.
    pub request_timeout_ms: u64,
    /// Heartbeat period.
    pub heartbeat_interval_secs: u64,
    /// Health check period.
    pub health_check_interval_secs: u64,
    /// Heartbeat age past which the session is presumed dead.
    pub stale_heartbeat_secs: u64,
    /// Pause between bracket legs.
    pub bracket_leg_pause_ms: u64,
    /// Wait for a bracket parent to be accepted.
    pub bracket_ack_wait_ms: u64,
    /// Error codes that mean the session is gone.
    pub critical_error_codes: Vec<i32>,
    /// Capacity of the gateway event and order update channels.
    pub event_buffer: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            connect_max_attempts: 5,
            connect_initial_delay_ms: 1_000,
            connect_max_delay_ms: 30_000,
            reconnect_max_attempts: 10,
            reconnect_initial_delay_ms: 2_000,
            reconnect_max_delay_ms: 300_000,
            request_timeout_ms: 10_000,
            heartbeat_interval_secs: 30,
            health_check_interval_secs: 60,
            stale_heartbeat_secs: 120,
            bracket_leg_pause_ms: 100,
            bracket_ack_wait_ms: 1_000,
            critical_error_codes: vec![502, 504, 1100, 1300, 2110],
            event_buffer: 1_024,
        }
    }
}

/// Circuit breaker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Seconds spent open before the trial call.
    pub cooldown_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_secs: 60,
        }
    }
}

impl BreakerConfig {
    /// Settings for the circuit breaker.
    #[must_use]
    pub const fn to_settings(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            cooldown: Duration::from_secs(self.cooldown_secs),
        }
    }
}

impl GatewayConfig {
    /// Settings for the connector.
    #[must_use]
    pub fn to_settings(&self, breaker: &BreakerConfig, ack_poll_interval: Duration) -> ConnectorSettings {
        ConnectorSettings {
            connect: ReconnectConfig::new(
                Duration::from_millis(self.connect_initial_delay_ms),
                Duration::from_millis(self.connect_max_delay_ms),
                2.0,
                self.connect_max_attempts,
            ),
            reconnect: ReconnectConfig::new(
                Duration::from_millis(self.reconnect_initial_delay_ms),
                Duration::from_millis(self.reconnect_max_delay_ms),
                2.0,
                self.reconnect_max_attempts,
            ),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            monitors: MonitorConfig {
                heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
                health_check_interval: Duration::from_secs(self.health_check_interval_secs),
                stale_after: Duration::from_secs(self.stale_heartbeat_secs),
            },
            bracket_leg_pause: Duration::from_millis(self.bracket_leg_pause_ms),
            bracket_ack_wait: Duration::from_millis(self.bracket_ack_wait_ms),
            ack_poll_interval,
            critical_error_codes: self.critical_error_codes.clone(),
            update_buffer: self.event_buffer,
            circuit_breaker: breaker.to_settings(),
        }
    }
}
