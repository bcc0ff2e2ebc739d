//! Configuration module for the trading core.
//!
//! Loads a YAML document, interpolates environment variables and validates
//! the result. Every section has defaults, so an empty document is valid.
//!
//! # Usage
//!
//! ```rust,ignore
//! use trading_core::config::load_config;
//!
//! let config = load_config(Some("config/trading-core.yaml"))?;
//! let settings = config.order_settings();
//! ```

mod gateway;
mod observability;
mod orders;
mod persistence;
mod risk;
mod session;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use gateway::{BreakerConfig, GatewayConfig};
pub use observability::MetricsSection;
pub use orders::OrdersConfig;
pub use persistence::PersistenceConfig;
pub use risk::RiskConfig;
pub use session::SessionConfig;

use crate::application::services::{OrderSettings, RiskSettings};
use crate::infrastructure::gateway::ConnectorSettings;
use crate::infrastructure::market_board::TradingSession;
use crate::observability::MetricsConfig;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/trading-core.yaml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Order validation and acknowledgment.
    pub orders: OrdersConfig,
    /// Risk limits and engine tuning.
    pub risk: RiskConfig,
    /// Gateway connection.
    pub gateway: GatewayConfig,
    /// Circuit breaker around gateway requests.
    pub circuit_breaker: BreakerConfig,
    /// Regular trading hours.
    pub session: SessionConfig,
    /// Prometheus exporter.
    pub metrics: MetricsSection,
    /// Order store.
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Settings for the order lifecycle manager.
    #[must_use]
    pub const fn order_settings(&self) -> OrderSettings {
        self.orders.to_settings()
    }

    /// Settings for the risk engine.
    #[must_use]
    pub fn risk_settings(&self) -> RiskSettings {
        self.risk.to_settings()
    }

    /// Settings for the resilient connector.
    #[must_use]
    pub fn connector_settings(&self) -> ConnectorSettings {
        self.gateway.to_settings(
            &self.circuit_breaker,
            Duration::from_millis(self.orders.ack_poll_interval_ms),
        )
    }

    /// The trading session.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for malformed session times.
    pub fn trading_session(&self) -> Result<TradingSession, ConfigError> {
        self.session.to_session()
    }

    /// Exporter settings, or `None` when metrics are disabled.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for a malformed listen address.
    pub fn metrics_config(&self) -> Result<Option<MetricsConfig>, ConfigError> {
        self.metrics.to_settings()
    }
}

/// Load configuration from a YAML file.
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or(DEFAULT_CONFIG_PATH);

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;

    load_config_from_string(&contents)
}

/// Load configuration from a YAML string.
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<Config, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    // serde_yaml_bw rejects an empty document; treat it as all defaults.
    let config: Config = if interpolated.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml_bw::from_str(&interpolated)?
    };
    validate_config(&config)?;
    Ok(config)
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax. An unset or empty
/// variable without a default becomes the empty string.
#[allow(clippy::expect_used)] // Regex is compile-time constant; expect() is safe here
fn interpolate_env_vars(input: &str) -> String {
    use std::sync::OnceLock;

    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    re.replace_all(input, |cap: &regex::Captures<'_>| {
        let default_value = cap.get(2).map_or("", |m| m.as_str());
        match cap.get(1).map(|m| std::env::var(m.as_str())) {
            Some(Ok(v)) if !v.is_empty() => v,
            _ => default_value.to_string(),
        }
    })
    .into_owned()
}

/// Validate configuration values.
fn validate_config(config: &Config) -> Result<(), ConfigError> {
    validate_orders(&config.orders)?;
    validate_risk(&config.risk)?;
    validate_gateway(&config.gateway)?;

    if config.circuit_breaker.failure_threshold == 0 {
        return Err(invalid("circuit_breaker.failure_threshold must be > 0"));
    }
    if config.circuit_breaker.cooldown_secs == 0 {
        return Err(invalid("circuit_breaker.cooldown_secs must be > 0"));
    }

    config.session.to_session()?;
    config.metrics.to_settings()?;

    if config.persistence.database_url.trim().is_empty() {
        return Err(invalid("persistence.database_url must not be empty"));
    }

    Ok(())
}

fn validate_orders(orders: &OrdersConfig) -> Result<(), ConfigError> {
    if orders.max_quantity <= rust_decimal::Decimal::ZERO {
        return Err(invalid("orders.max_quantity must be > 0"));
    }
    if orders.ack_timeout_ms == 0 {
        return Err(invalid("orders.ack_timeout_ms must be > 0"));
    }
    if orders.ack_poll_interval_ms == 0 {
        return Err(invalid("orders.ack_poll_interval_ms must be > 0"));
    }
    if orders.max_limit_deviation <= rust_decimal::Decimal::ZERO
        || orders.max_limit_deviation > rust_decimal::Decimal::ONE
    {
        return Err(invalid("orders.max_limit_deviation must be in (0, 1]"));
    }
    Ok(())
}

fn validate_risk(risk: &RiskConfig) -> Result<(), ConfigError> {
    let limits = &risk.limits;
    let fractions = [
        ("max_position_size", limits.max_position_size),
        ("max_daily_loss", limits.max_daily_loss),
        ("max_total_exposure", limits.max_total_exposure),
        ("max_concentration", limits.max_concentration),
        ("max_sector_exposure", limits.max_sector_exposure),
        ("max_correlation", limits.max_correlation),
        ("max_volatility", limits.max_volatility),
        ("max_drawdown", limits.max_drawdown),
    ];
    for (name, value) in fractions {
        if !(value > 0.0 && value <= 1.0) {
            return Err(ConfigError::ValidationError(format!(
                "risk.{name} must be in (0, 1], got {value}"
            )));
        }
    }
    if limits.max_leverage <= 0.0 || !limits.max_leverage.is_finite() {
        return Err(invalid("risk.max_leverage must be > 0"));
    }
    if limits.max_orders_per_day == 0 {
        return Err(invalid("risk.max_orders_per_day must be > 0"));
    }
    if limits.max_trades_per_symbol_per_day == 0 {
        return Err(invalid("risk.max_trades_per_symbol_per_day must be > 0"));
    }
    if risk.lookback_days < 2 {
        return Err(invalid("risk.lookback_days must be at least 2"));
    }

    let sizing = &risk.sizing;
    if !(sizing.win_rate > 0.0 && sizing.win_rate < 1.0) {
        return Err(invalid("risk.sizing.win_rate must be in (0, 1)"));
    }
    if !(sizing.kelly_cap > 0.0 && sizing.kelly_cap <= 1.0) {
        return Err(invalid("risk.sizing.kelly_cap must be in (0, 1]"));
    }
    if (sizing.adjusted_weight + sizing.kelly_weight - 1.0).abs() > 1e-9 {
        return Err(ConfigError::ValidationError(format!(
            "risk.sizing weights must sum to 1, got {}",
            sizing.adjusted_weight + sizing.kelly_weight
        )));
    }
    Ok(())
}

fn validate_gateway(gateway: &GatewayConfig) -> Result<(), ConfigError> {
    if gateway.connect_max_attempts == 0 {
        return Err(invalid("gateway.connect_max_attempts must be > 0"));
    }
    if gateway.reconnect_max_attempts == 0 {
        return Err(invalid("gateway.reconnect_max_attempts must be > 0"));
    }
    if gateway.connect_max_delay_ms < gateway.connect_initial_delay_ms {
        return Err(invalid(
            "gateway.connect_max_delay_ms must be >= connect_initial_delay_ms",
        ));
    }
    if gateway.reconnect_max_delay_ms < gateway.reconnect_initial_delay_ms {
        return Err(invalid(
            "gateway.reconnect_max_delay_ms must be >= reconnect_initial_delay_ms",
        ));
    }
    if gateway.request_timeout_ms == 0 {
        return Err(invalid("gateway.request_timeout_ms must be > 0"));
    }
    if gateway.heartbeat_interval_secs == 0 || gateway.health_check_interval_secs == 0 {
        return Err(invalid("gateway monitor intervals must be > 0"));
    }
    if gateway.stale_heartbeat_secs <= gateway.heartbeat_interval_secs {
        return Err(invalid(
            "gateway.stale_heartbeat_secs must be larger than heartbeat_interval_secs",
        ));
    }
    if gateway.event_buffer == 0 {
        return Err(invalid("gateway.event_buffer must be > 0"));
    }
    Ok(())
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::risk::ViolationKind;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    #[test]
    fn empty_document_uses_defaults() {
        let config = match load_config_from_string("") {
            Ok(c) => c,
            Err(e) => panic!("empty config should load: {e}"),
        };
        assert_eq!(config, Config::default());
        assert_eq!(config.orders.max_quantity, dec!(10000));
        assert_eq!(config.gateway.critical_error_codes, vec![502, 504, 1100, 1300, 2110]);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert!(config.persistence.is_in_memory());
    }

    #[test]
    fn loads_full_document() {
        let yaml = r#"
orders:
  max_quantity: 500
  ack_timeout_ms: 2000
  max_limit_deviation: 0.05
  enforce_trading_hours: false
risk:
  max_position_size: 0.2
  max_orders_per_day: 10
  enforce: false
  scoring:
    hard_block: [DAILY_LOSS]
  sizing:
    adjusted_weight: 0.5
    kelly_weight: 0.5
gateway:
  reconnect_max_delay_ms: 60000
  critical_error_codes: [1100]
circuit_breaker:
  failure_threshold: 3
  cooldown_secs: 10
session:
  open_utc: "14:30"
  close_utc: "21:00"
metrics:
  enabled: true
  listen_addr: "127.0.0.1:9100"
persistence:
  database_url: "sqlite://orders.db"
"#;
        let config = match load_config_from_string(yaml) {
            Ok(c) => c,
            Err(e) => panic!("config should load: {e}"),
        };

        let orders = config.order_settings();
        assert_eq!(orders.max_quantity, dec!(500));
        assert_eq!(orders.ack_timeout, Duration::from_secs(2));
        assert!(!orders.enforce_trading_hours);

        let risk = config.risk_settings();
        assert!((risk.limits.max_position_size - 0.2).abs() < f64::EPSILON);
        assert_eq!(risk.limits.max_orders_per_day, 10);
        assert!((risk.limits.max_daily_loss - 0.05).abs() < f64::EPSILON);
        assert!(!risk.enforce);
        assert_eq!(risk.scoring.hard_block, vec![ViolationKind::DailyLoss]);

        let connector = config.connector_settings();
        assert_eq!(connector.reconnect.max_delay, Duration::from_secs(60));
        assert_eq!(connector.critical_error_codes, vec![1100]);
        assert_eq!(connector.circuit_breaker.failure_threshold, 3);
        assert_eq!(connector.circuit_breaker.cooldown, Duration::from_secs(10));
        assert_eq!(connector.ack_poll_interval, Duration::from_millis(50));

        let metrics = match config.metrics_config() {
            Ok(Some(m)) => m,
            other => panic!("metrics should be enabled: {other:?}"),
        };
        assert_eq!(metrics.listen_addr.port(), 9100);
        assert!(!config.persistence.is_in_memory());
    }

    #[test]
    fn shipped_config_file_matches_defaults() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/trading-core.yaml");
        let config = match load_config(Some(path)) {
            Ok(c) => c,
            Err(e) => panic!("shipped config should load: {e}"),
        };
        let defaults = Config::default();
        assert_eq!(config.risk, defaults.risk);
        assert_eq!(config.gateway, defaults.gateway);
        assert_eq!(config.circuit_breaker, defaults.circuit_breaker);
        assert_eq!(config.session, defaults.session);
    }

    #[test]
    fn disabled_metrics_yield_none() {
        let config = Config::default();
        assert!(matches!(config.metrics_config(), Ok(None)));
    }

    #[test]
    fn interpolates_defaults_for_unset_vars() {
        let yaml = "persistence:\n  database_url: ${TRADING_CORE_TEST_UNSET_DB:-memory}\n";
        let config = match load_config_from_string(yaml) {
            Ok(c) => c,
            Err(e) => panic!("config should load: {e}"),
        };
        assert_eq!(config.persistence.database_url, "memory");
    }

    #[test]
    #[expect(clippy::literal_string_with_formatting_args)]
    fn interpolates_set_vars() {
        // PATH is set in every test environment.
        let path = std::env::var("PATH").unwrap_or_default();
        assert_eq!(interpolate_env_vars("value: ${PATH}"), format!("value: {path}"));
        assert_eq!(interpolate_env_vars("value: ${PATH:-fallback}"), format!("value: {path}"));
    }

    #[test]
    fn unset_var_without_default_is_empty() {
        assert_eq!(
            interpolate_env_vars("a${TRADING_CORE_TEST_SURELY_UNSET}b"),
            "ab".to_string()
        );
    }

    #[test]
    fn missing_file_is_read_error() {
        let Err(err) = load_config(Some("/nonexistent/trading-core.yaml")) else {
            panic!("missing file should fail");
        };
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn malformed_yaml_is_parse_error() {
        let Err(err) = load_config_from_string("orders: [unclosed") else {
            panic!("malformed yaml should fail");
        };
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test_case("risk:\n  max_position_size: 1.5\n" ; "fraction above one")]
    #[test_case("risk:\n  max_drawdown: 0\n" ; "zero fraction")]
    #[test_case("risk:\n  max_leverage: 0\n" ; "zero leverage")]
    #[test_case("risk:\n  sizing:\n    kelly_weight: 0.5\n" ; "sizing weights off")]
    #[test_case("circuit_breaker:\n  failure_threshold: 0\n" ; "zero breaker threshold")]
    #[test_case("gateway:\n  connect_max_attempts: 0\n" ; "zero connect attempts")]
    #[test_case("gateway:\n  reconnect_max_delay_ms: 100\n" ; "cap below initial delay")]
    #[test_case("gateway:\n  stale_heartbeat_secs: 30\n" ; "stale not above heartbeat")]
    #[test_case("session:\n  open_utc: \"9am\"\n" ; "malformed session time")]
    #[test_case("session:\n  open_utc: \"21:00\"\n" ; "close before open")]
    #[test_case("metrics:\n  enabled: true\n  listen_addr: nowhere\n" ; "bad metrics address")]
    fn rejects_invalid_values(yaml: &str) {
        let Err(err) = load_config_from_string(yaml) else {
            panic!("config should be rejected: {yaml}");
        };
        assert!(matches!(err, ConfigError::ValidationError(_)), "{err}");
    }

    #[test]
    fn reconnect_cap_defaults_to_five_minutes() {
        let settings = Config::default().connector_settings();
        assert_eq!(settings.reconnect.max_delay, Duration::from_secs(300));
        assert_eq!(settings.monitors.stale_after, Duration::from_secs(120));
    }
}
