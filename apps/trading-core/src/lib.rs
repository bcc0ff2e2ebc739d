// Allow unwrap/expect in tests - tests should panic on unexpected errors
// Allow test-specific patterns and pedantic lints in test code
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Trading Core - Rust Core Library
//!
//! Order lifecycle management, pre-trade risk gating and a resilient
//! connection to the brokerage gateway.
//!
//! # Architecture (Clean Architecture)
//!
//! ## Layers (inside → outside)
//!
//! - **Domain**: pure types and rules
//!   - `order`: `OrderRequest`, the lifecycle state machine, the persisted `Order`
//!   - `risk`: limits, derived metrics, the order check, sizing, portfolio health
//!   - `connection`: connection state, health record, gateway events
//!
//! - **Application**: ports and services
//!   - `ports`: `BrokerGateway`, `OrderRouter`, `OrderStore`, `PortfolioReadModel`, `MarketContext`
//!   - `services`: `RiskEngine`, `OrderLifecycleManager`
//!
//! - **Infrastructure**: adapters
//!   - `gateway`: `ResilientConnector`, reconnect policy, monitors, `PaperGateway`
//!   - `resilience`: circuit breaker
//!   - `persistence`: in-memory and SQLite stores
//!   - `market_board`: last prices, halts and the trading session
//!
//! # Order flow
//!
//! ```text
//! OrderRequest ─▶ validate ─▶ RiskEngine ─▶ ResilientConnector ─▶ gateway
//!                                                  │
//!                     OrderLifecycleManager ◀──────┘ OrderUpdate
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Clean Architecture Layers
// =============================================================================

/// Domain layer - Core business logic with no external dependencies.
pub mod domain;

/// Application layer - Services and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Cross-cutting
// =============================================================================

/// Configuration loading and validation.
pub mod config;

/// Error classification shared across layers.
pub mod error;

/// Metrics.
pub mod observability;

/// Tracing setup.
pub mod telemetry;

// =============================================================================
// Re-exports
// =============================================================================

pub use application::services::{
    OrderLifecycleManager, OrderOutcome, OrderSettings, RiskEngine, RiskSettings,
};
pub use domain::connection::{ConnectionHealth, ConnectionState, HealthSnapshot};
pub use domain::order::{OrderKind, OrderRequest, OrderSide, OrderState, TimeInForce};
pub use domain::risk::{RiskCheckResult, RiskLevel, RiskLimits, RiskMetrics};
pub use error::{ErrorClass, ErrorRecord};
pub use infrastructure::gateway::{ConnectorSettings, PaperGateway, ResilientConnector};
