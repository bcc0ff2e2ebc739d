//! Gateway connection infrastructure.
//!
//! - `connector`: the resilient connector wrapping any [`BrokerGateway`]
//! - `reconnect`: capped exponential backoff
//! - `monitors`: heartbeat and health check tasks
//! - `paper`: in-process simulated brokerage
//!
//! [`BrokerGateway`]: crate::application::ports::BrokerGateway

mod connector;
mod monitors;
mod paper;
mod reconnect;

pub use connector::{ConnectorSettings, ResilientConnector};
pub use monitors::{MonitorConfig, MonitorTarget, spawn_monitors};
pub use paper::{PaperGateway, PaperGatewayConfig};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
