//! Application Ports (Driven)
//!
//! Ports define the interfaces the services use to reach external systems:
//! the brokerage gateway, durable order storage, the portfolio read model
//! and market state. The order router is the seam between the lifecycle
//! manager and the resilient connector.

mod broker_gateway;
mod market_context;
mod order_router;
mod order_store;
mod portfolio;

pub use broker_gateway::{
    BrokerGateway, GatewayError, GatewayOrderRequest, Instrument, MarketSnapshot,
    OrderModification,
};
pub use market_context::MarketContext;
pub use order_router::{BracketIds, BracketOrder, ConnectorError, OrderRouter, SubmissionReceipt};
pub use order_store::{OrderStore, StoreError};
#[cfg(test)]
pub use portfolio::MockPortfolioReadModel;
pub use portfolio::{PortfolioLedger, PortfolioReadModel, ReadModelError};
