//! Broker Gateway Port (Driven Port)
//!
//! Abstract brokerage capability. Adapters push connection, status,
//! execution and error events onto a bounded channel handed to the
//! connector at construction; this trait covers the request side only.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::connection::OrderStatusUpdate;
use crate::domain::order::{OrderKind, OrderSide, TimeInForce};
use crate::domain::risk::{AccountSnapshot, Position};
use crate::domain::shared::{GatewayOrderId, IdempotencyKey};

/// A tradable instrument resolved by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    /// Ticker symbol.
    pub ticker: String,
    /// Gateway contract id.
    pub contract_id: i64,
    /// Routing exchange.
    pub exchange: String,
    /// Trading currency.
    pub currency: String,
}

/// One order leg as the gateway sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayOrderRequest {
    /// Client reference echoed back by the gateway.
    pub order_ref: IdempotencyKey,
    /// Ticker symbol.
    pub ticker: String,
    /// Buy or sell.
    pub side: OrderSide,
    /// Order kind of this leg.
    pub kind: OrderKind,
    /// Quantity.
    pub quantity: Decimal,
    /// Limit price.
    pub limit_price: Option<Decimal>,
    /// Stop price.
    pub stop_price: Option<Decimal>,
    /// Time in force.
    pub time_in_force: TimeInForce,
    /// Parent leg (bracket children only).
    pub parent_id: Option<GatewayOrderId>,
    /// Whether the gateway should release the leg (and any held siblings) now.
    pub transmit: bool,
}

impl GatewayOrderRequest {
    /// A standalone, transmitted leg.
    #[must_use]
    pub fn new(
        order_ref: IdempotencyKey,
        ticker: impl Into<String>,
        side: OrderSide,
        kind: OrderKind,
        quantity: Decimal,
    ) -> Self {
        Self {
            order_ref,
            ticker: ticker.into(),
            side,
            kind,
            quantity,
            limit_price: None,
            stop_price: None,
            time_in_force: TimeInForce::Day,
            parent_id: None,
            transmit: true,
        }
    }

    /// Set the limit price.
    #[must_use]
    pub const fn with_limit_price(mut self, price: Decimal) -> Self {
        self.limit_price = Some(price);
        self
    }

    /// Set the stop price.
    #[must_use]
    pub const fn with_stop_price(mut self, price: Decimal) -> Self {
        self.stop_price = Some(price);
        self
    }

    /// Set time in force.
    #[must_use]
    pub const fn with_time_in_force(mut self, tif: TimeInForce) -> Self {
        self.time_in_force = tif;
        self
    }

    /// Attach to a parent leg.
    #[must_use]
    pub fn with_parent(mut self, parent_id: GatewayOrderId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Hold the leg at the gateway until a later leg transmits.
    #[must_use]
    pub const fn held(mut self) -> Self {
        self.transmit = false;
        self
    }
}

/// Changes to a working order. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderModification {
    /// New quantity.
    pub quantity: Option<Decimal>,
    /// New limit price.
    pub limit_price: Option<Decimal>,
    /// New stop price.
    pub stop_price: Option<Decimal>,
}

/// Top-of-book snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// Ticker symbol.
    pub ticker: String,
    /// Last trade price.
    pub last: Option<Decimal>,
    /// Best bid.
    pub bid: Option<Decimal>,
    /// Best ask.
    pub ask: Option<Decimal>,
    /// Session volume.
    pub volume: Decimal,
    /// Whether trading in the symbol is halted.
    pub halted: bool,
    /// When the snapshot was taken.
    pub at: DateTime<Utc>,
}

/// Gateway port error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// No live session.
    #[error("Gateway not connected")]
    NotConnected,

    /// Session could not be established.
    #[error("Gateway connection failed: {message}")]
    ConnectionFailed {
        /// Error details.
        message: String,
    },

    /// Request did not complete in time.
    #[error("Gateway request timed out")]
    Timeout,

    /// Ticker could not be resolved.
    #[error("Unknown instrument: {ticker}")]
    UnknownInstrument {
        /// Ticker that failed to resolve.
        ticker: String,
    },

    /// Order id not known to the gateway.
    #[error("Order not found: {order_id}")]
    OrderNotFound {
        /// The missing order id.
        order_id: String,
    },

    /// Order refused.
    #[error("Order rejected ({code}): {reason}")]
    Rejected {
        /// Gateway error code.
        code: i32,
        /// Rejection reason.
        reason: String,
    },

    /// Transport-level failure.
    #[error("Gateway error {code}: {message}")]
    Transport {
        /// Gateway error code.
        code: i32,
        /// Error details.
        message: String,
    },
}

impl GatewayError {
    /// Whether the failure says something about gateway health rather than the request.
    ///
    /// Only these count against the circuit breaker.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::ConnectionFailed { .. } | Self::Timeout | Self::Transport { .. }
        )
    }

    /// Gateway error code, when the gateway supplied one.
    #[must_use]
    pub const fn code(&self) -> Option<i32> {
        match self {
            Self::Rejected { code, .. } | Self::Transport { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Port for brokerage interactions.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Open a session.
    async fn connect(&self) -> Result<(), GatewayError>;

    /// Close the session.
    async fn disconnect(&self) -> Result<(), GatewayError>;

    /// Whether the session is currently up.
    fn is_connected(&self) -> bool;

    /// Round-trip ping. Returns the measured latency.
    async fn ping(&self) -> Result<Duration, GatewayError>;

    /// Resolve a ticker to a tradable instrument.
    async fn qualify_instrument(&self, ticker: &str) -> Result<Instrument, GatewayError>;

    /// Place one order leg.
    async fn place_order(
        &self,
        instrument: &Instrument,
        request: &GatewayOrderRequest,
    ) -> Result<GatewayOrderId, GatewayError>;

    /// Cancel a working order.
    async fn cancel_order(&self, order_id: &GatewayOrderId) -> Result<(), GatewayError>;

    /// Modify a working order.
    async fn modify_order(
        &self,
        order_id: &GatewayOrderId,
        modification: &OrderModification,
    ) -> Result<(), GatewayError>;

    /// Current status of an order.
    async fn order_status(&self, order_id: &GatewayOrderId) -> Result<OrderStatusUpdate, GatewayError>;

    /// Account balances.
    async fn account_snapshot(&self) -> Result<AccountSnapshot, GatewayError>;

    /// Open positions.
    async fn positions(&self) -> Result<Vec<Position>, GatewayError>;

    /// Start streaming market data for an instrument.
    async fn subscribe_market_data(&self, instrument: &Instrument) -> Result<(), GatewayError>;

    /// Current market snapshot for an instrument.
    async fn market_snapshot(&self, instrument: &Instrument) -> Result<MarketSnapshot, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn gateway_order_request_builders() {
        let request = GatewayOrderRequest::new(
            IdempotencyKey::new("K1:stop_loss"),
            "AAPL",
            OrderSide::Sell,
            OrderKind::Stop,
            dec!(100),
        )
        .with_stop_price(dec!(145))
        .with_parent(GatewayOrderId::new("7"))
        .held();

        assert_eq!(request.stop_price, Some(dec!(145)));
        assert!(request.limit_price.is_none());
        assert_eq!(request.parent_id, Some(GatewayOrderId::new("7")));
        assert!(!request.transmit);
    }

    #[test]
    fn gateway_error_transience() {
        assert!(GatewayError::Timeout.is_transient());
        assert!(GatewayError::Transport { code: 1100, message: "lost".into() }.is_transient());
        assert!(
            !GatewayError::Rejected { code: 201, reason: "margin".into() }.is_transient()
        );
        assert!(!GatewayError::UnknownInstrument { ticker: "ZZZZ".into() }.is_transient());
    }

    #[test]
    fn gateway_error_code() {
        let err = GatewayError::Rejected { code: 201, reason: "margin".into() };
        assert_eq!(err.code(), Some(201));
        assert_eq!(err.to_string(), "Order rejected (201): margin");
        assert_eq!(GatewayError::NotConnected.code(), None);
    }
}
