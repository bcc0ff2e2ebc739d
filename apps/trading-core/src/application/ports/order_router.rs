//! Order Router Port (Driven Port)
//!
//! What the lifecycle manager needs from the gateway connection:
//! idempotent submission, acknowledgment and cancellation.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::broker_gateway::GatewayError;
use super::order_store::StoreError;
use crate::domain::connection::{ConnectionState, OrderStatusUpdate};
use crate::domain::order::{OrderRequest, OrderSide, TimeInForce};
use crate::domain::shared::{GatewayOrderId, IdempotencyKey, OrderId, SignalId};
use crate::error::ErrorClass;

/// A parent entry with protective stop-loss and take-profit children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BracketOrder {
    /// Row id to use for the parent leg. Generated when absent.
    pub parent_order_id: Option<OrderId>,
    /// Ticker symbol.
    pub ticker: String,
    /// Side of the entry leg.
    pub side: OrderSide,
    /// Quantity of every leg.
    pub quantity: Decimal,
    /// Limit price of the entry leg.
    pub entry_price: Decimal,
    /// Stop price of the protective leg.
    pub stop_loss: Decimal,
    /// Limit price of the target leg.
    pub take_profit: Decimal,
    /// De-duplication key of the parent. Children derive theirs from it.
    pub idempotency_key: Option<IdempotencyKey>,
    /// Time in force of the entry leg.
    pub time_in_force: TimeInForce,
    /// Originating signal.
    pub signal_id: Option<SignalId>,
}

impl BracketOrder {
    /// Create a bracket with a DAY entry and no key.
    #[must_use]
    pub fn new(
        ticker: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        entry_price: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
    ) -> Self {
        Self {
            parent_order_id: None,
            ticker: ticker.into(),
            side,
            quantity,
            entry_price,
            stop_loss,
            take_profit,
            idempotency_key: None,
            time_in_force: TimeInForce::Day,
            signal_id: None,
        }
    }

    /// Attach a de-duplication key.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<IdempotencyKey>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Build the bracket for a request that carries both protective prices.
    ///
    /// The request's own limit price is the entry when it has one;
    /// `fallback_entry` (typically the last market price) otherwise.
    /// Returns `None` if the request is not a bracket.
    #[must_use]
    pub fn from_request(
        request: &OrderRequest,
        parent_order_id: OrderId,
        fallback_entry: Decimal,
    ) -> Option<Self> {
        let (Some(stop_loss), Some(take_profit)) = (request.stop_loss, request.take_profit) else {
            return None;
        };
        let entry_price = request.limit_price.unwrap_or(fallback_entry);
        Some(Self {
            parent_order_id: Some(parent_order_id),
            ticker: request.ticker.clone(),
            side: request.side,
            quantity: request.quantity,
            entry_price,
            stop_loss,
            take_profit,
            idempotency_key: Some(request.idempotency_key.clone()),
            time_in_force: request.time_in_force,
            signal_id: request.signal_id.clone(),
        })
    }
}

/// Ids of a placed (or previously placed) bracket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketIds {
    /// Row id of the parent.
    pub parent_order_id: OrderId,
    /// Gateway id of the parent.
    pub parent: GatewayOrderId,
    /// Gateway id of the stop-loss child.
    pub stop_loss: Option<GatewayOrderId>,
    /// Gateway id of the take-profit child.
    pub take_profit: Option<GatewayOrderId>,
    /// Whether the ids come from an earlier submission with the same key.
    pub deduplicated: bool,
    /// Set when the gateway accepted the legs but writing them failed.
    pub persistence_error: Option<String>,
}

/// Result of a single-order submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    /// Gateway id of the order.
    pub gateway_order_id: GatewayOrderId,
    /// Row id of the earlier submission, when deduplicated.
    pub existing_order_id: Option<OrderId>,
}

impl SubmissionReceipt {
    /// Whether an earlier submission with the same key was found.
    #[must_use]
    pub const fn is_deduplicated(&self) -> bool {
        self.existing_order_id.is_some()
    }
}

/// Connector error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConnectorError {
    /// The connection is not usable. Calls fail fast rather than queue.
    #[error("Gateway not connected (state: {state})")]
    NotConnected {
        /// Connection state at the time of the call.
        state: ConnectionState,
    },

    /// The circuit breaker refused the call.
    #[error("Circuit breaker open")]
    CircuitOpen,

    /// The gateway refused or failed the call.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The call did not finish in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// What was being done.
        operation: &'static str,
        /// Bound that was exceeded.
        after: Duration,
    },

    /// The order store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Every connection attempt failed.
    #[error("Connection failed after {attempts} attempts")]
    ConnectFailed {
        /// Attempts made.
        attempts: u32,
    },
}

impl ConnectorError {
    /// How the failure is handled.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Store(_) => ErrorClass::Persistence,
            Self::NotConnected { .. }
            | Self::CircuitOpen
            | Self::Gateway(_)
            | Self::Timeout { .. }
            | Self::ConnectFailed { .. } => ErrorClass::Gateway,
        }
    }
}

/// Port for routing orders to the gateway.
#[async_trait]
pub trait OrderRouter: Send + Sync {
    /// Submit a single order. A key already on file returns the earlier order.
    async fn submit_order(&self, request: &OrderRequest) -> Result<SubmissionReceipt, ConnectorError>;

    /// Submit and persist a bracket. A key already on file returns the earlier legs.
    async fn submit_bracket(&self, bracket: &BracketOrder) -> Result<BracketIds, ConnectorError>;

    /// Wait until the gateway has accepted or refused an order.
    async fn await_acknowledgement(
        &self,
        order_id: &GatewayOrderId,
        timeout: Duration,
    ) -> Result<OrderStatusUpdate, ConnectorError>;

    /// Cancel a working order. Returns once the gateway confirms.
    async fn cancel_order(&self, order_id: &GatewayOrderId) -> Result<(), ConnectorError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn bracket_from_request() {
        let request = OrderRequest::bracket(
            "AAPL",
            OrderSide::Buy,
            dec!(100),
            dec!(150),
            dec!(145),
            dec!(160),
            "K1",
        );
        let Some(bracket) = BracketOrder::from_request(&request, OrderId::new("o-1"), dec!(151))
        else {
            panic!("bracket request should convert");
        };

        assert_eq!(bracket.parent_order_id, Some(OrderId::new("o-1")));
        assert_eq!(bracket.entry_price, dec!(150));
        assert_eq!(bracket.stop_loss, dec!(145));
        assert_eq!(bracket.take_profit, dec!(160));
        assert_eq!(bracket.idempotency_key, Some(IdempotencyKey::new("K1")));
    }

    #[test]
    fn single_order_is_not_a_bracket() {
        let request = OrderRequest::market("AAPL", OrderSide::Buy, dec!(10), "K2")
            .with_stop_loss(dec!(140));
        assert!(BracketOrder::from_request(&request, OrderId::new("o-2"), dec!(150)).is_none());
    }

    #[test]
    fn market_bracket_enters_at_fallback() {
        let request = OrderRequest::market("AAPL", OrderSide::Buy, dec!(10), "K3")
            .with_stop_loss(dec!(140));
        let request = OrderRequest {
            take_profit: Some(dec!(170)),
            ..request
        };
        let Some(bracket) = BracketOrder::from_request(&request, OrderId::new("o-3"), dec!(152))
        else {
            panic!("stop and target make a bracket");
        };
        assert_eq!(bracket.entry_price, dec!(152));
    }

    #[test]
    fn connector_error_class() {
        assert_eq!(ConnectorError::CircuitOpen.class(), ErrorClass::Gateway);
        assert_eq!(
            ConnectorError::Store(StoreError::Backend("disk".into())).class(),
            ErrorClass::Persistence
        );
        let err = ConnectorError::NotConnected { state: ConnectionState::Reconnecting };
        assert_eq!(err.to_string(), "Gateway not connected (state: reconnecting)");
    }
}
