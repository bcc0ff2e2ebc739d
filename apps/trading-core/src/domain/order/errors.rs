//! Order domain errors.

use rust_decimal::Decimal;
use thiserror::Error;

use super::request::OrderKind;
use super::state::{OrderEvent, OrderState};

/// A request that violates its own structural invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderRequestError {
    /// Ticker is empty or whitespace.
    #[error("ticker must not be empty")]
    EmptyTicker,

    /// Quantity is zero or negative.
    #[error("quantity must be positive, got {0}")]
    NonPositiveQuantity(Decimal),

    /// Quantity is not a whole number of shares.
    #[error("quantity must be a whole number, got {0}")]
    FractionalQuantity(Decimal),

    /// Quantity exceeds the configured cap.
    #[error("quantity {quantity} exceeds the cap of {cap}")]
    QuantityAboveCap {
        /// Requested quantity.
        quantity: Decimal,
        /// Configured maximum.
        cap: Decimal,
    },

    /// Kind needs a limit price.
    #[error("{0} orders require a limit price")]
    MissingLimitPrice(OrderKind),

    /// Kind needs a stop price.
    #[error("{0} orders require a stop price")]
    MissingStopPrice(OrderKind),

    /// A supplied price is zero or negative.
    #[error("{field} must be positive, got {value}")]
    NonPositivePrice {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: Decimal,
    },

    /// Bracket legs are missing or inconsistent.
    #[error("invalid bracket: {0}")]
    InvalidBracket(String),
}

/// An event that is not legal in the order's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event '{event}' is not valid in state '{from}'")]
pub struct TransitionError {
    /// State the order was in.
    pub from: OrderState,
    /// Event that was refused.
    pub event: OrderEvent,
}
