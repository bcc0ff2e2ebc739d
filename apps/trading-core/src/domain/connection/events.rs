//! Typed events pushed by a gateway adapter and the updates forwarded from them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::order::{OrderEvent, OrderSide, OrderState};
use crate::domain::shared::{ExecutionId, GatewayOrderId};

/// Order status as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayOrderStatus {
    /// Received, not yet working.
    PendingSubmit,
    /// Working at the venue.
    Accepted,
    /// Some quantity executed.
    PartiallyFilled,
    /// All quantity executed.
    Filled,
    /// Cancelled.
    Cancelled,
    /// Refused by the gateway or venue.
    Rejected,
}

impl GatewayOrderStatus {
    /// Whether the gateway has taken responsibility for the order.
    #[must_use]
    pub const fn is_acknowledged(self) -> bool {
        matches!(
            self,
            Self::Accepted | Self::PartiallyFilled | Self::Filled | Self::Cancelled
        )
    }

    /// Whether the status is final at the gateway.
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }

    /// Lifecycle state of the persisted row for this status.
    #[must_use]
    pub const fn order_state(self) -> OrderState {
        match self {
            Self::PendingSubmit => OrderState::Submitted,
            Self::Accepted => OrderState::Acknowledged,
            Self::PartiallyFilled => OrderState::PartiallyFilled,
            Self::Filled => OrderState::Filled,
            Self::Cancelled => OrderState::Cancelled,
            Self::Rejected => OrderState::Rejected,
        }
    }

    /// Lifecycle event this status drives, if any.
    #[must_use]
    pub const fn lifecycle_event(self) -> Option<OrderEvent> {
        match self {
            Self::PendingSubmit => None,
            Self::Accepted => Some(OrderEvent::Acknowledge),
            Self::PartiallyFilled => Some(OrderEvent::PartialFill),
            Self::Filled => Some(OrderEvent::Fill),
            Self::Cancelled => Some(OrderEvent::Cancel),
            Self::Rejected => Some(OrderEvent::Reject),
        }
    }
}

/// Status change of one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatusUpdate {
    /// Gateway order id.
    pub gateway_order_id: GatewayOrderId,
    /// New status.
    pub status: GatewayOrderStatus,
    /// Cumulative filled quantity.
    pub filled_quantity: Decimal,
    /// Remaining quantity.
    pub remaining_quantity: Decimal,
    /// Volume-weighted fill price so far.
    pub avg_fill_price: Option<Decimal>,
    /// Gateway message (rejection reason etc.).
    #[serde(default)]
    pub message: Option<String>,
    /// When the gateway reported it.
    pub reported_at: DateTime<Utc>,
}

/// One execution (fill) of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Execution id.
    pub execution_id: ExecutionId,
    /// Gateway order id.
    pub gateway_order_id: GatewayOrderId,
    /// Ticker symbol.
    pub ticker: String,
    /// Buy or sell.
    pub side: OrderSide,
    /// Shares in this execution.
    pub quantity: Decimal,
    /// Execution price.
    pub price: Decimal,
    /// Commission charged.
    pub commission: Decimal,
    /// Cumulative filled quantity after this execution.
    pub cumulative_quantity: Decimal,
    /// Volume-weighted price after this execution.
    pub avg_price: Decimal,
    /// When it executed.
    pub executed_at: DateTime<Utc>,
}

/// Event pushed by a gateway adapter onto the connector's channel.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// Connection established.
    Connected,
    /// Connection lost.
    Disconnected {
        /// Why, if known.
        reason: String,
    },
    /// Error reported by the gateway.
    Error {
        /// Gateway error code.
        code: i32,
        /// Gateway message.
        message: String,
        /// Order the error concerns, if any.
        order_id: Option<GatewayOrderId>,
    },
    /// Order status change.
    OrderStatus(OrderStatusUpdate),
    /// Execution.
    Execution(ExecutionReport),
}

/// Order-related update forwarded from the connector to the lifecycle manager.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderUpdate {
    /// Status change.
    Status(OrderStatusUpdate),
    /// Execution.
    Execution(ExecutionReport),
}

impl OrderUpdate {
    /// Gateway order id the update concerns.
    #[must_use]
    pub const fn gateway_order_id(&self) -> &GatewayOrderId {
        match self {
            Self::Status(update) => &update.gateway_order_id,
            Self::Execution(report) => &report.gateway_order_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_to_lifecycle_event() {
        assert_eq!(GatewayOrderStatus::PendingSubmit.lifecycle_event(), None);
        assert_eq!(
            GatewayOrderStatus::Accepted.lifecycle_event(),
            Some(OrderEvent::Acknowledge)
        );
        assert_eq!(
            GatewayOrderStatus::Rejected.lifecycle_event(),
            Some(OrderEvent::Reject)
        );
    }

    #[test]
    fn test_acknowledged_statuses() {
        assert!(GatewayOrderStatus::Accepted.is_acknowledged());
        assert!(GatewayOrderStatus::Filled.is_acknowledged());
        assert!(!GatewayOrderStatus::PendingSubmit.is_acknowledged());
        assert!(!GatewayOrderStatus::Rejected.is_acknowledged());
        assert!(GatewayOrderStatus::Rejected.is_final());
    }
}
