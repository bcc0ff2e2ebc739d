//! Persisted order entity.
//!
//! Created at submission time, mutated on every status event from the
//! gateway, never deleted. The idempotency key is the durable
//! de-duplication point.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::context::OrderContext;
use super::request::{OrderKind, OrderSide, TimeInForce};
use super::state::OrderState;
use crate::domain::shared::{GatewayOrderId, IdempotencyKey, OrderId, SignalId};

/// An order row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Row id.
    pub id: OrderId,
    /// Gateway-assigned id.
    pub gateway_order_id: Option<GatewayOrderId>,
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
    /// Lifecycle state.
    pub status: OrderState,
    /// Quantity executed.
    pub filled_quantity: Decimal,
    /// Volume-weighted fill price.
    pub avg_fill_price: Option<Decimal>,
    /// Commission paid.
    pub commission: Decimal,
    /// Unique per logical order.
    pub idempotency_key: IdempotencyKey,
    /// Parent order (bracket children only).
    pub parent_id: Option<OrderId>,
    /// Originating signal.
    pub signal_id: Option<SignalId>,
    /// Audit note captured at the terminal write.
    pub note: Option<String>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// When the order was handed to the gateway.
    pub submitted_at: Option<DateTime<Utc>>,
    /// When the order completed.
    pub filled_at: Option<DateTime<Utc>>,
    /// When the order was cancelled.
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Build the row for a single order from its lifecycle context.
    #[must_use]
    pub fn from_context(context: &OrderContext) -> Self {
        let request = &context.request;
        let now = Utc::now();
        let mut order = Self {
            id: OrderId::new(context.correlation_id.as_str()),
            gateway_order_id: context.gateway_order_id.clone(),
            ticker: request.ticker.clone(),
            side: request.side,
            kind: request.kind,
            quantity: request.quantity,
            limit_price: request.limit_price,
            stop_price: request.stop_price,
            time_in_force: request.time_in_force,
            status: OrderState::Submitted,
            filled_quantity: context.filled_quantity,
            avg_fill_price: context.avg_fill_price,
            commission: context.commission,
            idempotency_key: request.idempotency_key.clone(),
            parent_id: None,
            signal_id: request.signal_id.clone(),
            note: None,
            created_at: now,
            submitted_at: Some(now),
            filled_at: None,
            cancelled_at: None,
        };
        order.apply_status(context.state, now);
        if context.state.is_terminal() {
            order.note = Some(context.audit_note());
        }
        order
    }

    /// Row for a leg the gateway has just accepted, with no prices set.
    #[must_use]
    pub fn submitted(
        id: OrderId,
        gateway_order_id: GatewayOrderId,
        ticker: impl Into<String>,
        side: OrderSide,
        kind: OrderKind,
        quantity: Decimal,
        idempotency_key: IdempotencyKey,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            gateway_order_id: Some(gateway_order_id),
            ticker: ticker.into(),
            side,
            kind,
            quantity,
            limit_price: None,
            stop_price: None,
            time_in_force: TimeInForce::Day,
            status: OrderState::Submitted,
            filled_quantity: Decimal::ZERO,
            avg_fill_price: None,
            commission: Decimal::ZERO,
            idempotency_key,
            parent_id: None,
            signal_id: None,
            note: None,
            created_at: now,
            submitted_at: Some(now),
            filled_at: None,
            cancelled_at: None,
        }
    }

    /// Record a new lifecycle state, stamping completion times.
    pub fn apply_status(&mut self, status: OrderState, at: DateTime<Utc>) {
        self.status = status;
        match status {
            OrderState::Filled if self.filled_at.is_none() => self.filled_at = Some(at),
            OrderState::Cancelled if self.cancelled_at.is_none() => self.cancelled_at = Some(at),
            _ => {}
        }
    }

    /// Record a cumulative fill report. Reports that go backwards are ignored.
    pub fn apply_fill(&mut self, cumulative_quantity: Decimal, avg_price: Option<Decimal>) {
        if cumulative_quantity > self.filled_quantity {
            self.filled_quantity = cumulative_quantity;
            if avg_price.is_some() {
                self.avg_fill_price = avg_price;
            }
        }
    }

    /// Returns true once the status can no longer change.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
