//! Per-attempt order context and the state machine that owns it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::errors::TransitionError;
use super::request::OrderRequest;
use super::state::{OrderEvent, OrderState, transition};
use crate::domain::shared::{CorrelationId, GatewayOrderId};
use crate::error::{ErrorClass, ErrorRecord};

/// Mutable record of one order attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderContext {
    /// The originating request.
    pub request: OrderRequest,
    /// Internally generated id.
    pub correlation_id: CorrelationId,
    /// Gateway-assigned id, once known.
    pub gateway_order_id: Option<GatewayOrderId>,
    /// Gateway ids of bracket children (stop-loss, take-profit).
    #[serde(default)]
    pub child_order_ids: Vec<GatewayOrderId>,
    /// Current lifecycle state.
    pub state: OrderState,
    /// Accumulated validation and execution errors.
    pub errors: Vec<ErrorRecord>,
    /// Free-form annotations (risk score, position impact, flags).
    pub metadata: Map<String, Value>,
    /// Quantity executed so far.
    pub filled_quantity: Decimal,
    /// Volume-weighted fill price.
    pub avg_fill_price: Option<Decimal>,
    /// Commission reported by executions.
    pub commission: Decimal,
    /// Whether the order row has been written to the store.
    #[serde(default)]
    pub persisted: bool,
    /// When the context was allocated.
    pub created_at: DateTime<Utc>,
}

impl OrderContext {
    /// Allocate a context for `request` with a fresh correlation id.
    #[must_use]
    pub fn new(request: OrderRequest) -> Self {
        Self {
            request,
            correlation_id: CorrelationId::generate(),
            gateway_order_id: None,
            child_order_ids: Vec::new(),
            state: OrderState::Pending,
            errors: Vec::new(),
            metadata: Map::new(),
            filled_quantity: Decimal::ZERO,
            avg_fill_price: None,
            commission: Decimal::ZERO,
            persisted: false,
            created_at: Utc::now(),
        }
    }

    /// Append an error record.
    pub fn record_error(&mut self, class: ErrorClass, message: impl Into<String>) {
        self.errors.push(ErrorRecord::new(class, message));
    }

    /// Set a metadata annotation.
    pub fn annotate(&mut self, key: &str, value: impl Into<Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    /// Error messages, oldest first.
    #[must_use]
    pub fn reasons(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.message.clone()).collect()
    }

    /// Apply a cumulative fill report.
    ///
    /// Gateways report cumulative filled quantity; a report that does not
    /// advance it is ignored.
    pub fn apply_fill(&mut self, cumulative_quantity: Decimal, avg_price: Option<Decimal>) {
        if cumulative_quantity > self.filled_quantity {
            self.filled_quantity = cumulative_quantity;
            if avg_price.is_some() {
                self.avg_fill_price = avg_price;
            }
        }
    }

    /// Audit note written with the final persistence of the order.
    #[must_use]
    pub fn audit_note(&self) -> String {
        serde_json::json!({
            "correlation_id": self.correlation_id,
            "state": self.state,
            "errors": self.errors,
            "metadata": self.metadata,
        })
        .to_string()
    }
}

/// One transition applied to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// State before.
    pub from: OrderState,
    /// Event applied.
    pub event: OrderEvent,
    /// State after.
    pub to: OrderState,
    /// When it was applied.
    pub at: DateTime<Utc>,
}

/// State machine exclusively owning an [`OrderContext`].
#[derive(Debug, Clone)]
pub struct OrderStateMachine {
    context: OrderContext,
    history: Vec<TransitionRecord>,
}

impl OrderStateMachine {
    /// Start a machine in `pending` for `request`.
    #[must_use]
    pub fn new(request: OrderRequest) -> Self {
        Self {
            context: OrderContext::new(request),
            history: Vec::new(),
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> OrderState {
        self.context.state
    }

    /// Read access to the context.
    #[must_use]
    pub const fn context(&self) -> &OrderContext {
        &self.context
    }

    /// Write access to the context. The state is only changed by [`fire`](Self::fire).
    pub const fn context_mut(&mut self) -> &mut OrderContext {
        &mut self.context
    }

    /// Applied transitions, oldest first.
    #[must_use]
    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    /// Apply `event`. Illegal events leave the machine untouched.
    pub fn fire(&mut self, event: OrderEvent) -> Result<OrderState, TransitionError> {
        let from = self.context.state;
        let to = transition(from, event)?;

        self.context.state = to;
        self.history.push(TransitionRecord {
            from,
            event,
            to,
            at: Utc::now(),
        });

        tracing::debug!(
            correlation_id = %self.context.correlation_id,
            from = %from,
            event = %event,
            to = %to,
            "Order transitioned"
        );

        Ok(to)
    }

    /// Consume the machine, returning its context.
    #[must_use]
    pub fn into_context(self) -> OrderContext {
        self.context
    }
}
