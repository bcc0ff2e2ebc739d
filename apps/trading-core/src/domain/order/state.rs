//! Order lifecycle states, events and the transition table.
//!
//! ```text
//! pending → validated → risk_checked → submitted → acknowledged
//!                                                    ├→ partially_filled ⇄ partially_filled
//!                                                    └→ filled
//! cancel: any non-terminal state
//! reject: validated | risk_checked | submitted
//! fail:   any non-terminal state
//! ```
//!
//! Terminal states (`filled`, `cancelled`, `rejected`, `failed`) absorb
//! every event. The table is a single exhaustive `match`, so adding a state
//! or event without deciding its transitions fails to compile.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::TransitionError;

/// State of one order attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// Context allocated, nothing checked yet.
    Pending,
    /// Validation stage completed.
    Validated,
    /// Risk stage completed.
    RiskChecked,
    /// Sent to the gateway, awaiting acknowledgment.
    Submitted,
    /// Gateway accepted the order.
    Acknowledged,
    /// Some quantity executed.
    PartiallyFilled,
    /// All quantity executed.
    Filled,
    /// Cancelled locally or at the gateway.
    Cancelled,
    /// Refused by validation, risk gating or the gateway.
    Rejected,
    /// Unexpected fault.
    Failed,
}

impl OrderState {
    /// Every state, in lifecycle order.
    pub const ALL: [Self; 10] = [
        Self::Pending,
        Self::Validated,
        Self::RiskChecked,
        Self::Submitted,
        Self::Acknowledged,
        Self::PartiallyFilled,
        Self::Filled,
        Self::Cancelled,
        Self::Rejected,
        Self::Failed,
    ];

    /// Returns true if no further event can change the state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::Rejected | Self::Failed
        )
    }

    /// Returns true if the gateway may hold a live order in this state.
    #[must_use]
    pub const fn is_live_at_gateway(&self) -> bool {
        matches!(
            self,
            Self::Submitted | Self::Acknowledged | Self::PartiallyFilled
        )
    }

    /// Snake-case name, as serialized.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Validated => "validated",
            Self::RiskChecked => "risk_checked",
            Self::Submitted => "submitted",
            Self::Acknowledged => "acknowledged",
            Self::PartiallyFilled => "partially_filled",
            Self::Filled => "filled",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that drive the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderEvent {
    /// Validation stage finished.
    Validate,
    /// Risk stage finished.
    RiskCheck,
    /// Order handed to the gateway.
    Submit,
    /// Gateway confirmed acceptance.
    Acknowledge,
    /// Partial execution reported.
    PartialFill,
    /// Complete execution reported.
    Fill,
    /// Cancellation confirmed.
    Cancel,
    /// Refused.
    Reject,
    /// Unexpected fault.
    Fail,
}

impl OrderEvent {
    /// Every event.
    pub const ALL: [Self; 9] = [
        Self::Validate,
        Self::RiskCheck,
        Self::Submit,
        Self::Acknowledge,
        Self::PartialFill,
        Self::Fill,
        Self::Cancel,
        Self::Reject,
        Self::Fail,
    ];

    /// Snake-case name, as serialized.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::RiskCheck => "risk_check",
            Self::Submit => "submit",
            Self::Acknowledge => "acknowledge",
            Self::PartialFill => "partial_fill",
            Self::Fill => "fill",
            Self::Cancel => "cancel",
            Self::Reject => "reject",
            Self::Fail => "fail",
        }
    }
}

impl fmt::Display for OrderEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The transition table.
///
/// Returns the state reached by applying `event` in `state`, or `None` if
/// the event is not legal there.
#[must_use]
pub const fn next_state(state: OrderState, event: OrderEvent) -> Option<OrderState> {
    use OrderEvent as E;
    use OrderState as S;

    if state.is_terminal() {
        return None;
    }

    match (state, event) {
        (S::Pending, E::Validate) => Some(S::Validated),
        (S::Validated, E::RiskCheck) => Some(S::RiskChecked),
        (S::RiskChecked, E::Submit) => Some(S::Submitted),
        (S::Submitted, E::Acknowledge) => Some(S::Acknowledged),
        (S::Acknowledged | S::PartiallyFilled, E::PartialFill) => Some(S::PartiallyFilled),
        (S::Acknowledged | S::PartiallyFilled, E::Fill) => Some(S::Filled),
        (S::Validated | S::RiskChecked | S::Submitted, E::Reject) => Some(S::Rejected),
        (_, E::Cancel) => Some(S::Cancelled),
        (_, E::Fail) => Some(S::Failed),
        (
            S::Pending
            | S::Validated
            | S::RiskChecked
            | S::Submitted
            | S::Acknowledged
            | S::PartiallyFilled
            | S::Filled
            | S::Cancelled
            | S::Rejected
            | S::Failed,
            E::Validate
            | E::RiskCheck
            | E::Submit
            | E::Acknowledge
            | E::PartialFill
            | E::Fill
            | E::Reject,
        ) => None,
    }
}

/// Apply `event` in `state`, or explain why it is refused.
pub const fn transition(state: OrderState, event: OrderEvent) -> Result<OrderState, TransitionError> {
    match next_state(state, event) {
        Some(next) => Ok(next),
        None => Err(TransitionError { from: state, event }),
    }
}

/// Events that are legal in `state`.
#[must_use]
pub fn valid_events(state: OrderState) -> Vec<OrderEvent> {
    OrderEvent::ALL
        .into_iter()
        .filter(|event| next_state(state, *event).is_some())
        .collect()
}
