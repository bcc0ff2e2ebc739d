//! Order lifecycle domain.
//!
//! - `request`: the immutable `OrderRequest` and its enums
//! - `state`: lifecycle states, events and the transition table
//! - `context`: per-attempt context owned by an `OrderStateMachine`
//! - `entity`: the persisted `Order` row

mod context;
mod entity;
mod errors;
mod request;
mod state;

pub use context::{OrderContext, OrderStateMachine, TransitionRecord};
pub use entity::Order;
pub use errors::{OrderRequestError, TransitionError};
pub use request::{OrderKind, OrderRequest, OrderSide, TimeInForce};
pub use state::{OrderEvent, OrderState, next_state, transition, valid_events};
