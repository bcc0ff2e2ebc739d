//! Domain layer.
//!
//! Pure types and rules with no I/O: identifiers, the order lifecycle
//! state machine, risk limits and evaluation, and connection health.

pub mod connection;
pub mod order;
pub mod risk;
pub mod shared;
