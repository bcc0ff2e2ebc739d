//! Shared kernel: identifiers used across bounded contexts.

mod identifiers;

pub use identifiers::{
    CorrelationId, ExecutionId, GatewayOrderId, IdempotencyKey, OrderId, SignalId,
};
