//! Infrastructure Layer
//!
//! Adapters behind the application ports: the resilient gateway
//! connector and the paper gateway, order persistence, market state and
//! the circuit breaker.

pub mod gateway;
pub mod market_board;
pub mod persistence;
pub mod resilience;
