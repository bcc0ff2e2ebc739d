//! Application Services
//!
//! - `risk_engine`: portfolio risk metrics and order gating
//! - `order_manager`: order lifecycle from request to terminal state

mod order_manager;
mod risk_engine;

pub use order_manager::{
    ManagerMetrics, OrderLifecycleManager, OrderManagerError, OrderOutcome, OrderSettings,
};
pub use risk_engine::{RiskEngine, RiskError, RiskSettings};
