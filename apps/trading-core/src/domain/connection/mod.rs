//! Gateway connection domain: state machine, health record and events.

mod events;
mod health;
mod state;

pub use events::{
    ExecutionReport, GatewayEvent, GatewayOrderStatus, OrderStatusUpdate, OrderUpdate,
};
pub use health::{ConnectionHealth, ERROR_HISTORY_CAPACITY, HealthSnapshot};
pub use state::ConnectionState;
