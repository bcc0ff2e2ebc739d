//! Order Store Port (Driven Port)
//!
//! Durable order rows. The unique idempotency key is the
//! de-duplication point that survives restarts.

use async_trait::async_trait;

use crate::domain::order::Order;
use crate::domain::shared::{GatewayOrderId, IdempotencyKey, OrderId};

/// Order store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A row with this idempotency key already exists.
    #[error("Duplicate idempotency key: {0}")]
    DuplicateIdempotencyKey(IdempotencyKey),

    /// No row with this id.
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// Storage backend failure.
    #[error("Store backend error: {0}")]
    Backend(String),

    /// A stored value could not be decoded.
    #[error("Store serialization error: {0}")]
    Serialization(String),
}

/// Port for order persistence.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert a new row. Fails with [`StoreError::DuplicateIdempotencyKey`] if the key exists.
    async fn insert(&self, order: &Order) -> Result<(), StoreError>;

    /// Update an existing row.
    async fn save(&self, order: &Order) -> Result<(), StoreError>;

    /// Find a row by id.
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, StoreError>;

    /// Find the row carrying an idempotency key.
    async fn find_by_idempotency_key(&self, key: &IdempotencyKey) -> Result<Option<Order>, StoreError>;

    /// Find the row for a gateway order id.
    async fn find_by_gateway_id(&self, id: &GatewayOrderId) -> Result<Option<Order>, StoreError>;

    /// Bracket children of a parent row, in insertion order.
    async fn children_of(&self, parent: &OrderId) -> Result<Vec<Order>, StoreError>;

    /// Every row, oldest first.
    async fn all_orders(&self) -> Result<Vec<Order>, StoreError>;
}
