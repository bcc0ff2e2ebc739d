//! SQLite order store.
//!
//! One `orders` table. The `UNIQUE` idempotency key makes duplicate
//! submissions collapse across process restarts. Decimals are stored as
//! text to keep their scale, timestamps as RFC 3339.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use crate::application::ports::{OrderStore, StoreError};
use crate::domain::order::Order;
use crate::domain::shared::{GatewayOrderId, IdempotencyKey, OrderId, SignalId};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS orders (
    id               TEXT PRIMARY KEY,
    gateway_order_id TEXT,
    ticker           TEXT NOT NULL,
    side             TEXT NOT NULL,
    kind             TEXT NOT NULL,
    quantity         TEXT NOT NULL,
    limit_price      TEXT,
    stop_price       TEXT,
    time_in_force    TEXT NOT NULL,
    status           TEXT NOT NULL,
    filled_quantity  TEXT NOT NULL,
    avg_fill_price   TEXT,
    commission       TEXT NOT NULL,
    idempotency_key  TEXT NOT NULL UNIQUE,
    parent_id        TEXT,
    signal_id        TEXT,
    note             TEXT,
    created_at       TEXT NOT NULL,
    submitted_at     TEXT,
    filled_at        TEXT,
    cancelled_at     TEXT
);
CREATE INDEX IF NOT EXISTS idx_orders_gateway_order_id ON orders (gateway_order_id);
CREATE INDEX IF NOT EXISTS idx_orders_parent_id ON orders (parent_id);
";

const COLUMNS: &str = "id, gateway_order_id, ticker, side, kind, quantity, limit_price, \
    stop_price, time_in_force, status, filled_quantity, avg_fill_price, commission, \
    idempotency_key, parent_id, signal_id, note, created_at, submitted_at, filled_at, cancelled_at";

/// Order store backed by a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteOrderStore {
    pool: SqlitePool,
}

impl SqliteOrderStore {
    /// Open (creating if needed) the database file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(backend)?;
        Self::with_pool(pool).await
    }

    /// Open a database from a connection URL such as `sqlite://orders.db`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(backend)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(backend)?;
        Self::with_pool(pool).await
    }

    /// A private in-memory database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(backend)?;
        // Every connection to `:memory:` is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(backend)?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&pool).await.map_err(backend)?;
        tracing::debug!("Order store schema ready");
        Ok(Self { pool })
    }

    /// Close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn fetch_one_where(&self, column: &str, value: &str) -> Result<Option<Order>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM orders WHERE {column} = ? ORDER BY rowid LIMIT 1");
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(decode_order).transpose()
    }
}

#[async_trait]
impl OrderStore for SqliteOrderStore {
    async fn insert(&self, order: &Order) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO orders ({COLUMNS}) VALUES \
             (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        let result = sqlx::query(&sql)
            .bind(order.id.as_str())
            .bind(order.gateway_order_id.as_ref().map(GatewayOrderId::as_str))
            .bind(order.ticker.as_str())
            .bind(enum_text(&order.side)?)
            .bind(enum_text(&order.kind)?)
            .bind(order.quantity.to_string())
            .bind(order.limit_price.map(|p| p.to_string()))
            .bind(order.stop_price.map(|p| p.to_string()))
            .bind(enum_text(&order.time_in_force)?)
            .bind(enum_text(&order.status)?)
            .bind(order.filled_quantity.to_string())
            .bind(order.avg_fill_price.map(|p| p.to_string()))
            .bind(order.commission.to_string())
            .bind(order.idempotency_key.as_str())
            .bind(order.parent_id.as_ref().map(OrderId::as_str))
            .bind(order.signal_id.as_ref().map(SignalId::as_str))
            .bind(order.note.as_deref())
            .bind(order.created_at.to_rfc3339())
            .bind(order.submitted_at.map(|t| t.to_rfc3339()))
            .bind(order.filled_at.map(|t| t.to_rfc3339()))
            .bind(order.cancelled_at.map(|t| t.to_rfc3339()))
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::DuplicateIdempotencyKey(order.idempotency_key.clone()))
            }
            Err(e) => Err(backend(e)),
        }
    }

    async fn save(&self, order: &Order) -> Result<(), StoreError> {
        let result = sqlx::query(
            r"
            UPDATE orders SET
                gateway_order_id = ?,
                status = ?,
                filled_quantity = ?,
                avg_fill_price = ?,
                commission = ?,
                limit_price = ?,
                stop_price = ?,
                note = ?,
                submitted_at = ?,
                filled_at = ?,
                cancelled_at = ?
            WHERE id = ?
            ",
        )
        .bind(order.gateway_order_id.as_ref().map(GatewayOrderId::as_str))
        .bind(enum_text(&order.status)?)
        .bind(order.filled_quantity.to_string())
        .bind(order.avg_fill_price.map(|p| p.to_string()))
        .bind(order.commission.to_string())
        .bind(order.limit_price.map(|p| p.to_string()))
        .bind(order.stop_price.map(|p| p.to_string()))
        .bind(order.note.as_deref())
        .bind(order.submitted_at.map(|t| t.to_rfc3339()))
        .bind(order.filled_at.map(|t| t.to_rfc3339()))
        .bind(order.cancelled_at.map(|t| t.to_rfc3339()))
        .bind(order.id.as_str())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(order.id.clone()));
        }
        Ok(())
    }

    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        self.fetch_one_where("id", id.as_str()).await
    }

    async fn find_by_idempotency_key(&self, key: &IdempotencyKey) -> Result<Option<Order>, StoreError> {
        self.fetch_one_where("idempotency_key", key.as_str()).await
    }

    async fn find_by_gateway_id(&self, id: &GatewayOrderId) -> Result<Option<Order>, StoreError> {
        self.fetch_one_where("gateway_order_id", id.as_str()).await
    }

    async fn children_of(&self, parent: &OrderId) -> Result<Vec<Order>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM orders WHERE parent_id = ? ORDER BY rowid");
        let rows = sqlx::query(&sql)
            .bind(parent.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter().map(decode_order).collect()
    }

    async fn all_orders(&self) -> Result<Vec<Order>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM orders ORDER BY rowid");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter().map(decode_order).collect()
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn enum_text<T: Serialize>(value: &T) -> Result<String, StoreError> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(text)) => Ok(text),
        Ok(other) => Err(StoreError::Serialization(format!("expected a string, got {other}"))),
        Err(e) => Err(StoreError::Serialization(e.to_string())),
    }
}

fn parse_enum<T: DeserializeOwned>(text: String) -> Result<T, StoreError> {
    serde_json::from_value(serde_json::Value::String(text))
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn parse_decimal(text: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(text).map_err(|e| StoreError::Serialization(format!("{text}: {e}")))
}

fn parse_time(text: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("{text}: {e}")))
}

fn text(row: &SqliteRow, column: &str) -> Result<String, StoreError> {
    row.try_get(column).map_err(backend)
}

fn optional_text(row: &SqliteRow, column: &str) -> Result<Option<String>, StoreError> {
    row.try_get(column).map_err(backend)
}

fn decode_order(row: &SqliteRow) -> Result<Order, StoreError> {
    let optional_decimal = |column: &str| -> Result<Option<Decimal>, StoreError> {
        optional_text(row, column)?
            .as_deref()
            .map(parse_decimal)
            .transpose()
    };
    let optional_time = |column: &str| -> Result<Option<DateTime<Utc>>, StoreError> {
        optional_text(row, column)?
            .as_deref()
            .map(parse_time)
            .transpose()
    };

    Ok(Order {
        id: OrderId::new(text(row, "id")?),
        gateway_order_id: optional_text(row, "gateway_order_id")?.map(GatewayOrderId::new),
        ticker: text(row, "ticker")?,
        side: parse_enum(text(row, "side")?)?,
        kind: parse_enum(text(row, "kind")?)?,
        quantity: parse_decimal(&text(row, "quantity")?)?,
        limit_price: optional_decimal("limit_price")?,
        stop_price: optional_decimal("stop_price")?,
        time_in_force: parse_enum(text(row, "time_in_force")?)?,
        status: parse_enum(text(row, "status")?)?,
        filled_quantity: parse_decimal(&text(row, "filled_quantity")?)?,
        avg_fill_price: optional_decimal("avg_fill_price")?,
        commission: parse_decimal(&text(row, "commission")?)?,
        idempotency_key: IdempotencyKey::new(text(row, "idempotency_key")?),
        parent_id: optional_text(row, "parent_id")?.map(OrderId::new),
        signal_id: optional_text(row, "signal_id")?.map(SignalId::new),
        note: optional_text(row, "note")?,
        created_at: parse_time(&text(row, "created_at")?)?,
        submitted_at: optional_time("submitted_at")?,
        filled_at: optional_time("filled_at")?,
        cancelled_at: optional_time("cancelled_at")?,
    })
}
