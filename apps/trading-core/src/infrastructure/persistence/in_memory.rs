//! In-memory adapters for the order store and the portfolio read model.
//!
//! Used by tests and by paper trading when no database is configured.
//! The order store enforces the same idempotency-key uniqueness as the
//! SQLite store. The portfolio is both the risk engine's read model and
//! the ledger the connector books executions into.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::application::ports::{
    OrderStore, PortfolioLedger, PortfolioReadModel, ReadModelError, StoreError,
};
use crate::domain::order::Order;
use crate::domain::risk::{AccountSnapshot, PortfolioValuePoint, Position, TradeRecord};
use crate::domain::shared::{GatewayOrderId, IdempotencyKey, OrderId};

// ============================================================================
// Order store
// ============================================================================

/// Order store held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    rows: RwLock<Vec<Order>>,
    fail_writes: AtomicBool,
}

impl InMemoryOrderStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with a backend error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("writes disabled".to_string()));
        }
        Ok(())
    }

    fn find(&self, predicate: impl Fn(&Order) -> bool) -> Option<Order> {
        self.rows.read().iter().find(|o| predicate(o)).cloned()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: &Order) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut rows = self.rows.write();
        if rows.iter().any(|o| o.idempotency_key == order.idempotency_key) {
            return Err(StoreError::DuplicateIdempotencyKey(order.idempotency_key.clone()));
        }
        rows.push(order.clone());
        Ok(())
    }

    async fn save(&self, order: &Order) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut rows = self.rows.write();
        let Some(row) = rows.iter_mut().find(|o| o.id == order.id) else {
            return Err(StoreError::NotFound(order.id.clone()));
        };
        *row = order.clone();
        Ok(())
    }

    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.find(|o| &o.id == id))
    }

    async fn find_by_idempotency_key(&self, key: &IdempotencyKey) -> Result<Option<Order>, StoreError> {
        Ok(self.find(|o| &o.idempotency_key == key))
    }

    async fn find_by_gateway_id(&self, id: &GatewayOrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.find(|o| o.gateway_order_id.as_ref() == Some(id)))
    }

    async fn children_of(&self, parent: &OrderId) -> Result<Vec<Order>, StoreError> {
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|o| o.parent_id.as_ref() == Some(parent))
            .cloned()
            .collect())
    }

    async fn all_orders(&self) -> Result<Vec<Order>, StoreError> {
        Ok(self.rows.read().clone())
    }
}

// ============================================================================
// Portfolio read model
// ============================================================================

#[derive(Debug, Default)]
struct PortfolioState {
    account: AccountSnapshot,
    positions: HashMap<String, Position>,
    sectors: HashMap<String, String>,
    trades: Vec<TradeRecord>,
    daily_values: Vec<PortfolioValuePoint>,
    order_times: Vec<DateTime<Utc>>,
}

/// Portfolio read model held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryPortfolio {
    state: RwLock<PortfolioState>,
}

impl InMemoryPortfolio {
    /// Create a portfolio with the given balances and nothing else.
    #[must_use]
    pub fn new(account: AccountSnapshot) -> Self {
        Self {
            state: RwLock::new(PortfolioState {
                account,
                ..PortfolioState::default()
            }),
        }
    }

    /// Replace the balances.
    pub fn set_account(&self, account: AccountSnapshot) {
        self.state.write().account = account;
    }

    /// Insert or replace a position.
    pub fn set_position(&self, position: Position) {
        self.state
            .write()
            .positions
            .insert(position.ticker.clone(), position);
    }

    /// Replace every position.
    pub fn replace_positions(&self, positions: Vec<Position>) {
        self.state.write().positions = positions
            .into_iter()
            .map(|p| (p.ticker.clone(), p))
            .collect();
    }

    /// Remove a position.
    pub fn remove_position(&self, ticker: &str) {
        self.state.write().positions.remove(ticker);
    }

    /// Record the sector of a ticker.
    pub fn set_sector(&self, ticker: impl Into<String>, sector: impl Into<String>) {
        self.state.write().sectors.insert(ticker.into(), sector.into());
    }

    /// Append an executed trade.
    pub fn record_trade(&self, trade: TradeRecord) {
        self.state.write().trades.push(trade);
    }

    /// Append a daily closing value. Points are kept in date order.
    pub fn push_daily_value(&self, point: PortfolioValuePoint) {
        let mut state = self.state.write();
        state.daily_values.push(point);
        state.daily_values.sort_by_key(|p| p.date);
    }

    /// Count an order submitted at `at`.
    pub fn record_order(&self, at: DateTime<Utc>) {
        self.state.write().order_times.push(at);
    }

    /// Count every stored top-level order created at or after `since`.
    ///
    /// Restores the daily order count from a durable store after a restart.
    pub fn count_stored_orders(&self, orders: &[Order], since: DateTime<Utc>) -> usize {
        let mut state = self.state.write();
        let before = state.order_times.len();
        state.order_times.extend(
            orders
                .iter()
                .filter(|o| o.parent_id.is_none() && o.created_at >= since)
                .map(|o| o.created_at),
        );
        state.order_times.len() - before
    }
}

#[async_trait]
impl PortfolioLedger for InMemoryPortfolio {
    async fn apply_trade(&self, trade: &TradeRecord) -> Result<bool, ReadModelError> {
        let mut state = self.state.write();
        if let Some(id) = &trade.execution_id
            && state.trades.iter().any(|t| t.execution_id.as_ref() == Some(id))
        {
            return Ok(false);
        }

        let mut position = state
            .positions
            .remove(&trade.ticker)
            .unwrap_or_else(|| Position::new(&trade.ticker, Decimal::ZERO, Decimal::ZERO, trade.price));
        let realized = position.apply_trade(trade);
        if !position.quantity.is_zero() {
            state.positions.insert(trade.ticker.clone(), position);
        }

        let notional = trade.signed_quantity() * trade.price;
        let account = &mut state.account;
        account.cash -= notional + trade.commission;
        account.margin_available = (account.margin_available - notional).max(Decimal::ZERO);
        account.portfolio_value -= trade.commission;

        state.trades.push(TradeRecord {
            realized_pnl: realized,
            ..trade.clone()
        });
        Ok(true)
    }

    async fn count_order(&self, at: DateTime<Utc>) -> Result<(), ReadModelError> {
        self.record_order(at);
        Ok(())
    }
}

#[async_trait]
impl PortfolioReadModel for InMemoryPortfolio {
    async fn account(&self) -> Result<AccountSnapshot, ReadModelError> {
        Ok(self.state.read().account)
    }

    async fn positions(&self) -> Result<Vec<Position>, ReadModelError> {
        let state = self.state.read();
        let mut positions: Vec<Position> = state
            .positions
            .values()
            .map(|p| {
                let mut p = p.clone();
                if p.sector.is_none() {
                    p.sector = state.sectors.get(&p.ticker).cloned();
                }
                p
            })
            .collect();
        positions.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        Ok(positions)
    }

    async fn position(&self, ticker: &str) -> Result<Option<Position>, ReadModelError> {
        Ok(self.state.read().positions.get(ticker).cloned())
    }

    async fn trades_since(&self, since: DateTime<Utc>) -> Result<Vec<TradeRecord>, ReadModelError> {
        Ok(self
            .state
            .read()
            .trades
            .iter()
            .filter(|t| t.executed_at >= since)
            .cloned()
            .collect())
    }

    async fn daily_values(&self, days: u32) -> Result<Vec<PortfolioValuePoint>, ReadModelError> {
        let cutoff = (Utc::now() - Duration::days(i64::from(days))).date_naive();
        Ok(self
            .state
            .read()
            .daily_values
            .iter()
            .filter(|p| p.date >= cutoff)
            .cloned()
            .collect())
    }

    async fn sector_of(&self, ticker: &str) -> Result<Option<String>, ReadModelError> {
        let state = self.state.read();
        Ok(state.sectors.get(ticker).cloned().or_else(|| {
            state
                .positions
                .get(ticker)
                .and_then(|p| p.sector.clone())
        }))
    }

    async fn order_count_since(&self, since: DateTime<Utc>) -> Result<u32, ReadModelError> {
        let count = self
            .state
            .read()
            .order_times
            .iter()
            .filter(|at| **at >= since)
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{OrderContext, OrderRequest, OrderSide, OrderState};
    use crate::domain::shared::ExecutionId;
    use rust_decimal_macros::dec;

    fn order(key: &str) -> Order {
        let mut context =
            OrderContext::new(OrderRequest::market("AAPL", OrderSide::Buy, dec!(10), key));
        context.state = OrderState::Acknowledged;
        context.gateway_order_id = Some(GatewayOrderId::new(format!("gw-{key}")));
        Order::from_context(&context)
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_key() {
        let store = InMemoryOrderStore::new();
        store.insert(&order("K1")).await.unwrap();

        let Err(err) = store.insert(&order("K1")).await else {
            panic!("duplicate key must be refused");
        };
        assert_eq!(err, StoreError::DuplicateIdempotencyKey(IdempotencyKey::new("K1")));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn lookups_by_key_and_gateway_id() {
        let store = InMemoryOrderStore::new();
        let row = order("K2");
        store.insert(&row).await.unwrap();

        let by_key = store
            .find_by_idempotency_key(&IdempotencyKey::new("K2"))
            .await
            .unwrap();
        assert_eq!(by_key.map(|o| o.id), Some(row.id.clone()));

        let by_gateway = store
            .find_by_gateway_id(&GatewayOrderId::new("gw-K2"))
            .await
            .unwrap();
        assert_eq!(by_gateway.map(|o| o.id), Some(row.id));
    }

    #[tokio::test]
    async fn save_requires_existing_row() {
        let store = InMemoryOrderStore::new();
        let row = order("K3");
        assert!(matches!(store.save(&row).await, Err(StoreError::NotFound(_))));

        store.insert(&row).await.unwrap();
        let mut updated = row.clone();
        updated.apply_status(OrderState::Filled, Utc::now());
        store.save(&updated).await.unwrap();

        let stored = store.find_by_id(&row.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderState::Filled);
    }

    #[tokio::test]
    async fn failing_writes_surface_backend_error() {
        let store = InMemoryOrderStore::new();
        store.fail_writes(true);
        assert!(matches!(store.insert(&order("K4")).await, Err(StoreError::Backend(_))));
        assert!(store.is_empty());
    }

    fn execution(id: &str, side: OrderSide, quantity: Decimal, price: Decimal) -> TradeRecord {
        TradeRecord {
            execution_id: Some(ExecutionId::new(id)),
            ticker: "AAPL".to_string(),
            side,
            quantity,
            price,
            realized_pnl: Decimal::ZERO,
            commission: dec!(1),
            executed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn ledger_books_trades_into_positions_and_history() {
        let portfolio = InMemoryPortfolio::new(AccountSnapshot {
            portfolio_value: dec!(100_000),
            cash: dec!(100_000),
            margin_used: dec!(0),
            margin_available: dec!(100_000),
        });
        let since = Utc::now() - Duration::minutes(1);

        assert!(portfolio.apply_trade(&execution("E1", OrderSide::Buy, dec!(10), dec!(150))).await.unwrap());
        // The same execution is booked once.
        assert!(!portfolio.apply_trade(&execution("E1", OrderSide::Buy, dec!(10), dec!(150))).await.unwrap());

        let position = portfolio.position("AAPL").await.unwrap().unwrap();
        assert_eq!(position.quantity, dec!(10));
        assert_eq!(position.avg_cost, dec!(150));
        let account = portfolio.account().await.unwrap();
        assert_eq!(account.cash, dec!(98_499));
        assert_eq!(account.margin_available, dec!(98_500));

        assert!(portfolio.apply_trade(&execution("E2", OrderSide::Sell, dec!(10), dec!(160))).await.unwrap());
        assert!(portfolio.position("AAPL").await.unwrap().is_none());

        let trades = portfolio.trades_since(since).await.unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[1].realized_pnl, dec!(100));
    }

    #[tokio::test]
    async fn stored_orders_restore_the_daily_count() {
        let portfolio = InMemoryPortfolio::new(AccountSnapshot::default());
        let mut child = order("K6");
        child.parent_id = Some(OrderId::new("parent"));
        let mut old = order("K7");
        old.created_at = Utc::now() - Duration::days(3);
        let since = Utc::now() - Duration::hours(1);

        let counted = portfolio.count_stored_orders(&[order("K5"), child, old], since);

        assert_eq!(counted, 1);
        assert_eq!(portfolio.order_count_since(since).await.unwrap(), 1);
        portfolio.count_order(Utc::now()).await.unwrap();
        assert_eq!(portfolio.order_count_since(since).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn portfolio_counts_and_sectors() {
        let portfolio = InMemoryPortfolio::new(AccountSnapshot::default());
        portfolio.set_position(Position::new("AAPL", dec!(10), dec!(100), dec!(110)));
        portfolio.set_sector("AAPL", "Technology");
        let now = Utc::now();
        portfolio.record_order(now - Duration::days(2));
        portfolio.record_order(now);

        let positions = portfolio.positions().await.unwrap();
        assert_eq!(positions[0].sector.as_deref(), Some("Technology"));
        assert_eq!(
            portfolio.order_count_since(now - Duration::hours(1)).await.unwrap(),
            1
        );
        assert_eq!(
            portfolio.sector_of("AAPL").await.unwrap().as_deref(),
            Some("Technology")
        );
        assert!(portfolio.position("MSFT").await.unwrap().is_none());
    }
}
