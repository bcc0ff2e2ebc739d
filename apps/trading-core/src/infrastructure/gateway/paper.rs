//! Paper gateway.
//!
//! An in-process brokerage that implements [`BrokerGateway`] without a
//! network: orders are accepted immediately, marketable orders fill after a
//! configurable delay, and every status change is pushed as a
//! [`GatewayEvent`] onto a bounded channel, the same way a live adapter
//! would. Failures can be injected for resilience testing.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use crate::application::ports::{
    BrokerGateway, GatewayError, GatewayOrderRequest, Instrument, MarketSnapshot, OrderModification,
};
use crate::domain::connection::{ExecutionReport, GatewayEvent, GatewayOrderStatus, OrderStatusUpdate};
use crate::domain::order::{OrderKind, OrderSide};
use crate::domain::risk::{AccountSnapshot, Position};
use crate::domain::shared::{ExecutionId, GatewayOrderId};

/// Paper gateway configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PaperGatewayConfig {
    /// Delay between acceptance and fill of a marketable order.
    pub fill_delay: Duration,
    /// Whether marketable orders fill on their own.
    pub auto_fill: bool,
    /// Base round-trip time reported by `ping`.
    pub ping_latency: Duration,
    /// Random extra latency added to each ping, up to this bound.
    pub latency_jitter: Duration,
    /// Commission charged per share.
    pub commission_per_share: Decimal,
    /// Capacity of the event channel.
    pub event_buffer: usize,
    /// Balances reported before any are set.
    pub account: AccountSnapshot,
}

impl Default for PaperGatewayConfig {
    fn default() -> Self {
        Self {
            fill_delay: Duration::from_millis(50),
            auto_fill: true,
            ping_latency: Duration::from_millis(1),
            latency_jitter: Duration::from_millis(2),
            commission_per_share: Decimal::new(5, 3),
            event_buffer: 1_024,
            account: AccountSnapshot {
                portfolio_value: Decimal::from(100_000),
                cash: Decimal::from(100_000),
                margin_used: Decimal::ZERO,
                margin_available: Decimal::from(100_000),
            },
        }
    }
}

#[derive(Debug, Clone)]
struct PaperOrder {
    request: GatewayOrderRequest,
    status: GatewayOrderStatus,
    filled: Decimal,
    avg_price: Option<Decimal>,
}

impl PaperOrder {
    fn status_update(&self, id: &GatewayOrderId, message: Option<String>) -> OrderStatusUpdate {
        OrderStatusUpdate {
            gateway_order_id: id.clone(),
            status: self.status,
            filled_quantity: self.filled,
            remaining_quantity: self.request.quantity - self.filled,
            avg_fill_price: self.avg_price,
            message,
            reported_at: Utc::now(),
        }
    }
}

#[derive(Debug, Default)]
struct PaperState {
    orders: HashMap<GatewayOrderId, PaperOrder>,
    instruments: HashMap<String, Instrument>,
    prices: HashMap<String, Decimal>,
    halted: HashSet<String>,
    subscriptions: HashSet<String>,
    account: AccountSnapshot,
    positions: HashMap<String, Position>,
    placed: Vec<GatewayOrderRequest>,
    fail_connects: u32,
    fail_orders: u32,
    connect_calls: u32,
}

/// In-process simulated brokerage.
#[derive(Debug)]
pub struct PaperGateway {
    config: PaperGatewayConfig,
    connected: AtomicBool,
    hang_orders: AtomicBool,
    hold_orders: AtomicBool,
    unresponsive: AtomicBool,
    next_id: AtomicI64,
    events: mpsc::Sender<GatewayEvent>,
    state: Mutex<PaperState>,
    self_ref: Weak<Self>,
}

impl PaperGateway {
    /// Create a disconnected gateway and the receiving end of its event channel.
    #[must_use]
    pub fn new(config: PaperGatewayConfig) -> (Arc<Self>, mpsc::Receiver<GatewayEvent>) {
        let (tx, rx) = mpsc::channel(config.event_buffer.max(1));
        let gateway = Arc::new_cyclic(|self_ref| Self {
            state: Mutex::new(PaperState {
                account: config.account,
                ..PaperState::default()
            }),
            config,
            connected: AtomicBool::new(false),
            hang_orders: AtomicBool::new(false),
            hold_orders: AtomicBool::new(false),
            unresponsive: AtomicBool::new(false),
            next_id: AtomicI64::new(1),
            events: tx,
            self_ref: self_ref.clone(),
        });
        (gateway, rx)
    }

    // ========================================================================
    // Market and account state
    // ========================================================================

    /// Set the last price of a ticker.
    pub fn set_price(&self, ticker: impl Into<String>, price: Decimal) {
        self.state.lock().prices.insert(ticker.into(), price);
    }

    /// Halt or resume a ticker.
    pub fn set_halted(&self, ticker: impl Into<String>, halted: bool) {
        let ticker = ticker.into();
        let mut state = self.state.lock();
        if halted {
            state.halted.insert(ticker);
        } else {
            state.halted.remove(&ticker);
        }
    }

    /// Replace the account balances.
    pub fn set_account(&self, account: AccountSnapshot) {
        self.state.lock().account = account;
    }

    /// Insert or replace a position.
    pub fn set_position(&self, position: Position) {
        self.state
            .lock()
            .positions
            .insert(position.ticker.clone(), position);
    }

    // ========================================================================
    // Failure injection
    // ========================================================================

    /// Fail the next `n` connection attempts.
    pub fn fail_next_connects(&self, n: u32) {
        self.state.lock().fail_connects = n;
    }

    /// Fail the next `n` order placements with a transport error.
    pub fn fail_next_orders(&self, n: u32) {
        self.state.lock().fail_orders = n;
    }

    /// Make order placement never return.
    pub fn hang_orders(&self, hang: bool) {
        self.hang_orders.store(hang, Ordering::SeqCst);
    }

    /// Assign ids to new orders but leave them pending, never acknowledged.
    pub fn hold_orders(&self, hold: bool) {
        self.hold_orders.store(hold, Ordering::SeqCst);
    }

    /// Make pings never return while the session still looks connected.
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.unresponsive.store(unresponsive, Ordering::SeqCst);
    }

    /// Drop the session as if the network failed.
    pub fn drop_connection(&self, reason: impl Into<String>) {
        self.connected.store(false, Ordering::SeqCst);
        self.emit(GatewayEvent::Disconnected {
            reason: reason.into(),
        });
    }

    /// Report a gateway error code.
    pub fn emit_error(&self, code: i32, message: impl Into<String>) {
        self.emit(GatewayEvent::Error {
            code,
            message: message.into(),
            order_id: None,
        });
    }

    /// Execute `quantity` more of an order at `price`.
    pub fn fill(&self, order_id: &GatewayOrderId, quantity: Decimal, price: Decimal) {
        let events = {
            let mut state = self.state.lock();
            let Some(order) = state.orders.get_mut(order_id) else {
                return;
            };
            if order.status.is_final() {
                return;
            }
            let quantity = quantity.min(order.request.quantity - order.filled);
            if quantity <= Decimal::ZERO {
                return;
            }
            let previous = order.avg_price.unwrap_or(Decimal::ZERO) * order.filled;
            order.filled += quantity;
            let avg_price = (previous + price * quantity) / order.filled;
            order.avg_price = Some(avg_price);
            order.status = if order.filled >= order.request.quantity {
                GatewayOrderStatus::Filled
            } else {
                GatewayOrderStatus::PartiallyFilled
            };

            let execution = ExecutionReport {
                execution_id: ExecutionId::generate(),
                gateway_order_id: order_id.clone(),
                ticker: order.request.ticker.clone(),
                side: order.request.side,
                quantity,
                price,
                commission: quantity * self.config.commission_per_share,
                cumulative_quantity: order.filled,
                avg_price,
                executed_at: Utc::now(),
            };
            vec![
                GatewayEvent::Execution(execution),
                GatewayEvent::OrderStatus(order.status_update(order_id, None)),
            ]
        };
        for event in events {
            self.emit(event);
        }
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Every leg placed, in order.
    #[must_use]
    pub fn placed_orders(&self) -> Vec<GatewayOrderRequest> {
        self.state.lock().placed.clone()
    }

    /// Number of `connect` calls received.
    #[must_use]
    pub fn connect_calls(&self) -> u32 {
        self.state.lock().connect_calls
    }

    /// Tickers with a market-data subscription.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        let mut subscriptions: Vec<String> =
            self.state.lock().subscriptions.iter().cloned().collect();
        subscriptions.sort();
        subscriptions
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn emit(&self, event: GatewayEvent) {
        if let Err(e) = self.events.try_send(event) {
            tracing::warn!(error = %e, "Paper gateway event dropped");
        }
    }

    fn ensure_connected(&self) -> Result<(), GatewayError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(GatewayError::NotConnected)
        }
    }

    fn fill_price(state: &PaperState, request: &GatewayOrderRequest) -> Option<Decimal> {
        let last = state.prices.get(&request.ticker).copied();
        match request.kind {
            OrderKind::Market => last,
            OrderKind::Limit | OrderKind::Bracket => {
                let limit = request.limit_price?;
                match (request.side, last) {
                    (OrderSide::Buy, Some(last)) if last <= limit => Some(last),
                    (OrderSide::Sell, Some(last)) if last >= limit => Some(last),
                    _ => None,
                }
            }
            OrderKind::Stop | OrderKind::StopLimit => None,
        }
    }

    fn schedule_fill(&self, order_id: GatewayOrderId) {
        if !self.config.auto_fill {
            return;
        }
        let Some(gateway) = self.self_ref.upgrade() else {
            return;
        };
        let delay = self.config.fill_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let target = {
                let state = gateway.state.lock();
                state.orders.get(&order_id).and_then(|order| {
                    if order.status != GatewayOrderStatus::Accepted {
                        return None;
                    }
                    Self::fill_price(&state, &order.request).map(|price| (order.request.quantity, price))
                })
            };
            if let Some((quantity, price)) = target {
                gateway.fill(&order_id, quantity, price);
            }
        });
    }
}

#[async_trait]
impl BrokerGateway for PaperGateway {
    async fn connect(&self) -> Result<(), GatewayError> {
        {
            let mut state = self.state.lock();
            state.connect_calls += 1;
            if state.fail_connects > 0 {
                state.fail_connects -= 1;
                return Err(GatewayError::ConnectionFailed {
                    message: "simulated connection refusal".to_string(),
                });
            }
        }
        self.connected.store(true, Ordering::SeqCst);
        self.emit(GatewayEvent::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), GatewayError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> Result<Duration, GatewayError> {
        self.ensure_connected()?;
        if self.unresponsive.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let jitter_ms = u64::try_from(self.config.latency_jitter.as_millis()).unwrap_or(u64::MAX);
        let extra = if jitter_ms > 0 {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        let latency = self.config.ping_latency + extra;
        tokio::time::sleep(latency).await;
        Ok(latency)
    }

    async fn qualify_instrument(&self, ticker: &str) -> Result<Instrument, GatewayError> {
        self.ensure_connected()?;
        let ticker = ticker.trim().to_uppercase();
        if ticker.is_empty() {
            return Err(GatewayError::UnknownInstrument { ticker });
        }
        let mut state = self.state.lock();
        let next_contract = i64::try_from(state.instruments.len()).unwrap_or(i64::MAX) + 1;
        let instrument = state
            .instruments
            .entry(ticker.clone())
            .or_insert_with(|| Instrument {
                ticker,
                contract_id: next_contract,
                exchange: "SMART".to_string(),
                currency: "USD".to_string(),
            })
            .clone();
        Ok(instrument)
    }

    async fn place_order(
        &self,
        instrument: &Instrument,
        request: &GatewayOrderRequest,
    ) -> Result<GatewayOrderId, GatewayError> {
        self.ensure_connected()?;
        if self.hang_orders.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let id = GatewayOrderId::new(self.next_id.fetch_add(1, Ordering::SeqCst).to_string());
        let (events, fills) = {
            let mut state = self.state.lock();
            if state.fail_orders > 0 {
                state.fail_orders -= 1;
                return Err(GatewayError::Transport {
                    code: 162,
                    message: "simulated order failure".to_string(),
                });
            }
            if state.halted.contains(&instrument.ticker) {
                return Err(GatewayError::Rejected {
                    code: 201,
                    reason: format!("trading in {} is halted", instrument.ticker),
                });
            }

            state.placed.push(request.clone());
            state.orders.insert(
                id.clone(),
                PaperOrder {
                    request: request.clone(),
                    status: GatewayOrderStatus::PendingSubmit,
                    filled: Decimal::ZERO,
                    avg_price: None,
                },
            );

            let mut events = Vec::new();
            let mut fills = Vec::new();
            if request.transmit && !self.hold_orders.load(Ordering::SeqCst) {
                // Transmitting a leg releases it and every held leg of its bracket.
                let root = request.parent_id.clone().unwrap_or_else(|| id.clone());
                let released: Vec<GatewayOrderId> = state
                    .orders
                    .iter()
                    .filter(|(order_id, order)| {
                        order.status == GatewayOrderStatus::PendingSubmit
                            && (**order_id == root || order.request.parent_id.as_ref() == Some(&root))
                    })
                    .map(|(order_id, _)| order_id.clone())
                    .collect();
                for order_id in released {
                    if let Some(order) = state.orders.get_mut(&order_id) {
                        order.status = GatewayOrderStatus::Accepted;
                        events.push(GatewayEvent::OrderStatus(order.status_update(&order_id, None)));
                        if order.request.parent_id.is_none() {
                            fills.push(order_id);
                        }
                    }
                }
            }
            (events, fills)
        };

        for event in events {
            self.emit(event);
        }
        for order_id in fills {
            self.schedule_fill(order_id);
        }
        Ok(id)
    }

    async fn cancel_order(&self, order_id: &GatewayOrderId) -> Result<(), GatewayError> {
        self.ensure_connected()?;
        let update = {
            let mut state = self.state.lock();
            let Some(order) = state.orders.get_mut(order_id) else {
                return Err(GatewayError::OrderNotFound {
                    order_id: order_id.to_string(),
                });
            };
            if order.status.is_final() {
                return Err(GatewayError::Rejected {
                    code: 161,
                    reason: format!("order {order_id} is already {:?}", order.status),
                });
            }
            order.status = GatewayOrderStatus::Cancelled;
            order.status_update(order_id, None)
        };
        self.emit(GatewayEvent::OrderStatus(update));
        Ok(())
    }

    async fn modify_order(
        &self,
        order_id: &GatewayOrderId,
        modification: &OrderModification,
    ) -> Result<(), GatewayError> {
        self.ensure_connected()?;
        let mut state = self.state.lock();
        let Some(order) = state.orders.get_mut(order_id) else {
            return Err(GatewayError::OrderNotFound {
                order_id: order_id.to_string(),
            });
        };
        if order.status.is_final() {
            return Err(GatewayError::Rejected {
                code: 104,
                reason: format!("order {order_id} can no longer be modified"),
            });
        }
        if let Some(quantity) = modification.quantity {
            order.request.quantity = quantity;
        }
        if modification.limit_price.is_some() {
            order.request.limit_price = modification.limit_price;
        }
        if modification.stop_price.is_some() {
            order.request.stop_price = modification.stop_price;
        }
        Ok(())
    }

    async fn order_status(&self, order_id: &GatewayOrderId) -> Result<OrderStatusUpdate, GatewayError> {
        self.ensure_connected()?;
        self.state
            .lock()
            .orders
            .get(order_id)
            .map(|order| order.status_update(order_id, None))
            .ok_or_else(|| GatewayError::OrderNotFound {
                order_id: order_id.to_string(),
            })
    }

    async fn account_snapshot(&self) -> Result<AccountSnapshot, GatewayError> {
        self.ensure_connected()?;
        Ok(self.state.lock().account)
    }

    async fn positions(&self) -> Result<Vec<Position>, GatewayError> {
        self.ensure_connected()?;
        let mut positions: Vec<Position> = self.state.lock().positions.values().cloned().collect();
        positions.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        Ok(positions)
    }

    async fn subscribe_market_data(&self, instrument: &Instrument) -> Result<(), GatewayError> {
        self.ensure_connected()?;
        self.state
            .lock()
            .subscriptions
            .insert(instrument.ticker.clone());
        Ok(())
    }

    async fn market_snapshot(&self, instrument: &Instrument) -> Result<MarketSnapshot, GatewayError> {
        self.ensure_connected()?;
        let state = self.state.lock();
        Ok(MarketSnapshot {
            ticker: instrument.ticker.clone(),
            last: state.prices.get(&instrument.ticker).copied(),
            bid: None,
            ask: None,
            volume: Decimal::ZERO,
            halted: state.halted.contains(&instrument.ticker),
            at: Utc::now(),
        })
    }
}
