//! Resilient Gateway Connector
//!
//! Owns the brokerage session and keeps it usable:
//!
//! - connection state machine with bounded initial connection retries
//! - background reconnection with capped exponential backoff
//! - heartbeat and stale-session health checks (see `monitors`)
//! - circuit breaker around every request
//! - idempotent single and bracket order submission
//!
//! Requests made while the connection is not usable fail immediately with
//! [`ConnectorError::NotConnected`]; nothing is queued for later.
//!
//! Gateway events arrive on a bounded channel. Order status changes and
//! executions are written through to the order store and forwarded to
//! the lifecycle manager on the update channel returned by
//! [`ResilientConnector::new`]. With a ledger attached, executions are
//! also booked as trades and fresh placements counted, before the update
//! is forwarded.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::monitors::{MonitorConfig, MonitorTarget, spawn_monitors};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{
    BracketIds, BracketOrder, BrokerGateway, ConnectorError, GatewayError, GatewayOrderRequest,
    Instrument, MarketSnapshot, OrderModification, OrderRouter, OrderStore, PortfolioLedger,
    StoreError, SubmissionReceipt,
};
use crate::domain::connection::{
    ConnectionHealth, ConnectionState, ExecutionReport, GatewayEvent, GatewayOrderStatus,
    HealthSnapshot, OrderStatusUpdate, OrderUpdate,
};
use crate::domain::order::{Order, OrderKind, OrderRequest, OrderState, TimeInForce};
use crate::domain::risk::{AccountSnapshot, Position, TradeRecord};
use crate::domain::shared::{GatewayOrderId, IdempotencyKey, OrderId};
use crate::error::{ErrorClass, ErrorRecord};
use crate::infrastructure::resilience::{
    BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics,
};
use crate::observability;

const STOP_LOSS_LEG: &str = "stop_loss";
const TAKE_PROFIT_LEG: &str = "take_profit";

/// Connector configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectorSettings {
    /// Backoff for the initial `connect()`.
    pub connect: ReconnectConfig,
    /// Backoff for recovering a lost session.
    pub reconnect: ReconnectConfig,
    /// Bound on every single gateway request.
    pub request_timeout: Duration,
    /// Heartbeat and health check cadence.
    pub monitors: MonitorConfig,
    /// Pause between placing consecutive bracket legs.
    pub bracket_leg_pause: Duration,
    /// How long to wait for the gateway to accept a bracket parent.
    pub bracket_ack_wait: Duration,
    /// Poll interval while waiting for an acknowledgment.
    pub ack_poll_interval: Duration,
    /// Gateway error codes that mean the session is gone.
    pub critical_error_codes: Vec<i32>,
    /// Capacity of the order update channel.
    pub update_buffer: usize,
    /// Circuit breaker around gateway requests.
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            connect: ReconnectConfig::connect(),
            reconnect: ReconnectConfig::reconnect(),
            request_timeout: Duration::from_secs(10),
            monitors: MonitorConfig::default(),
            bracket_leg_pause: Duration::from_millis(100),
            bracket_ack_wait: Duration::from_secs(1),
            ack_poll_interval: Duration::from_millis(50),
            critical_error_codes: vec![502, 504, 1100, 1300, 2110],
            update_buffer: 1_024,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Gateway connection with reconnection, monitoring and circuit breaking.
pub struct ResilientConnector<G, S>
where
    G: BrokerGateway + 'static,
    S: OrderStore + 'static,
{
    gateway: Arc<G>,
    store: Arc<S>,
    ledger: RwLock<Option<Arc<dyn PortfolioLedger>>>,
    settings: ConnectorSettings,
    health: RwLock<ConnectionHealth>,
    breaker: CircuitBreaker,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    events: Mutex<Option<mpsc::Receiver<GatewayEvent>>>,
    updates: mpsc::Sender<OrderUpdate>,
    background_started: AtomicBool,
    shutdown: CancellationToken,
    self_ref: Weak<Self>,
}

impl<G, S> std::fmt::Debug for ResilientConnector<G, S>
where
    G: BrokerGateway + 'static,
    S: OrderStore + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientConnector")
            .field("state", &self.connection_state())
            .field("breaker", &self.breaker.state())
            .finish_non_exhaustive()
    }
}

impl<G, S> ResilientConnector<G, S>
where
    G: BrokerGateway + 'static,
    S: OrderStore + 'static,
{
    /// Create a disconnected connector.
    ///
    /// `events` is the gateway adapter's event channel. The returned
    /// receiver carries order status changes and executions.
    #[must_use]
    pub fn new(
        gateway: Arc<G>,
        store: Arc<S>,
        events: mpsc::Receiver<GatewayEvent>,
        settings: ConnectorSettings,
    ) -> (Arc<Self>, mpsc::Receiver<OrderUpdate>) {
        let (updates, updates_rx) = mpsc::channel(settings.update_buffer.max(1));
        let connector = Arc::new_cyclic(|self_ref| Self {
            gateway,
            store,
            ledger: RwLock::new(None),
            breaker: CircuitBreaker::new("gateway", settings.circuit_breaker.clone()),
            settings,
            health: RwLock::new(ConnectionHealth::new()),
            reconnect_task: Mutex::new(None),
            events: Mutex::new(Some(events)),
            updates,
            background_started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            self_ref: self_ref.clone(),
        });
        (connector, updates_rx)
    }

    /// Book executions and count placed orders in `ledger` from now on.
    pub fn attach_ledger(&self, ledger: Arc<dyn PortfolioLedger>) {
        *self.ledger.write() = Some(ledger);
    }

    fn ledger(&self) -> Option<Arc<dyn PortfolioLedger>> {
        self.ledger.read().clone()
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// Establish the session, retrying with backoff.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::ConnectFailed`] once every attempt has
    /// failed (the connection is then in `error`), or
    /// [`ConnectorError::NotConnected`] if the connector is closed or a
    /// connection attempt is already under way.
    pub async fn connect(&self) -> Result<(), ConnectorError> {
        match self.connection_state() {
            ConnectionState::Connected => return Ok(()),
            state @ (ConnectionState::Closed
            | ConnectionState::Connecting
            | ConnectionState::Reconnecting) => {
                return Err(ConnectorError::NotConnected { state });
            }
            ConnectionState::Disconnected | ConnectionState::Error => {}
        }
        self.transition(ConnectionState::Connecting);

        let max_attempts = self.settings.connect.max_attempts;
        let mut policy = ReconnectPolicy::new(self.settings.connect.clone());
        let mut attempts = 0_u32;
        loop {
            attempts += 1;
            match self.open_session().await {
                Ok(()) => break,
                Err(e) => {
                    tracing::warn!(attempt = attempts, error = %e, "Gateway connection attempt failed");
                    self.record_error(ErrorRecord::new(
                        ErrorClass::Gateway,
                        format!("connection attempt {attempts} failed: {e}"),
                    ));
                }
            }

            let exhausted = max_attempts > 0 && attempts >= max_attempts;
            let delay = if exhausted { None } else { policy.next_delay() };
            let Some(delay) = delay else {
                tracing::error!(attempts, "Gateway connection failed");
                self.transition(ConnectionState::Error);
                return Err(ConnectorError::ConnectFailed { attempts });
            };
            if !self.sleep_unless_shutdown(delay).await {
                self.transition(ConnectionState::Error);
                return Err(ConnectorError::ConnectFailed { attempts });
            }
        }

        self.transition(ConnectionState::Connected);
        tracing::info!(attempts, "Connected to gateway");
        self.start_background();
        Ok(())
    }

    /// Close the session for good. Background tasks stop and every later
    /// request fails fast.
    pub async fn disconnect(&self) {
        tracing::info!("Disconnecting from gateway");
        self.shutdown.cancel();
        if let Some(task) = self.reconnect_task.lock().take() {
            task.abort();
        }
        match tokio::time::timeout(self.settings.request_timeout, self.gateway.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Gateway disconnect failed"),
            Err(_) => tracing::warn!("Gateway disconnect timed out"),
        }
        self.transition(ConnectionState::Closed);
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.health.read().state()
    }

    /// Point-in-time copy of the connection health record.
    #[must_use]
    pub fn health_snapshot(&self) -> HealthSnapshot {
        self.health.read().snapshot()
    }

    /// Circuit breaker counters.
    #[must_use]
    pub fn breaker_metrics(&self) -> CircuitBreakerMetrics {
        self.breaker.metrics()
    }

    /// Schedule background reconnection.
    ///
    /// Returns false when a reconnection is already under way, or when the
    /// connector is closed or still establishing its first connection.
    pub fn schedule_reconnect(&self, reason: &str) -> bool {
        let mut task = self.reconnect_task.lock();
        if self.shutdown.is_cancelled() {
            return false;
        }
        let state = self.connection_state();
        if matches!(
            state,
            ConnectionState::Closed | ConnectionState::Connecting | ConnectionState::Reconnecting
        ) {
            tracing::debug!(reason, state = %state, "Reconnection not scheduled");
            return false;
        }
        let Some(connector) = self.self_ref.upgrade() else {
            return false;
        };
        if !self.transition(ConnectionState::Reconnecting) {
            return false;
        }

        tracing::warn!(reason, "Scheduling gateway reconnection");
        *task = Some(tokio::spawn(async move {
            connector.run_reconnect().await;
        }));
        true
    }

    async fn run_reconnect(self: Arc<Self>) {
        let mut policy = ReconnectPolicy::new(self.settings.reconnect.clone());
        loop {
            let Some(delay) = policy.next_delay() else {
                let attempts = policy.attempt_count();
                tracing::error!(attempts, "Gateway reconnection abandoned");
                self.record_error(ErrorRecord::new(
                    ErrorClass::CriticalGateway,
                    format!("reconnection abandoned after {attempts} attempts"),
                ));
                self.transition(ConnectionState::Error);
                return;
            };

            self.health.write().record_reconnect_attempt();
            observability::record_reconnect_attempt();
            tracing::info!(
                attempt = policy.attempt_count(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting to gateway"
            );

            if !self.sleep_unless_shutdown(delay).await
                || self.connection_state() != ConnectionState::Reconnecting
            {
                return;
            }

            // Drop whatever is left of the old session first.
            let _ = tokio::time::timeout(self.settings.request_timeout, self.gateway.disconnect()).await;

            match self.open_session().await {
                Ok(()) => {
                    self.health.write().record_reconnected();
                    self.transition(ConnectionState::Connected);
                    tracing::info!(attempts = policy.attempt_count(), "Reconnected to gateway");
                    return;
                }
                Err(e) => {
                    tracing::warn!(attempt = policy.attempt_count(), error = %e, "Reconnection attempt failed");
                    self.record_error(ErrorRecord::new(
                        ErrorClass::Gateway,
                        format!("reconnection attempt {} failed: {e}", policy.attempt_count()),
                    ));
                }
            }
        }
    }

    async fn open_session(&self) -> Result<(), GatewayError> {
        tokio::time::timeout(self.settings.request_timeout, self.gateway.connect())
            .await
            .unwrap_or(Err(GatewayError::Timeout))
    }

    fn start_background(&self) {
        if self.background_started.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(events) = self.events.lock().take() {
            tokio::spawn(run_event_loop(
                self.self_ref.clone(),
                events,
                self.shutdown.clone(),
            ));
        }
        spawn_monitors(self.self_ref.clone(), &self.settings.monitors, &self.shutdown);
    }

    fn transition(&self, next: ConnectionState) -> bool {
        let (from, moved) = {
            let mut health = self.health.write();
            let from = health.state();
            (from, health.set_state(next))
        };
        if !moved {
            tracing::debug!(from = %from, to = %next, "Connection transition refused");
        } else if from != next {
            observability::record_connection_state(next);
            tracing::info!(from = %from, to = %next, "Connection state changed");
        }
        moved
    }

    fn record_error(&self, record: ErrorRecord) {
        self.health.write().record_error(record);
    }

    fn is_critical(&self, code: i32) -> bool {
        self.settings.critical_error_codes.contains(&code)
    }

    async fn sleep_unless_shutdown(&self, delay: Duration) -> bool {
        tokio::select! {
            () = self.shutdown.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }

    // ========================================================================
    // Event handling
    // ========================================================================

    async fn handle_event(&self, event: GatewayEvent) {
        self.health.write().record_message();
        match event {
            GatewayEvent::Connected => tracing::debug!("Gateway reported connection"),
            GatewayEvent::Disconnected { reason } => {
                if self.connection_state() == ConnectionState::Connected {
                    tracing::warn!(reason = %reason, "Gateway connection lost");
                    self.transition(ConnectionState::Disconnected);
                    self.schedule_reconnect(&reason);
                } else {
                    tracing::debug!(reason = %reason, "Gateway disconnect while not connected");
                }
            }
            GatewayEvent::Error {
                code,
                message,
                order_id,
            } => self.handle_gateway_error(code, &message, order_id.as_ref()),
            GatewayEvent::OrderStatus(update) => {
                self.persist_status(&update).await;
                self.forward(OrderUpdate::Status(update)).await;
            }
            GatewayEvent::Execution(report) => {
                self.persist_execution(&report).await;
                self.book_trade(&report).await;
                self.forward(OrderUpdate::Execution(report)).await;
            }
        }
    }

    fn handle_gateway_error(&self, code: i32, message: &str, order_id: Option<&GatewayOrderId>) {
        let critical = self.is_critical(code);
        let class = if critical {
            ErrorClass::CriticalGateway
        } else {
            ErrorClass::Gateway
        };
        self.record_error(ErrorRecord::new(class, message).with_code(code));
        observability::record_gateway_error(code, critical);

        if critical {
            tracing::error!(code, error_message = message, "Critical gateway error");
            if self.connection_state() == ConnectionState::Connected {
                self.schedule_reconnect(message);
            }
        } else {
            tracing::warn!(code, error_message = message, order_id = ?order_id, "Gateway error");
        }
    }

    async fn persist_status(&self, update: &OrderStatusUpdate) {
        // Late "pending" reports would move rows backwards.
        if update.status == GatewayOrderStatus::PendingSubmit {
            return;
        }
        let result: Result<(), StoreError> = async {
            let Some(mut order) = self.store.find_by_gateway_id(&update.gateway_order_id).await? else {
                return Ok(());
            };
            if order.is_terminal() {
                return Ok(());
            }
            order.apply_fill(update.filled_quantity, update.avg_fill_price);
            order.apply_status(update.status.order_state(), update.reported_at);
            if update.status == GatewayOrderStatus::Rejected
                && let Some(message) = &update.message
            {
                order.note = Some(message.clone());
            }
            self.store.save(&order).await
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(
                gateway_order_id = %update.gateway_order_id,
                error = %e,
                "Failed to persist order status"
            );
            self.record_error(ErrorRecord::new(ErrorClass::Persistence, e.to_string()));
        }
    }

    async fn persist_execution(&self, report: &ExecutionReport) {
        let result: Result<(), StoreError> = async {
            let Some(mut order) = self.store.find_by_gateway_id(&report.gateway_order_id).await? else {
                return Ok(());
            };
            // Replayed executions do not advance the cumulative quantity.
            if order.is_terminal() || report.cumulative_quantity <= order.filled_quantity {
                return Ok(());
            }
            order.apply_fill(report.cumulative_quantity, Some(report.avg_price));
            order.commission += report.commission;
            if order.filled_quantity >= order.quantity {
                order.apply_status(OrderState::Filled, report.executed_at);
            } else {
                order.apply_status(OrderState::PartiallyFilled, report.executed_at);
            }
            self.store.save(&order).await
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(
                gateway_order_id = %report.gateway_order_id,
                execution_id = %report.execution_id,
                error = %e,
                "Failed to persist execution"
            );
            self.record_error(ErrorRecord::new(ErrorClass::Persistence, e.to_string()));
        }
    }

    async fn book_trade(&self, report: &ExecutionReport) {
        let Some(ledger) = self.ledger() else {
            return;
        };
        match ledger.apply_trade(&TradeRecord::from(report)).await {
            Ok(true) => tracing::debug!(
                execution_id = %report.execution_id,
                ticker = %report.ticker,
                side = %report.side,
                quantity = %report.quantity,
                price = %report.price,
                "Trade booked"
            ),
            Ok(false) => tracing::debug!(execution_id = %report.execution_id, "Execution already booked"),
            Err(e) => {
                tracing::warn!(
                    execution_id = %report.execution_id,
                    error = %e,
                    "Failed to book trade"
                );
                self.record_error(ErrorRecord::new(ErrorClass::Persistence, e.to_string()));
            }
        }
    }

    async fn count_order(&self) {
        let Some(ledger) = self.ledger() else {
            return;
        };
        if let Err(e) = ledger.count_order(chrono::Utc::now()).await {
            tracing::warn!(error = %e, "Failed to count placed order");
            self.record_error(ErrorRecord::new(ErrorClass::Persistence, e.to_string()));
        }
    }

    async fn forward(&self, update: OrderUpdate) {
        if self.updates.send(update).await.is_err() {
            tracing::debug!("No listener for order updates");
        }
    }

    // ========================================================================
    // Guarded requests
    // ========================================================================

    fn ensure_connected(&self) -> Result<(), ConnectorError> {
        let state = self.connection_state();
        if state.is_usable() {
            Ok(())
        } else {
            Err(ConnectorError::NotConnected { state })
        }
    }

    /// Run a gateway request: fail fast unless connected, then go through
    /// the circuit breaker with the request timeout applied.
    async fn guarded<T, F, Fut>(&self, operation: &'static str, f: F) -> Result<T, ConnectorError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        self.ensure_connected()?;
        let limit = self.settings.request_timeout;
        let result = self
            .breaker
            .call(
                || async move {
                    tokio::time::timeout(limit, f())
                        .await
                        .unwrap_or(Err(GatewayError::Timeout))
                },
                GatewayError::is_transient,
            )
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(BreakerError::Open(name)) => {
                tracing::debug!(breaker = %name, operation, "Gateway call rejected by open circuit");
                Err(ConnectorError::CircuitOpen)
            }
            Err(BreakerError::Inner(err)) => {
                let critical = err.code().is_some_and(|code| self.is_critical(code));
                let class = if critical {
                    ErrorClass::CriticalGateway
                } else {
                    ErrorClass::Gateway
                };
                let mut record = ErrorRecord::new(class, format!("{operation}: {err}"));
                if let Some(code) = err.code() {
                    record = record.with_code(code);
                }
                self.record_error(record);
                tracing::warn!(operation, error = %err, critical, "Gateway call failed");
                if critical {
                    self.schedule_reconnect(operation);
                }

                if err == GatewayError::Timeout {
                    Err(ConnectorError::Timeout {
                        operation,
                        after: limit,
                    })
                } else {
                    Err(ConnectorError::Gateway(err))
                }
            }
        }
    }

    async fn qualify(&self, ticker: &str) -> Result<Instrument, ConnectorError> {
        self.guarded("qualify_instrument", || self.gateway.qualify_instrument(ticker))
            .await
    }

    async fn place_leg(
        &self,
        instrument: &Instrument,
        leg: &GatewayOrderRequest,
    ) -> Result<GatewayOrderId, ConnectorError> {
        let result = self
            .guarded("place_order", || self.gateway.place_order(instrument, leg))
            .await;
        self.note_placement(leg, &result);
        result
    }

    fn note_placement(&self, leg: &GatewayOrderRequest, result: &Result<GatewayOrderId, ConnectorError>) {
        match result {
            Ok(id) => {
                self.health.write().record_order_placed();
                tracing::info!(
                    gateway_order_id = %id,
                    order_ref = %leg.order_ref,
                    ticker = %leg.ticker,
                    side = ?leg.side,
                    kind = ?leg.kind,
                    quantity = %leg.quantity,
                    "Order leg placed"
                );
            }
            Err(e) => {
                self.health.write().record_order_failed();
                tracing::warn!(order_ref = %leg.order_ref, error = %e, "Order leg failed");
            }
        }
    }

    /// Modify a working order.
    ///
    /// # Errors
    ///
    /// Fails fast when not connected; otherwise returns the gateway's error.
    pub async fn modify_order(
        &self,
        order_id: &GatewayOrderId,
        modification: &OrderModification,
    ) -> Result<(), ConnectorError> {
        self.guarded("modify_order", || self.gateway.modify_order(order_id, modification))
            .await
    }

    /// Current gateway status of an order.
    ///
    /// # Errors
    ///
    /// Fails fast when not connected; otherwise returns the gateway's error.
    pub async fn order_status(
        &self,
        order_id: &GatewayOrderId,
    ) -> Result<OrderStatusUpdate, ConnectorError> {
        self.guarded("order_status", || self.gateway.order_status(order_id))
            .await
    }

    /// Start streaming market data for a ticker.
    ///
    /// # Errors
    ///
    /// Fails fast when not connected; otherwise returns the gateway's error.
    pub async fn subscribe_market_data(&self, ticker: &str) -> Result<(), ConnectorError> {
        let instrument = self.qualify(ticker).await?;
        self.guarded("subscribe_market_data", || {
            self.gateway.subscribe_market_data(&instrument)
        })
        .await
    }

    /// Current market snapshot for a ticker.
    ///
    /// # Errors
    ///
    /// Fails fast when not connected; otherwise returns the gateway's error.
    pub async fn get_market_data(&self, ticker: &str) -> Result<MarketSnapshot, ConnectorError> {
        let instrument = self.qualify(ticker).await?;
        self.guarded("market_snapshot", || self.gateway.market_snapshot(&instrument))
            .await
    }

    /// Account balances.
    ///
    /// # Errors
    ///
    /// Fails fast when not connected; otherwise returns the gateway's error.
    pub async fn account_snapshot(&self) -> Result<AccountSnapshot, ConnectorError> {
        self.guarded("account_snapshot", || self.gateway.account_snapshot())
            .await
    }

    /// Open positions.
    ///
    /// # Errors
    ///
    /// Fails fast when not connected; otherwise returns the gateway's error.
    pub async fn positions(&self) -> Result<Vec<Position>, ConnectorError> {
        self.guarded("positions", || self.gateway.positions()).await
    }

    // ========================================================================
    // Bracket orders
    // ========================================================================

    /// Place a bracket: a held limit entry, a held stop-loss child and a
    /// take-profit child that transmits all three. Every leg is persisted.
    ///
    /// A key already on file returns the earlier legs without touching the
    /// gateway. A persistence failure after the gateway accepted the legs
    /// is reported in [`BracketIds::persistence_error`], not as an error.
    ///
    /// # Errors
    ///
    /// Fails fast when not connected; returns the gateway's error if a leg
    /// is refused (the legs already placed are cancelled) or the parent is
    /// rejected.
    #[tracing::instrument(skip_all, fields(ticker = %bracket.ticker, side = ?bracket.side))]
    pub async fn place_bracket_order(&self, bracket: &BracketOrder) -> Result<BracketIds, ConnectorError> {
        let key = bracket
            .idempotency_key
            .clone()
            .unwrap_or_else(IdempotencyKey::generate);
        if let Some(ids) = self.existing_bracket(&key).await? {
            tracing::info!(
                parent_order_id = %ids.parent_order_id,
                key = %key,
                "Duplicate bracket returns the earlier legs"
            );
            return Ok(ids);
        }

        let instrument = self.qualify(&bracket.ticker).await?;
        let exit_side = bracket.side.opposite();

        let entry = GatewayOrderRequest::new(
            key.clone(),
            &bracket.ticker,
            bracket.side,
            OrderKind::Limit,
            bracket.quantity,
        )
        .with_limit_price(bracket.entry_price)
        .with_time_in_force(bracket.time_in_force)
        .held();
        let parent = self.place_leg(&instrument, &entry).await?;
        self.sleep_unless_shutdown(self.settings.bracket_leg_pause).await;

        let stop = GatewayOrderRequest::new(
            key.child(STOP_LOSS_LEG),
            &bracket.ticker,
            exit_side,
            OrderKind::Stop,
            bracket.quantity,
        )
        .with_stop_price(bracket.stop_loss)
        .with_time_in_force(TimeInForce::Gtc)
        .with_parent(parent.clone())
        .held();
        let stop_loss = match self.place_leg(&instrument, &stop).await {
            Ok(id) => id,
            Err(e) => {
                self.abandon_legs(&[&parent]).await;
                return Err(e);
            }
        };
        self.sleep_unless_shutdown(self.settings.bracket_leg_pause).await;

        let target = GatewayOrderRequest::new(
            key.child(TAKE_PROFIT_LEG),
            &bracket.ticker,
            exit_side,
            OrderKind::Limit,
            bracket.quantity,
        )
        .with_limit_price(bracket.take_profit)
        .with_time_in_force(TimeInForce::Gtc)
        .with_parent(parent.clone());
        let take_profit = match self.place_leg(&instrument, &target).await {
            Ok(id) => id,
            Err(e) => {
                self.abandon_legs(&[&stop_loss, &parent]).await;
                return Err(e);
            }
        };

        if let Some(rejection) = self.wait_for_parent(&parent).await {
            self.abandon_legs(&[&stop_loss, &take_profit]).await;
            return Err(ConnectorError::Gateway(rejection));
        }
        self.count_order().await;

        let parent_order_id = bracket
            .parent_order_id
            .clone()
            .unwrap_or_else(OrderId::generate);
        let persistence_error = self
            .persist_bracket(bracket, &parent_order_id, &key, [&parent, &stop_loss, &take_profit])
            .await
            .err()
            .map(|e| e.to_string());
        if let Some(message) = &persistence_error {
            tracing::error!(
                parent_order_id = %parent_order_id,
                error = %message,
                "Bracket accepted by the gateway but not persisted"
            );
            self.record_error(ErrorRecord::new(ErrorClass::Persistence, message.clone()));
        }

        tracing::info!(
            parent_order_id = %parent_order_id,
            parent = %parent,
            stop_loss = %stop_loss,
            take_profit = %take_profit,
            "Bracket order placed"
        );
        Ok(BracketIds {
            parent_order_id,
            parent,
            stop_loss: Some(stop_loss),
            take_profit: Some(take_profit),
            deduplicated: false,
            persistence_error,
        })
    }

    async fn existing_bracket(&self, key: &IdempotencyKey) -> Result<Option<BracketIds>, ConnectorError> {
        let Some(parent) = self.store.find_by_idempotency_key(key).await? else {
            return Ok(None);
        };
        let gateway_id = parent
            .gateway_order_id
            .clone()
            .ok_or_else(|| GatewayError::OrderNotFound {
                order_id: parent.id.to_string(),
            })?;
        let children = self.store.children_of(&parent.id).await?;
        let leg = |name: &str| {
            let child_key = key.child(name);
            children
                .iter()
                .find(|child| child.idempotency_key == child_key)
                .and_then(|child| child.gateway_order_id.clone())
        };
        Ok(Some(BracketIds {
            stop_loss: leg(STOP_LOSS_LEG),
            take_profit: leg(TAKE_PROFIT_LEG),
            parent_order_id: parent.id,
            parent: gateway_id,
            deduplicated: true,
            persistence_error: None,
        }))
    }

    /// Poll until the parent leaves `pending_submit`. Returns the rejection
    /// if the gateway refused it. A parent still pending at the deadline is
    /// left to the status stream.
    async fn wait_for_parent(&self, parent: &GatewayOrderId) -> Option<GatewayError> {
        let deadline = Instant::now() + self.settings.bracket_ack_wait;
        loop {
            match self.order_status(parent).await {
                Ok(update) if update.status == GatewayOrderStatus::Rejected => {
                    return Some(GatewayError::Rejected {
                        code: 0,
                        reason: update
                            .message
                            .unwrap_or_else(|| "bracket parent rejected".to_string()),
                    });
                }
                Ok(update) if update.status != GatewayOrderStatus::PendingSubmit => return None,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(parent = %parent, error = %e, "Bracket parent status unavailable");
                    return None;
                }
            }
            if Instant::now() >= deadline {
                tracing::debug!(parent = %parent, "Bracket parent not yet acknowledged");
                return None;
            }
            tokio::time::sleep(self.settings.ack_poll_interval).await;
        }
    }

    async fn abandon_legs(&self, legs: &[&GatewayOrderId]) {
        for leg in legs {
            if let Err(e) = self.guarded("cancel_order", || self.gateway.cancel_order(leg)).await {
                tracing::warn!(gateway_order_id = %leg, error = %e, "Failed to cancel bracket leg");
            }
        }
    }

    async fn persist_bracket(
        &self,
        bracket: &BracketOrder,
        parent_order_id: &OrderId,
        key: &IdempotencyKey,
        [parent, stop_loss, take_profit]: [&GatewayOrderId; 3],
    ) -> Result<(), StoreError> {
        let exit_side = bracket.side.opposite();

        let mut entry = Order::submitted(
            parent_order_id.clone(),
            parent.clone(),
            &bracket.ticker,
            bracket.side,
            OrderKind::Bracket,
            bracket.quantity,
            key.clone(),
        );
        entry.limit_price = Some(bracket.entry_price);
        entry.time_in_force = bracket.time_in_force;
        entry.signal_id = bracket.signal_id.clone();
        self.store.insert(&entry).await?;

        let mut stop = Order::submitted(
            OrderId::generate(),
            stop_loss.clone(),
            &bracket.ticker,
            exit_side,
            OrderKind::Stop,
            bracket.quantity,
            key.child(STOP_LOSS_LEG),
        );
        stop.stop_price = Some(bracket.stop_loss);
        stop.time_in_force = TimeInForce::Gtc;
        stop.parent_id = Some(parent_order_id.clone());
        self.store.insert(&stop).await?;

        let mut target = Order::submitted(
            OrderId::generate(),
            take_profit.clone(),
            &bracket.ticker,
            exit_side,
            OrderKind::Limit,
            bracket.quantity,
            key.child(TAKE_PROFIT_LEG),
        );
        target.limit_price = Some(bracket.take_profit);
        target.time_in_force = TimeInForce::Gtc;
        target.parent_id = Some(parent_order_id.clone());
        self.store.insert(&target).await
    }
}

fn single_leg(request: &OrderRequest) -> GatewayOrderRequest {
    let mut leg = GatewayOrderRequest::new(
        request.idempotency_key.clone(),
        &request.ticker,
        request.side,
        request.kind,
        request.quantity,
    )
    .with_time_in_force(request.time_in_force);
    leg.limit_price = request.limit_price;
    leg.stop_price = request.stop_price;
    leg
}

async fn run_event_loop<G, S>(
    connector: Weak<ResilientConnector<G, S>>,
    mut events: mpsc::Receiver<GatewayEvent>,
    cancel: CancellationToken,
) where
    G: BrokerGateway + 'static,
    S: OrderStore + 'static,
{
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        let Some(event) = event else {
            tracing::debug!("Gateway event channel closed");
            break;
        };
        let Some(connector) = connector.upgrade() else {
            break;
        };
        connector.handle_event(event).await;
    }
}

#[async_trait]
impl<G, S> MonitorTarget for ResilientConnector<G, S>
where
    G: BrokerGateway + 'static,
    S: OrderStore + 'static,
{
    async fn heartbeat(&self) {
        if !self.connection_state().is_usable() {
            return;
        }
        match tokio::time::timeout(self.settings.request_timeout, self.gateway.ping()).await {
            Ok(Ok(latency)) => {
                self.health
                    .write()
                    .record_heartbeat(Some(latency.as_secs_f64() * 1_000.0));
                observability::record_heartbeat_latency(latency.as_secs_f64());
                tracing::trace!(latency = ?latency, "Heartbeat");
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Heartbeat failed");
                self.record_error(ErrorRecord::new(
                    ErrorClass::Gateway,
                    format!("heartbeat failed: {e}"),
                ));
            }
            Err(_) => {
                tracing::warn!("Heartbeat timed out");
                self.record_error(ErrorRecord::new(ErrorClass::Gateway, "heartbeat timed out"));
            }
        }
    }

    async fn health_check(&self) {
        if self.connection_state() != ConnectionState::Connected {
            return;
        }
        let stale_after = self.settings.monitors.stale_after;
        let stale = self
            .health
            .read()
            .since_heartbeat()
            .is_none_or(|age| age > stale_after);

        let reason = if !self.gateway.is_connected() {
            Some("gateway reports no session")
        } else if stale {
            Some("heartbeat stale")
        } else {
            None
        };
        if let Some(reason) = reason {
            tracing::warn!(reason, "Gateway health check failed");
            self.record_error(ErrorRecord::new(ErrorClass::CriticalGateway, reason));
            self.schedule_reconnect(reason);
        }
    }
}

#[async_trait]
impl<G, S> OrderRouter for ResilientConnector<G, S>
where
    G: BrokerGateway + 'static,
    S: OrderStore + 'static,
{
    #[tracing::instrument(skip_all, fields(ticker = %request.ticker, key = %request.idempotency_key))]
    async fn submit_order(&self, request: &OrderRequest) -> Result<SubmissionReceipt, ConnectorError> {
        if let Some(existing) = self
            .store
            .find_by_idempotency_key(&request.idempotency_key)
            .await?
        {
            tracing::info!(order_id = %existing.id, "Duplicate submission returns the earlier order");
            let gateway_order_id =
                existing
                    .gateway_order_id
                    .clone()
                    .ok_or_else(|| GatewayError::OrderNotFound {
                        order_id: existing.id.to_string(),
                    })?;
            return Ok(SubmissionReceipt {
                gateway_order_id,
                existing_order_id: Some(existing.id),
            });
        }

        // One breaker call per submission, instrument lookup included.
        let leg = single_leg(request);
        let (gateway, placing) = (&self.gateway, &leg);
        let result = self
            .guarded("place_order", || async move {
                let instrument = gateway.qualify_instrument(&placing.ticker).await?;
                gateway.place_order(&instrument, placing).await
            })
            .await;
        self.note_placement(&leg, &result);
        let gateway_order_id = result?;
        self.count_order().await;
        Ok(SubmissionReceipt {
            gateway_order_id,
            existing_order_id: None,
        })
    }

    async fn submit_bracket(&self, bracket: &BracketOrder) -> Result<BracketIds, ConnectorError> {
        self.place_bracket_order(bracket).await
    }

    async fn await_acknowledgement(
        &self,
        order_id: &GatewayOrderId,
        timeout: Duration,
    ) -> Result<OrderStatusUpdate, ConnectorError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.order_status(order_id).await {
                Ok(update) if update.status != GatewayOrderStatus::PendingSubmit => return Ok(update),
                Ok(_) => {}
                Err(ConnectorError::Gateway(e)) if !e.is_transient() => return Err(e.into()),
                Err(e @ (ConnectorError::NotConnected { .. } | ConnectorError::CircuitOpen)) => {
                    return Err(e);
                }
                Err(e) => tracing::debug!(gateway_order_id = %order_id, error = %e, "Status poll failed"),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ConnectorError::Timeout {
                    operation: "acknowledgement",
                    after: timeout,
                });
            }
            tokio::time::sleep(self.settings.ack_poll_interval.min(deadline - now)).await;
        }
    }

    async fn cancel_order(&self, order_id: &GatewayOrderId) -> Result<(), ConnectorError> {
        self.guarded("cancel_order", || self.gateway.cancel_order(order_id))
            .await?;
        tracing::info!(gateway_order_id = %order_id, "Order cancelled at gateway");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderSide;
    use crate::infrastructure::gateway::{PaperGateway, PaperGatewayConfig};
    use crate::infrastructure::persistence::InMemoryOrderStore;
    use crate::infrastructure::resilience::CircuitBreakerState;
    use rust_decimal_macros::dec;

    type Connector = ResilientConnector<PaperGateway, InMemoryOrderStore>;

    const fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn fast_settings() -> ConnectorSettings {
        ConnectorSettings {
            connect: ReconnectConfig::new(ms(5), ms(20), 2.0, 3),
            reconnect: ReconnectConfig::new(ms(5), ms(20), 2.0, 5),
            request_timeout: ms(100),
            bracket_leg_pause: ms(1),
            bracket_ack_wait: ms(50),
            ack_poll_interval: ms(5),
            ..ConnectorSettings::default()
        }
    }

    struct Fixture {
        gateway: Arc<PaperGateway>,
        store: Arc<InMemoryOrderStore>,
        connector: Arc<Connector>,
        _updates: mpsc::Receiver<OrderUpdate>,
    }

    fn fixture(settings: ConnectorSettings) -> Fixture {
        let (gateway, events) = PaperGateway::new(PaperGatewayConfig {
            auto_fill: false,
            latency_jitter: Duration::ZERO,
            ..PaperGatewayConfig::default()
        });
        gateway.set_price("AAPL", dec!(150));
        let store = Arc::new(InMemoryOrderStore::new());
        let (connector, updates) =
            ResilientConnector::new(gateway.clone(), store.clone(), events, settings);
        Fixture {
            gateway,
            store,
            connector,
            _updates: updates,
        }
    }

    #[test]
    fn default_settings() {
        let settings = ConnectorSettings::default();
        assert_eq!(settings.request_timeout, Duration::from_secs(10));
        assert_eq!(settings.reconnect.max_delay, Duration::from_secs(300));
        assert_eq!(settings.circuit_breaker.failure_threshold, 5);
        assert!(settings.critical_error_codes.contains(&1100));
    }

    #[tokio::test]
    async fn requests_fail_fast_while_disconnected() {
        let f = fixture(fast_settings());
        let request = OrderRequest::market("AAPL", OrderSide::Buy, dec!(10), "K1");

        let Err(err) = f.connector.submit_order(&request).await else {
            panic!("submission must fail while disconnected");
        };
        assert_eq!(
            err,
            ConnectorError::NotConnected {
                state: ConnectionState::Disconnected
            }
        );
        assert!(f.gateway.placed_orders().is_empty());
        assert_eq!(f.connector.breaker_metrics().total_calls, 0);
    }

    #[tokio::test]
    async fn connect_retries_with_backoff() {
        let f = fixture(fast_settings());
        f.gateway.fail_next_connects(2);

        f.connector.connect().await.unwrap();

        assert_eq!(f.connector.connection_state(), ConnectionState::Connected);
        assert_eq!(f.gateway.connect_calls(), 3);
        assert_eq!(f.connector.health_snapshot().recent_errors.len(), 2);
    }

    #[tokio::test]
    async fn connect_gives_up_after_max_attempts() {
        let f = fixture(fast_settings());
        f.gateway.fail_next_connects(10);

        let Err(err) = f.connector.connect().await else {
            panic!("connect should give up");
        };
        assert_eq!(err, ConnectorError::ConnectFailed { attempts: 3 });
        assert_eq!(f.connector.connection_state(), ConnectionState::Error);
        assert_eq!(f.gateway.connect_calls(), 3);
    }

    #[tokio::test]
    async fn duplicate_key_returns_earlier_order() {
        let f = fixture(fast_settings());
        f.connector.connect().await.unwrap();
        let request = OrderRequest::limit("AAPL", OrderSide::Buy, dec!(10), dec!(149), "K1");

        let first = f.connector.submit_order(&request).await.unwrap();
        assert!(!first.is_deduplicated());
        let row = Order::submitted(
            OrderId::new("o-1"),
            first.gateway_order_id.clone(),
            "AAPL",
            OrderSide::Buy,
            OrderKind::Limit,
            dec!(10),
            IdempotencyKey::new("K1"),
        );
        f.store.insert(&row).await.unwrap();

        let second = f.connector.submit_order(&request).await.unwrap();
        assert_eq!(second.existing_order_id, Some(OrderId::new("o-1")));
        assert_eq!(second.gateway_order_id, first.gateway_order_id);
        assert_eq!(f.gateway.placed_orders().len(), 1);
    }

    #[tokio::test]
    async fn bracket_legs_are_linked_and_persisted() {
        let f = fixture(fast_settings());
        f.connector.connect().await.unwrap();
        let bracket = BracketOrder::new("AAPL", OrderSide::Buy, dec!(10), dec!(150), dec!(145), dec!(160))
            .with_idempotency_key("B1");

        let ids = f.connector.place_bracket_order(&bracket).await.unwrap();

        let legs = f.gateway.placed_orders();
        assert_eq!(legs.len(), 3);
        assert!(!legs[0].transmit);
        assert_eq!(legs[1].kind, OrderKind::Stop);
        assert_eq!(legs[1].side, OrderSide::Sell);
        assert_eq!(legs[1].time_in_force, TimeInForce::Gtc);
        assert_eq!(legs[1].parent_id.as_ref(), Some(&ids.parent));
        assert!(!legs[1].transmit);
        assert!(legs[2].transmit);
        assert_eq!(legs[2].order_ref, IdempotencyKey::new("B1:take_profit"));

        assert_eq!(f.store.len(), 3);
        let children = f.store.children_of(&ids.parent_order_id).await.unwrap();
        assert_eq!(children.len(), 2);
        assert!(ids.persistence_error.is_none());
    }

    #[tokio::test]
    async fn bracket_resubmission_is_deduplicated() {
        let f = fixture(fast_settings());
        f.connector.connect().await.unwrap();
        let bracket = BracketOrder::new("AAPL", OrderSide::Buy, dec!(10), dec!(150), dec!(145), dec!(160))
            .with_idempotency_key("B1");

        let first = f.connector.place_bracket_order(&bracket).await.unwrap();
        let second = f.connector.place_bracket_order(&bracket).await.unwrap();

        assert!(second.deduplicated);
        assert_eq!(second.parent, first.parent);
        assert_eq!(second.stop_loss, first.stop_loss);
        assert_eq!(second.take_profit, first.take_profit);
        assert_eq!(f.gateway.placed_orders().len(), 3);
    }

    #[tokio::test]
    async fn bracket_persistence_failure_is_reported_not_raised() {
        let f = fixture(fast_settings());
        f.connector.connect().await.unwrap();
        f.store.fail_writes(true);
        let bracket = BracketOrder::new("AAPL", OrderSide::Buy, dec!(10), dec!(150), dec!(145), dec!(160));

        let ids = f.connector.place_bracket_order(&bracket).await.unwrap();

        assert!(ids.persistence_error.is_some());
        assert!(ids.stop_loss.is_some());
        let errors = f.connector.health_snapshot().recent_errors;
        assert!(errors.iter().any(|e| e.class == ErrorClass::Persistence));
    }

    #[tokio::test]
    async fn breaker_opens_after_consecutive_failures() {
        let f = fixture(fast_settings());
        f.connector.connect().await.unwrap();
        f.gateway.fail_next_orders(5);

        for i in 0..5 {
            let request =
                OrderRequest::market("AAPL", OrderSide::Buy, dec!(1), format!("K{i}").as_str());
            assert!(matches!(
                f.connector.submit_order(&request).await,
                Err(ConnectorError::Gateway(GatewayError::Transport { .. }))
            ));
        }

        let request = OrderRequest::market("AAPL", OrderSide::Buy, dec!(1), "K-final");
        assert_eq!(
            f.connector.submit_order(&request).await,
            Err(ConnectorError::CircuitOpen)
        );
        assert_eq!(f.connector.breaker_metrics().state, CircuitBreakerState::Open);
        assert_eq!(f.connector.health_snapshot().orders_failed, 6);
    }

    #[tokio::test]
    async fn acknowledgement_wait_times_out() {
        let f = fixture(fast_settings());
        f.connector.connect().await.unwrap();
        let instrument = f.gateway.qualify_instrument("AAPL").await.unwrap();
        let held = GatewayOrderRequest::new(
            IdempotencyKey::new("K1"),
            "AAPL",
            OrderSide::Buy,
            OrderKind::Limit,
            dec!(10),
        )
        .with_limit_price(dec!(150))
        .held();
        let id = f.gateway.place_order(&instrument, &held).await.unwrap();

        let Err(err) = f.connector.await_acknowledgement(&id, ms(30)).await else {
            panic!("held order is never acknowledged");
        };
        assert!(matches!(
            err,
            ConnectorError::Timeout {
                operation: "acknowledgement",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn hung_request_times_out() {
        let settings = ConnectorSettings {
            request_timeout: ms(20),
            ..fast_settings()
        };
        let f = fixture(settings);
        f.connector.connect().await.unwrap();
        f.gateway.hang_orders(true);

        let request = OrderRequest::market("AAPL", OrderSide::Buy, dec!(1), "K1");
        let Err(err) = f.connector.submit_order(&request).await else {
            panic!("hung placement should time out");
        };
        assert_eq!(
            err,
            ConnectorError::Timeout {
                operation: "place_order",
                after: ms(20)
            }
        );
    }

    #[tokio::test]
    async fn disconnect_closes_for_good() {
        let f = fixture(fast_settings());
        f.connector.connect().await.unwrap();

        f.connector.disconnect().await;

        assert_eq!(f.connector.connection_state(), ConnectionState::Closed);
        assert!(!f.gateway.is_connected());
        assert!(!f.connector.schedule_reconnect("test"));
        assert_eq!(
            f.connector.connect().await,
            Err(ConnectorError::NotConnected {
                state: ConnectionState::Closed
            })
        );
    }

    #[tokio::test]
    async fn executions_are_booked_and_placements_counted() {
        use crate::application::ports::PortfolioReadModel;
        use crate::infrastructure::persistence::InMemoryPortfolio;

        let f = fixture(fast_settings());
        let portfolio = Arc::new(InMemoryPortfolio::new(AccountSnapshot::default()));
        f.connector.attach_ledger(portfolio.clone());
        f.connector.connect().await.unwrap();
        let since = chrono::Utc::now() - chrono::Duration::minutes(1);

        let request = OrderRequest::market("AAPL", OrderSide::Buy, dec!(10), "L1");
        let receipt = f.connector.submit_order(&request).await.unwrap();
        f.gateway.fill(&receipt.gateway_order_id, dec!(10), dec!(150));

        for _ in 0..100 {
            if portfolio.position("AAPL").await.unwrap().is_some() {
                break;
            }
            tokio::time::sleep(ms(5)).await;
        }
        let position = portfolio.position("AAPL").await.unwrap().expect("fill books a position");
        assert_eq!(position.quantity, dec!(10));
        assert_eq!(portfolio.trades_since(since).await.unwrap().len(), 1);
        assert_eq!(portfolio.order_count_since(since).await.unwrap(), 1);

        // A deduplicated resubmission is not a new order.
        let row = Order::submitted(
            OrderId::new("o-1"),
            receipt.gateway_order_id.clone(),
            "AAPL",
            OrderSide::Buy,
            OrderKind::Market,
            dec!(10),
            IdempotencyKey::new("L1"),
        );
        f.store.insert(&row).await.unwrap();
        f.connector.submit_order(&request).await.unwrap();
        assert_eq!(portfolio.order_count_since(since).await.unwrap(), 1);

        f.connector.disconnect().await;
    }
}
