//! Order Lifecycle Manager
//!
//! Drives each order attempt through validation, risk gating, submission
//! and acknowledgment on an explicit state machine, then applies the
//! gateway's asynchronous status and execution updates until the order is
//! terminal.
//!
//! All active orders live in one book behind a single mutex that is never
//! held across an await. An order whose `create_order` call is still
//! running is "in flight": updates and cancels may change its state, but
//! only `create_order` finalizes it, so the final write never races the
//! initial one.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::risk_engine::RiskEngine;
use crate::application::ports::{
    BracketOrder, ConnectorError, MarketContext, OrderRouter, OrderStore, PortfolioReadModel,
};
use crate::domain::connection::{GatewayOrderStatus, OrderUpdate};
use crate::domain::order::{
    Order, OrderContext, OrderEvent, OrderKind, OrderRequest, OrderSide, OrderState,
    OrderStateMachine, TransitionError,
};
use crate::domain::risk::OrderProposal;
use crate::domain::shared::{CorrelationId, ExecutionId, GatewayOrderId, OrderId};
use crate::error::ErrorClass;
use crate::observability;

/// Order handling settings.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSettings {
    /// Largest accepted quantity.
    pub max_quantity: Decimal,
    /// Bound on waiting for the gateway to accept an order.
    pub ack_timeout: Duration,
    /// Largest accepted distance of a limit price from the last price, as a fraction.
    pub max_limit_deviation: Decimal,
    /// Whether market orders are refused outside the session.
    pub enforce_trading_hours: bool,
    /// Completed orders kept for queries.
    pub completed_capacity: usize,
}

impl Default for OrderSettings {
    fn default() -> Self {
        Self {
            max_quantity: Decimal::from(10_000),
            ack_timeout: Duration::from_secs(5),
            max_limit_deviation: Decimal::new(10, 2),
            enforce_trading_hours: true,
            completed_capacity: 1_000,
        }
    }
}

/// Outcome of [`OrderLifecycleManager::create_order`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderOutcome {
    /// Whether the gateway accepted the order.
    pub success: bool,
    /// The order context at the time the call returned.
    pub context: OrderContext,
}

/// Counters exposed by the manager.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ManagerMetrics {
    /// Orders created.
    pub created: u64,
    /// Orders handed to the gateway.
    pub submitted: u64,
    /// Orders filled.
    pub filled: u64,
    /// Orders cancelled.
    pub cancelled: u64,
    /// Orders rejected.
    pub rejected: u64,
    /// Orders failed.
    pub failed: u64,
    /// Orders not yet terminal.
    pub active: usize,
    /// Quantity filled across completed orders.
    pub filled_volume: Decimal,
    /// Commission across completed orders.
    pub total_commission: Decimal,
    /// Filled divided by submitted.
    pub fill_rate: f64,
}

/// Order manager errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrderManagerError {
    /// No active order with this id.
    #[error("no active order {0}")]
    UnknownOrder(CorrelationId),

    /// The order is being submitted and has no gateway id yet.
    #[error("order {0} is being submitted; cancel once the gateway has assigned an id")]
    SubmissionInFlight(CorrelationId),

    /// The gateway refused or failed the cancel.
    #[error("cancel failed: {0}")]
    Cancel(#[from] ConnectorError),

    /// The order can no longer be cancelled.
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

#[derive(Debug, Default)]
struct OrderBook {
    active: HashMap<CorrelationId, OrderStateMachine>,
    by_gateway: HashMap<GatewayOrderId, CorrelationId>,
    in_flight: HashSet<CorrelationId>,
    /// Execution ids seen per active order; dropped when the order completes.
    executions: HashMap<CorrelationId, HashSet<ExecutionId>>,
    completed: VecDeque<OrderContext>,
    metrics: ManagerMetrics,
}

impl OrderBook {
    fn machine(&mut self, id: &CorrelationId) -> Option<&mut OrderStateMachine> {
        self.active.get_mut(id)
    }
}

enum CancelPlan {
    Remote(GatewayOrderId),
    Local,
}

/// Order lifecycle manager.
pub struct OrderLifecycleManager<R, S, P, M>
where
    R: OrderRouter,
    S: OrderStore,
    P: PortfolioReadModel,
    M: MarketContext,
{
    settings: OrderSettings,
    risk: Arc<RiskEngine<P>>,
    portfolio: Arc<P>,
    store: Arc<S>,
    router: Arc<R>,
    market: Arc<M>,
    book: Mutex<OrderBook>,
}

impl<R, S, P, M> OrderLifecycleManager<R, S, P, M>
where
    R: OrderRouter,
    S: OrderStore,
    P: PortfolioReadModel,
    M: MarketContext,
{
    /// Create a manager.
    #[must_use]
    pub fn new(
        settings: OrderSettings,
        risk: Arc<RiskEngine<P>>,
        portfolio: Arc<P>,
        store: Arc<S>,
        router: Arc<R>,
        market: Arc<M>,
    ) -> Self {
        Self {
            settings,
            risk,
            portfolio,
            store,
            router,
            market,
            book: Mutex::new(OrderBook::default()),
        }
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Validate, risk-check, submit and await acknowledgment of one order.
    ///
    /// Validation and risk rejections are normal outcomes carried in the
    /// returned context; nothing here returns an error.
    #[tracing::instrument(skip_all, fields(ticker = %request.ticker, key = %request.idempotency_key))]
    pub async fn create_order(&self, request: OrderRequest) -> OrderOutcome {
        let machine = OrderStateMachine::new(request.clone());
        let initial = machine.context().clone();
        let id = initial.correlation_id.clone();
        {
            let mut book = self.book.lock();
            book.active.insert(id.clone(), machine);
            book.in_flight.insert(id.clone());
            book.metrics.created += 1;
            observability::update_active_orders(book.active.len());
        }
        observability::record_order_stage("created");
        tracing::info!(
            correlation_id = %id,
            side = %request.side,
            quantity = %request.quantity,
            kind = %request.kind,
            "Order created"
        );

        self.run_pipeline(&id, &request).await;
        self.complete(&id, initial).await
    }

    async fn run_pipeline(&self, id: &CorrelationId, request: &OrderRequest) {
        // Validate
        let failures = self.validate(id, request).await;
        if !self.advance(id, OrderEvent::Validate) {
            return;
        }
        if !failures.is_empty() {
            self.update(id, |m| {
                for (class, message) in failures {
                    m.context_mut().record_error(class, message);
                }
            });
            self.reject(id, "validation");
            return;
        }

        // Risk
        let Some(price) = request
            .stated_price()
            .or_else(|| self.market.last_price(&request.ticker))
        else {
            self.update(id, |m| {
                m.context_mut().record_error(
                    ErrorClass::Validation,
                    format!("no price available for {}", request.ticker),
                );
            });
            self.reject(id, "validation");
            return;
        };

        let mut proposal = OrderProposal::new(&request.ticker, request.side, request.quantity, price);
        if let Some(stop_loss) = request.stop_loss {
            proposal = proposal.with_stop_loss(stop_loss);
        }
        let check = match self.risk.check_order(&proposal).await {
            Ok(check) => check,
            Err(e) => {
                self.fail(id, ErrorClass::Internal, format!("risk check failed: {e}"));
                return;
            }
        };
        let rejected = self.update(id, |m| {
            let ctx = m.context_mut();
            ctx.annotate("risk_score", check.risk_score);
            ctx.annotate("risk_level", check.risk_level.to_string());
            ctx.annotate(
                "violations",
                check
                    .violations
                    .iter()
                    .map(|v| v.as_str().to_string())
                    .collect::<Vec<_>>(),
            );
            ctx.annotate(
                "position_impact",
                serde_json::to_value(&check.position_impact).unwrap_or_default(),
            );
            if !check.recommendations.is_empty() {
                ctx.annotate("recommendations", check.recommendations.clone());
            }
            if let Some(quantity) = check.recommended_quantity {
                ctx.annotate("recommended_quantity", quantity.to_string());
            }
            if !check.approved {
                for reason in &check.reasons {
                    ctx.record_error(ErrorClass::RiskRejected, reason.clone());
                }
            }
            !check.approved
        });
        if !self.advance(id, OrderEvent::RiskCheck) {
            return;
        }
        if rejected == Some(true) {
            self.reject(id, "risk");
            return;
        }

        // Submit
        if !self.advance(id, OrderEvent::Submit) {
            return;
        }
        {
            let mut book = self.book.lock();
            book.metrics.submitted += 1;
        }
        observability::record_order_stage("submitted");
        let submitted = Instant::now();

        let gateway_id = if request.is_bracket() {
            self.submit_bracket(id, request, price).await
        } else {
            self.submit_single(id, request).await
        };
        let Some(gateway_id) = gateway_id else {
            return;
        };
        // The placement changed today's order count.
        self.risk.invalidate_metrics();

        // Acknowledge
        match self
            .router
            .await_acknowledgement(&gateway_id, self.settings.ack_timeout)
            .await
        {
            Ok(status) => {
                observability::record_ack_latency(
                    &request.kind.to_string(),
                    submitted.elapsed().as_secs_f64(),
                );
                self.update(id, |m| apply_update(m, &OrderUpdate::Status(status)));
            }
            Err(e) => {
                tracing::warn!(
                    correlation_id = %id,
                    gateway_order_id = %gateway_id,
                    error = %e,
                    "Acknowledgment not received; order may still be live at the gateway"
                );
                self.fail(id, e.class(), format!("acknowledgment failed: {e}"));
                return;
            }
        }

        // Persist
        let accepted = self.update(id, |m| {
            let state = m.state();
            let ctx = m.context();
            (state != OrderState::Rejected && !ctx.persisted).then(|| Order::from_context(ctx))
        });
        if let Some(Some(order)) = accepted {
            let written = self.store.insert(&order).await;
            self.update(id, |m| match written {
                Ok(()) => m.context_mut().persisted = true,
                Err(e) => flag_persistence(m.context_mut(), &e.to_string()),
            });
        }
    }

    async fn validate(&self, id: &CorrelationId, request: &OrderRequest) -> Vec<(ErrorClass, String)> {
        let mut failures = Vec::new();

        if let Err(e) = request.validate(self.settings.max_quantity) {
            failures.push((ErrorClass::Validation, e.to_string()));
            return failures;
        }

        match self.store.find_by_idempotency_key(&request.idempotency_key).await {
            Ok(Some(existing)) => {
                self.update(id, |m| {
                    let ctx = m.context_mut();
                    ctx.annotate("existing_order_id", existing.id.as_str());
                    if let Some(gateway_id) = &existing.gateway_order_id {
                        ctx.annotate("existing_gateway_order_id", gateway_id.as_str());
                    }
                });
                failures.push((
                    ErrorClass::Validation,
                    format!(
                        "duplicate idempotency key {}: already placed as order {}",
                        request.idempotency_key, existing.id
                    ),
                ));
            }
            Ok(None) => {}
            Err(e) => failures.push((
                ErrorClass::Persistence,
                format!("idempotency check failed: {e}"),
            )),
        }

        if self.settings.enforce_trading_hours
            && request.kind == OrderKind::Market
            && !self.market.is_market_open(Utc::now())
        {
            failures.push((
                ErrorClass::Validation,
                "market orders are not accepted outside trading hours".to_string(),
            ));
        }

        if self.market.is_halted(&request.ticker) {
            failures.push((
                ErrorClass::Validation,
                format!("trading in {} is halted", request.ticker),
            ));
        }

        if let (Some(limit), Some(last)) = (request.limit_price, self.market.last_price(&request.ticker))
            && last > Decimal::ZERO
        {
            let deviation = (limit - last).abs() / last;
            if deviation > self.settings.max_limit_deviation {
                failures.push((
                    ErrorClass::Validation,
                    format!(
                        "limit price {limit} is {}% away from last price {last}",
                        (deviation * Decimal::ONE_HUNDRED).round_dp(1)
                    ),
                ));
            }
        }

        if request.side == OrderSide::Sell {
            match self.portfolio.position(&request.ticker).await {
                Ok(Some(position)) if position.quantity >= request.quantity => {}
                Ok(Some(position)) => failures.push((
                    ErrorClass::Validation,
                    format!(
                        "insufficient position in {}: holding {}, selling {}",
                        request.ticker, position.quantity, request.quantity
                    ),
                )),
                Ok(None) => failures.push((
                    ErrorClass::Validation,
                    format!("no position in {} to sell", request.ticker),
                )),
                Err(e) => failures.push((
                    ErrorClass::Persistence,
                    format!("position lookup failed: {e}"),
                )),
            }
        }

        failures
    }

    async fn submit_single(&self, id: &CorrelationId, request: &OrderRequest) -> Option<GatewayOrderId> {
        match self.router.submit_order(request).await {
            Ok(receipt) => {
                let gateway_id = receipt.gateway_order_id.clone();
                self.index(id, &gateway_id, |ctx| {
                    if let Some(existing) = &receipt.existing_order_id {
                        ctx.annotate("deduplicated", true);
                        ctx.annotate("existing_order_id", existing.as_str());
                        ctx.persisted = true;
                    }
                });
                Some(gateway_id)
            }
            Err(e) => {
                self.fail(id, e.class(), format!("submission failed: {e}"));
                None
            }
        }
    }

    async fn submit_bracket(
        &self,
        id: &CorrelationId,
        request: &OrderRequest,
        entry: Decimal,
    ) -> Option<GatewayOrderId> {
        let Some(bracket) = BracketOrder::from_request(request, OrderId::new(id.as_str()), entry) else {
            self.fail(id, ErrorClass::Internal, "bracket request without protective prices");
            return None;
        };
        match self.router.submit_bracket(&bracket).await {
            Ok(ids) => {
                let gateway_id = ids.parent.clone();
                self.index(id, &gateway_id, |ctx| {
                    ctx.child_order_ids = ids.stop_loss.iter().chain(&ids.take_profit).cloned().collect();
                    if ids.deduplicated {
                        ctx.annotate("deduplicated", true);
                        ctx.annotate("existing_order_id", ids.parent_order_id.as_str());
                    }
                    match &ids.persistence_error {
                        Some(message) => flag_persistence(ctx, message),
                        None => ctx.persisted = true,
                    }
                });
                Some(gateway_id)
            }
            Err(e) => {
                self.fail(id, e.class(), format!("bracket submission failed: {e}"));
                None
            }
        }
    }

    fn index(&self, id: &CorrelationId, gateway_id: &GatewayOrderId, f: impl FnOnce(&mut OrderContext)) {
        let mut book = self.book.lock();
        let Some(machine) = book.machine(id) else {
            return;
        };
        let ctx = machine.context_mut();
        ctx.gateway_order_id = Some(gateway_id.clone());
        f(ctx);
        book.by_gateway.insert(gateway_id.clone(), id.clone());
    }

    // ========================================================================
    // State helpers
    // ========================================================================

    /// Run `f` on an active order. `None` if the order is not active.
    fn update<T>(&self, id: &CorrelationId, f: impl FnOnce(&mut OrderStateMachine) -> T) -> Option<T> {
        let mut book = self.book.lock();
        book.machine(id).map(f)
    }

    /// Fire `event`. Returns false if the pipeline must stop: the order was
    /// changed concurrently (e.g. cancelled) or the event was refused.
    fn advance(&self, id: &CorrelationId, event: OrderEvent) -> bool {
        self.update(id, |m| match m.fire(event) {
            Ok(_) => true,
            Err(e) => {
                tracing::info!(
                    correlation_id = %id,
                    error = %e,
                    "Order changed concurrently; stopping"
                );
                false
            }
        })
        .unwrap_or(false)
    }

    fn reject(&self, id: &CorrelationId, stage: &'static str) {
        self.update(id, |m| {
            if m.fire(OrderEvent::Reject).is_ok() {
                tracing::info!(
                    correlation_id = %id,
                    stage,
                    reasons = ?m.context().reasons(),
                    "Order rejected"
                );
            }
        });
    }

    fn fail(&self, id: &CorrelationId, class: ErrorClass, message: impl Into<String>) {
        let message = message.into();
        self.update(id, |m| {
            m.context_mut().record_error(class, message.clone());
            if m.fire(OrderEvent::Fail).is_ok() {
                tracing::error!(
                    correlation_id = %id,
                    class = %class,
                    error = %message,
                    "Order failed"
                );
            }
        });
    }

    /// Leave the in-flight set and finalize if terminal. Returns the outcome.
    async fn complete(&self, id: &CorrelationId, initial: OrderContext) -> OrderOutcome {
        let snapshot = {
            let mut book = self.book.lock();
            book.in_flight.remove(id);
            book.machine(id).map(|m| m.context().clone())
        };

        let context = match snapshot {
            Some(context) if context.state.is_terminal() => self.finalize(id).await.unwrap_or(context),
            Some(context) => context,
            None => self.completed_context(id).unwrap_or(initial),
        };

        OrderOutcome {
            success: matches!(
                context.state,
                OrderState::Acknowledged | OrderState::PartiallyFilled | OrderState::Filled
            ),
            context,
        }
    }

    /// Remove a terminal order from the book and write its final state.
    async fn finalize(&self, id: &CorrelationId) -> Option<OrderContext> {
        let context = {
            let mut book = self.book.lock();
            let machine = book.active.remove(id)?;
            let context = machine.into_context();
            if let Some(gateway_id) = &context.gateway_order_id {
                book.by_gateway.remove(gateway_id);
            }
            book.executions.remove(id);

            let metrics = &mut book.metrics;
            match context.state {
                OrderState::Filled => metrics.filled += 1,
                OrderState::Cancelled => metrics.cancelled += 1,
                OrderState::Rejected => metrics.rejected += 1,
                OrderState::Failed => metrics.failed += 1,
                _ => {}
            }
            metrics.filled_volume += context.filled_quantity;
            metrics.total_commission += context.commission;

            book.completed.push_back(context.clone());
            while book.completed.len() > self.settings.completed_capacity {
                book.completed.pop_front();
            }
            observability::update_active_orders(book.active.len());
            context
        };
        observability::record_order_stage(context.state.as_str());

        tracing::info!(
            correlation_id = %id,
            state = %context.state,
            filled_quantity = %context.filled_quantity,
            avg_fill_price = ?context.avg_fill_price,
            "Order completed"
        );

        if let Err(message) = self.write_final(&context).await {
            let mut book = self.book.lock();
            if let Some(entry) = book.completed.iter_mut().rev().find(|c| &c.correlation_id == id) {
                flag_persistence(entry, &message);
                return Some(entry.clone());
            }
        }
        Some(context)
    }

    /// Final write of a terminal order, carrying the audit note.
    ///
    /// Orders the gateway never saw have no row and are not written. Once
    /// the gateway has assigned an id the idempotency key is spent: a failed
    /// order is still stored, so resubmitting the key is refused instead of
    /// placing a second live order.
    async fn write_final(&self, context: &OrderContext) -> Result<(), String> {
        let id = OrderId::new(context.correlation_id.as_str());
        let now = Utc::now();
        match self.store.find_by_id(&id).await {
            Ok(Some(mut order)) => {
                order.apply_status(context.state, now);
                order.apply_fill(context.filled_quantity, context.avg_fill_price);
                order.commission = context.commission;
                order.note = Some(context.audit_note());
                self.store.save(&order).await.map_err(|e| e.to_string())
            }
            Ok(None) if context.persisted || context.gateway_order_id.is_some() => {
                self.store.insert(&Order::from_context(context)).await.map_err(|e| e.to_string())
            }
            Ok(None) => Ok(()),
            Err(e) => Err(e.to_string()),
        }
    }

    fn completed_context(&self, id: &CorrelationId) -> Option<OrderContext> {
        self.book
            .lock()
            .completed
            .iter()
            .rev()
            .find(|c| &c.correlation_id == id)
            .cloned()
    }

    // ========================================================================
    // Updates
    // ========================================================================

    /// Apply a status or execution update from the connector.
    ///
    /// Updates for unknown orders, duplicate executions and events that are
    /// not legal in the order's state are dropped and logged.
    pub async fn handle_update(&self, update: OrderUpdate) {
        // Executions move positions and trade counts, including bracket
        // legs this book does not track.
        if matches!(update, OrderUpdate::Execution(_)) {
            self.risk.invalidate_metrics();
        }
        let finalize = {
            let mut book = self.book.lock();
            let Some(id) = book.by_gateway.get(update.gateway_order_id()).cloned() else {
                tracing::debug!(
                    gateway_order_id = %update.gateway_order_id(),
                    "Update for untracked order"
                );
                return;
            };
            if let OrderUpdate::Execution(report) = &update
                && !book
                    .executions
                    .entry(id.clone())
                    .or_default()
                    .insert(report.execution_id.clone())
            {
                tracing::debug!(execution_id = %report.execution_id, "Duplicate execution dropped");
                return;
            }
            let in_flight = book.in_flight.contains(&id);
            let Some(machine) = book.machine(&id) else {
                return;
            };
            apply_update(machine, &update);
            (machine.state().is_terminal() && !in_flight).then_some(id)
        };

        if let Some(id) = finalize {
            self.finalize(&id).await;
        }
    }

    /// Consume updates until the channel closes or `shutdown` fires.
    pub async fn process_updates(
        &self,
        mut updates: mpsc::Receiver<OrderUpdate>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                update = updates.recv() => {
                    match update {
                        Some(update) => self.handle_update(update).await,
                        None => {
                            tracing::info!("Order update channel closed");
                            break;
                        }
                    }
                }
                () = shutdown.cancelled() => {
                    tracing::info!("Order update processing shutting down");
                    break;
                }
            }
        }
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Cancel an active order.
    ///
    /// An order live at the gateway is cancelled there first; the local
    /// transition is applied only once the gateway confirms.
    pub async fn cancel_order(&self, id: &CorrelationId) -> Result<OrderState, OrderManagerError> {
        let plan = {
            let mut book = self.book.lock();
            let Some(machine) = book.machine(id) else {
                return Err(OrderManagerError::UnknownOrder(id.clone()));
            };
            let state = machine.state();
            if state.is_live_at_gateway() {
                match machine.context().gateway_order_id.clone() {
                    Some(gateway_id) => CancelPlan::Remote(gateway_id),
                    None => return Err(OrderManagerError::SubmissionInFlight(id.clone())),
                }
            } else {
                machine.fire(OrderEvent::Cancel)?;
                CancelPlan::Local
            }
        };

        if let CancelPlan::Remote(gateway_id) = plan {
            self.router.cancel_order(&gateway_id).await?;
            let mut book = self.book.lock();
            // A cancelled status update may have already finalized the order.
            if let Some(machine) = book.machine(id)
                && machine.state() != OrderState::Cancelled
            {
                machine.fire(OrderEvent::Cancel)?;
            }
        }

        tracing::info!(correlation_id = %id, "Order cancelled");

        let finalize = {
            let book = self.book.lock();
            book.active.contains_key(id) && !book.in_flight.contains(id)
        };
        if finalize {
            self.finalize(id).await;
        }
        Ok(OrderState::Cancelled)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Context of an active or recently completed order.
    #[must_use]
    pub fn get_order(&self, id: &CorrelationId) -> Option<OrderContext> {
        let active = self.book.lock().active.get(id).map(|m| m.context().clone());
        active.or_else(|| self.completed_context(id))
    }

    /// Contexts of every active order.
    #[must_use]
    pub fn active_orders(&self) -> Vec<OrderContext> {
        self.book
            .lock()
            .active
            .values()
            .map(|m| m.context().clone())
            .collect()
    }

    /// Lifecycle counters.
    #[must_use]
    pub fn metrics(&self) -> ManagerMetrics {
        let book = self.book.lock();
        let mut metrics = book.metrics.clone();
        metrics.active = book.active.len();
        metrics.fill_rate = if metrics.submitted > 0 {
            metrics.filled as f64 / metrics.submitted as f64
        } else {
            0.0
        };
        metrics
    }
}

fn fire(machine: &mut OrderStateMachine, event: OrderEvent) {
    if let Err(e) = machine.fire(event) {
        tracing::debug!(
            correlation_id = %machine.context().correlation_id,
            error = %e,
            "Out-of-order update dropped"
        );
    }
}

/// Apply one update to a machine. Refused events are logged and dropped.
fn apply_update(machine: &mut OrderStateMachine, update: &OrderUpdate) {
    match update {
        OrderUpdate::Status(status) => {
            machine
                .context_mut()
                .apply_fill(status.filled_quantity, status.avg_fill_price);
            if status.status == GatewayOrderStatus::Rejected {
                let reason = status
                    .message
                    .clone()
                    .unwrap_or_else(|| "rejected by gateway".to_string());
                machine.context_mut().record_error(ErrorClass::Gateway, reason);
            }
            // A fill or cancel report implies the gateway accepted the order.
            if machine.state() == OrderState::Submitted && status.status.is_acknowledged() {
                fire(machine, OrderEvent::Acknowledge);
            }
            if let Some(event) = status.status.lifecycle_event()
                && event != OrderEvent::Acknowledge
            {
                fire(machine, event);
            }
        }
        OrderUpdate::Execution(report) => {
            let ctx = machine.context_mut();
            ctx.apply_fill(report.cumulative_quantity, Some(report.avg_price));
            ctx.commission += report.commission;
            let complete = ctx.filled_quantity >= ctx.request.quantity;

            if machine.state() == OrderState::Submitted {
                fire(machine, OrderEvent::Acknowledge);
            }
            fire(
                machine,
                if complete {
                    OrderEvent::Fill
                } else {
                    OrderEvent::PartialFill
                },
            );
        }
    }
}

fn flag_persistence(context: &mut OrderContext, message: &str) {
    context.annotate("persistence_inconsistent", true);
    context.record_error(
        ErrorClass::Persistence,
        format!("order accepted by the gateway but not persisted: {message}"),
    );
    tracing::error!(
        correlation_id = %context.correlation_id,
        gateway_order_id = ?context.gateway_order_id,
        error = %message,
        "Persistence inconsistency"
    );
}
