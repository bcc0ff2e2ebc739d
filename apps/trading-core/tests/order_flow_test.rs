//! End-to-end order flow: lifecycle manager, risk engine, resilient
//! connector and paper gateway wired the way the binary wires them.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;
use trading_core::application::ports::{OrderStore, PortfolioLedger, PortfolioReadModel};
use trading_core::application::services::{
    OrderLifecycleManager, OrderSettings, RiskEngine, RiskSettings,
};
use trading_core::domain::connection::ConnectionState;
use trading_core::domain::order::{OrderContext, OrderRequest, OrderSide, OrderState};
use trading_core::domain::risk::AccountSnapshot;
use trading_core::domain::shared::{CorrelationId, OrderId};
use trading_core::error::ErrorClass;
use trading_core::infrastructure::gateway::{
    ConnectorSettings, PaperGateway, PaperGatewayConfig, ReconnectConfig, ResilientConnector,
};
use trading_core::infrastructure::market_board::{MarketBoard, TradingSession};
use trading_core::infrastructure::persistence::{
    InMemoryOrderStore, InMemoryPortfolio, SqliteOrderStore,
};

type Manager<S> =
    OrderLifecycleManager<ResilientConnector<PaperGateway, S>, S, InMemoryPortfolio, MarketBoard>;

struct Harness<S: OrderStore + 'static> {
    gateway: Arc<PaperGateway>,
    connector: Arc<ResilientConnector<PaperGateway, S>>,
    store: Arc<S>,
    board: Arc<MarketBoard>,
    portfolio: Arc<InMemoryPortfolio>,
    manager: Arc<Manager<S>>,
    shutdown: CancellationToken,
}

impl<S: OrderStore + 'static> Harness<S> {
    async fn start(store: Arc<S>) -> Self {
        Self::start_with(store, settings()).await
    }

    async fn start_with(store: Arc<S>, settings: ConnectorSettings) -> Self {
        Self::build(store, settings, RiskSettings::default()).await
    }

    async fn start_with_risk(store: Arc<S>, risk: RiskSettings) -> Self {
        Self::build(store, settings(), risk).await
    }

    async fn build(store: Arc<S>, settings: ConnectorSettings, risk: RiskSettings) -> Self {
        let (gateway, events) = PaperGateway::new(PaperGatewayConfig {
            fill_delay: Duration::from_millis(20),
            latency_jitter: Duration::ZERO,
            ..PaperGatewayConfig::default()
        });
        gateway.set_price("AAPL", dec!(150));

        let (connector, updates) =
            ResilientConnector::new(Arc::clone(&gateway), Arc::clone(&store), events, settings);
        let portfolio = Arc::new(InMemoryPortfolio::new(AccountSnapshot {
            portfolio_value: dec!(100_000),
            cash: dec!(100_000),
            margin_used: dec!(0),
            margin_available: dec!(100_000),
        }));
        connector.attach_ledger(Arc::clone(&portfolio) as Arc<dyn PortfolioLedger>);
        connector.connect().await.unwrap();

        let board = Arc::new(MarketBoard::new(TradingSession::always_open()));
        board.set_price("AAPL", dec!(150));
        let risk = Arc::new(RiskEngine::new(Arc::clone(&portfolio), risk));
        let manager = Arc::new(OrderLifecycleManager::new(
            OrderSettings {
                ack_timeout: Duration::from_millis(500),
                ..OrderSettings::default()
            },
            risk,
            Arc::clone(&portfolio),
            Arc::clone(&store),
            Arc::clone(&connector),
            Arc::clone(&board),
        ));

        let shutdown = CancellationToken::new();
        {
            let manager = Arc::clone(&manager);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { manager.process_updates(updates, shutdown).await });
        }

        Self {
            gateway,
            connector,
            store,
            board,
            portfolio,
            manager,
            shutdown,
        }
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.connector.disconnect().await;
    }

    async fn wait_for_state(&self, id: &CorrelationId, state: OrderState) -> OrderContext {
        for _ in 0..100 {
            if let Some(context) = self.manager.get_order(id)
                && context.state == state
            {
                return context;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("order {id} never reached {state}");
    }
}

fn settings() -> ConnectorSettings {
    ConnectorSettings {
        connect: ReconnectConfig::new(Duration::from_millis(5), Duration::from_millis(20), 2.0, 3),
        reconnect: ReconnectConfig::new(Duration::from_millis(5), Duration::from_millis(20), 2.0, 5),
        request_timeout: Duration::from_millis(200),
        bracket_leg_pause: Duration::from_millis(1),
        bracket_ack_wait: Duration::from_millis(200),
        ack_poll_interval: Duration::from_millis(5),
        ..ConnectorSettings::default()
    }
}

fn buy(key: &str) -> OrderRequest {
    OrderRequest::market("AAPL", OrderSide::Buy, dec!(10), key).with_stop_loss(dec!(145))
}

fn violations(context: &OrderContext) -> Vec<String> {
    context
        .metadata
        .get("violations")
        .and_then(|v| v.as_array())
        .map(|list| {
            list.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn risk_with(limits: impl FnOnce(&mut RiskSettings)) -> RiskSettings {
    let mut risk = RiskSettings::default();
    limits(&mut risk);
    risk
}

#[tokio::test]
async fn market_order_is_accepted_then_filled() {
    let h = Harness::start(Arc::new(InMemoryOrderStore::new())).await;

    let outcome = h.manager.create_order(buy("flow-1")).await;
    assert!(outcome.success, "order should be accepted: {:?}", outcome.context.errors);
    assert!(outcome.context.persisted);
    let id = outcome.context.correlation_id.clone();

    let filled = h.wait_for_state(&id, OrderState::Filled).await;
    assert_eq!(filled.filled_quantity, dec!(10));
    assert_eq!(filled.avg_fill_price, Some(dec!(150)));

    let row = h
        .store
        .find_by_id(&OrderId::new(id.as_str()))
        .await
        .unwrap()
        .expect("accepted order is persisted");
    assert_eq!(row.quantity, dec!(10));
    assert!(row.gateway_order_id.is_some());
    assert_eq!(h.gateway.placed_orders().len(), 1);
    assert_eq!(h.connector.health_snapshot().orders_placed, 1);

    h.stop().await;
}

#[tokio::test]
async fn oversized_order_is_rejected_before_the_gateway() {
    let h = Harness::start(Arc::new(InMemoryOrderStore::new())).await;

    // 1 000 × 150 is 150% of the portfolio against a 10% limit.
    let request =
        OrderRequest::market("AAPL", OrderSide::Buy, dec!(1000), "flow-big").with_stop_loss(dec!(145));
    let outcome = h.manager.create_order(request).await;

    assert!(!outcome.success);
    assert_eq!(outcome.context.state, OrderState::Rejected);
    assert!(outcome.context.metadata.contains_key("recommended_quantity"));
    assert!(h.gateway.placed_orders().is_empty());
    assert!(h.store.find_by_idempotency_key(&"flow-big".into()).await.unwrap().is_none());

    h.stop().await;
}

#[tokio::test]
async fn bracket_order_places_linked_legs() {
    let h = Harness::start(Arc::new(InMemoryOrderStore::new())).await;

    let request = OrderRequest::bracket(
        "AAPL",
        OrderSide::Buy,
        dec!(10),
        dec!(150),
        dec!(145),
        dec!(160),
        "flow-bracket",
    );
    let outcome = h.manager.create_order(request).await;
    assert!(outcome.success, "bracket should be accepted: {:?}", outcome.context.errors);
    assert_eq!(outcome.context.child_order_ids.len(), 2);

    let legs = h.gateway.placed_orders();
    assert_eq!(legs.len(), 3);
    let parent = outcome.context.gateway_order_id.clone().expect("parent id");
    assert!(legs[0].parent_id.is_none());
    assert!(legs[1..].iter().all(|leg| leg.parent_id.as_ref() == Some(&parent)));
    assert!(legs[1..].iter().all(|leg| leg.side == OrderSide::Sell));
    assert!(legs[2].transmit, "the last leg transmits the bracket");

    let parent_row = h
        .store
        .find_by_idempotency_key(&"flow-bracket".into())
        .await
        .unwrap()
        .expect("parent persisted");
    assert_eq!(h.store.children_of(&parent_row.id).await.unwrap().len(), 2);

    h.stop().await;
}

#[tokio::test]
async fn duplicate_key_in_one_session_never_reaches_the_gateway_twice() {
    let h = Harness::start(Arc::new(InMemoryOrderStore::new())).await;

    let first = h.manager.create_order(buy("flow-dup")).await;
    assert!(first.success);
    let second = h.manager.create_order(buy("flow-dup")).await;

    assert!(!second.success);
    assert_eq!(second.context.state, OrderState::Rejected);
    assert_eq!(
        second
            .context
            .metadata
            .get("existing_order_id")
            .and_then(|v| v.as_str()),
        Some(first.context.correlation_id.as_str())
    );
    assert_eq!(h.gateway.placed_orders().len(), 1);

    h.stop().await;
}

#[tokio::test]
async fn duplicate_key_is_rejected_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("orders.db");

    let first_id = {
        let store = Arc::new(SqliteOrderStore::open(&path).await.unwrap());
        let h = Harness::start(Arc::clone(&store)).await;
        let outcome = h.manager.create_order(buy("restart-1")).await;
        assert!(outcome.success, "{:?}", outcome.context.errors);
        let id = outcome.context.correlation_id.clone();
        h.stop().await;
        store.close().await;
        id
    };

    // A fresh process: new gateway session, same database file.
    let store = Arc::new(SqliteOrderStore::open(&path).await.unwrap());
    let h = Harness::start(Arc::clone(&store)).await;
    let outcome = h.manager.create_order(buy("restart-1")).await;

    assert!(!outcome.success);
    assert_eq!(outcome.context.state, OrderState::Rejected);
    assert_eq!(
        outcome
            .context
            .metadata
            .get("existing_order_id")
            .and_then(|v| v.as_str()),
        Some(first_id.as_str())
    );
    assert!(h.gateway.placed_orders().is_empty(), "no second submission");

    h.stop().await;
    store.close().await;
}

#[tokio::test]
async fn submission_fails_fast_while_the_gateway_is_down() {
    let h = Harness::start_with(
        Arc::new(InMemoryOrderStore::new()),
        ConnectorSettings {
            // Keep the connector in `reconnecting` for the whole test.
            reconnect: ReconnectConfig::new(Duration::from_secs(10), Duration::from_secs(10), 2.0, 1),
            ..settings()
        },
    )
    .await;

    h.gateway.drop_connection("network unreachable");
    for _ in 0..50 {
        if h.connector.connection_state() == ConnectionState::Reconnecting {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(h.connector.connection_state(), ConnectionState::Reconnecting);

    let started = tokio::time::Instant::now();
    let outcome = h.manager.create_order(buy("flow-down")).await;

    assert!(started.elapsed() < Duration::from_millis(100), "must not wait for the gateway");
    assert!(!outcome.success);
    assert_eq!(outcome.context.state, OrderState::Failed);
    assert!(h.gateway.placed_orders().is_empty());

    h.stop().await;
}

#[tokio::test]
async fn halted_symbol_is_rejected_at_validation() {
    let h = Harness::start(Arc::new(InMemoryOrderStore::new())).await;
    h.board.set_halted("AAPL", true);

    let outcome = h.manager.create_order(buy("flow-halted")).await;

    assert!(!outcome.success);
    assert_eq!(outcome.context.state, OrderState::Rejected);
    assert!(
        outcome
            .context
            .errors
            .iter()
            .any(|e| e.class == ErrorClass::Validation && e.message.contains("halted"))
    );
    assert!(h.gateway.placed_orders().is_empty());

    h.stop().await;
}

#[tokio::test]
async fn fills_count_against_the_per_symbol_trade_limit() {
    let h = Harness::start_with_risk(
        Arc::new(InMemoryOrderStore::new()),
        risk_with(|r| r.limits.max_trades_per_symbol_per_day = 1),
    )
    .await;

    let first = h.manager.create_order(buy("pdt-1")).await;
    assert!(first.success, "{:?}", first.context.errors);
    h.wait_for_state(&first.context.correlation_id, OrderState::Filled).await;

    let second = h.manager.create_order(buy("pdt-2")).await;

    assert!(!second.success);
    assert_eq!(second.context.state, OrderState::Rejected);
    assert!(violations(&second.context).contains(&"PATTERN_DAY_TRADE".to_string()));
    assert!(second.context.errors.iter().any(|e| e.class == ErrorClass::RiskRejected));
    assert_eq!(h.gateway.placed_orders().len(), 1);

    h.stop().await;
}

#[tokio::test]
async fn placements_count_against_the_daily_order_limit() {
    let h = Harness::start_with_risk(
        Arc::new(InMemoryOrderStore::new()),
        risk_with(|r| {
            r.limits.max_orders_per_day = 2;
            r.limits.max_trades_per_symbol_per_day = 10;
        }),
    )
    .await;

    for key in ["daily-1", "daily-2"] {
        let outcome = h.manager.create_order(buy(key)).await;
        assert!(outcome.success, "{key}: {:?}", outcome.context.errors);
    }
    let third = h.manager.create_order(buy("daily-3")).await;

    assert!(!third.success);
    assert_eq!(third.context.state, OrderState::Rejected);
    assert!(violations(&third.context).contains(&"DAILY_ORDER_LIMIT".to_string()));
    assert_eq!(h.gateway.placed_orders().len(), 2);

    h.stop().await;
}

#[tokio::test]
async fn filled_position_can_be_sold_and_leaves_the_ledger_flat() {
    let h = Harness::start(Arc::new(InMemoryOrderStore::new())).await;

    let bought = h.manager.create_order(buy("round-trip-buy")).await;
    assert!(bought.success, "{:?}", bought.context.errors);
    h.wait_for_state(&bought.context.correlation_id, OrderState::Filled).await;

    let positions = h.portfolio.positions().await.unwrap();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].quantity, dec!(10));

    // Exits carry no stop-loss.
    let sell = OrderRequest::market("AAPL", OrderSide::Sell, dec!(10), "round-trip-sell");
    let sold = h.manager.create_order(sell).await;
    assert!(sold.success, "sell should be accepted: {:?}", sold.context.errors);
    h.wait_for_state(&sold.context.correlation_id, OrderState::Filled).await;

    assert!(h.portfolio.positions().await.unwrap().is_empty());
    let trades = h.portfolio.trades_since(chrono::DateTime::UNIX_EPOCH).await.unwrap();
    assert_eq!(trades.len(), 2);
    assert_eq!(trades[1].side, OrderSide::Sell);

    h.stop().await;
}

#[tokio::test]
async fn unacknowledged_order_is_not_placed_again_on_resubmission() {
    let h = Harness::start(Arc::new(InMemoryOrderStore::new())).await;
    h.gateway.hold_orders(true);

    let first = h.manager.create_order(buy("flow-unacked")).await;
    assert!(!first.success);
    assert_eq!(first.context.state, OrderState::Failed);
    assert!(first.context.gateway_order_id.is_some());

    let row = h
        .store
        .find_by_idempotency_key(&"flow-unacked".into())
        .await
        .unwrap()
        .expect("an order the gateway holds keeps its row");
    assert_eq!(row.gateway_order_id, first.context.gateway_order_id);

    h.gateway.hold_orders(false);
    let second = h.manager.create_order(buy("flow-unacked")).await;

    assert!(!second.success);
    assert_eq!(second.context.state, OrderState::Rejected);
    assert_eq!(
        second
            .context
            .metadata
            .get("existing_order_id")
            .and_then(|v| v.as_str()),
        Some(first.context.correlation_id.as_str())
    );
    assert_eq!(h.gateway.placed_orders().len(), 1);

    h.stop().await;
}
