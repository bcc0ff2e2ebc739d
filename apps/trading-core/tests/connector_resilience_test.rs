//! Connection resilience of the gateway connector against the paper
//! gateway: reconnection, backoff, fail-fast and heartbeat monitoring.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};
use trading_core::application::ports::{ConnectorError, OrderRouter};
use trading_core::domain::connection::{ConnectionState, OrderUpdate};
use trading_core::domain::order::{OrderRequest, OrderSide};
use trading_core::error::ErrorClass;
use trading_core::infrastructure::gateway::{
    ConnectorSettings, MonitorConfig, PaperGateway, PaperGatewayConfig, ReconnectConfig,
    ResilientConnector,
};
use trading_core::infrastructure::persistence::InMemoryOrderStore;

type Connector = ResilientConnector<PaperGateway, InMemoryOrderStore>;

const fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn settings() -> ConnectorSettings {
    ConnectorSettings {
        connect: ReconnectConfig::new(ms(5), ms(20), 2.0, 3),
        reconnect: ReconnectConfig::new(ms(20), ms(200), 2.0, 5),
        request_timeout: ms(100),
        ack_poll_interval: ms(5),
        ..ConnectorSettings::default()
    }
}

fn start(settings: ConnectorSettings) -> (Arc<PaperGateway>, Arc<Connector>, mpsc::Receiver<OrderUpdate>) {
    let (gateway, events) = PaperGateway::new(PaperGatewayConfig {
        auto_fill: false,
        latency_jitter: Duration::ZERO,
        ..PaperGatewayConfig::default()
    });
    gateway.set_price("AAPL", dec!(150));
    let (connector, updates) = ResilientConnector::new(
        Arc::clone(&gateway),
        Arc::new(InMemoryOrderStore::new()),
        events,
        settings,
    );
    (gateway, connector, updates)
}

async fn wait_until(what: &str, timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(ms(5)).await;
    }
}

#[tokio::test]
async fn critical_error_triggers_exactly_one_reconnect() {
    let (gateway, connector, _updates) = start(settings());
    assert_ok!(connector.connect().await);
    let before = connector.health_snapshot();

    // A burst of connectivity errors is one outage.
    gateway.emit_error(1100, "Connectivity between IB and TWS has been lost");
    gateway.emit_error(1100, "Connectivity between IB and TWS has been lost");
    gateway.emit_error(504, "Not connected");

    wait_until("reconnection", Duration::from_secs(2), || {
        connector.health_snapshot().total_reconnects == before.total_reconnects + 1
    })
    .await;
    tokio::time::sleep(ms(100)).await;

    let after = connector.health_snapshot();
    assert_eq!(after.state, ConnectionState::Connected);
    assert_eq!(after.total_reconnects, before.total_reconnects + 1);
    assert_eq!(after.reconnect_cycles, before.reconnect_cycles + 1);
    assert_eq!(gateway.connect_calls(), 2);
    assert!(
        after
            .recent_errors
            .iter()
            .any(|e| e.class == ErrorClass::CriticalGateway && e.code == Some(1100))
    );

    connector.disconnect().await;
}

#[tokio::test]
async fn non_critical_error_is_recorded_without_reconnecting() {
    let (gateway, connector, _updates) = start(settings());
    assert_ok!(connector.connect().await);

    gateway.emit_error(2104, "Market data farm connection is OK");
    wait_until("error recorded", Duration::from_secs(1), || {
        connector
            .health_snapshot()
            .recent_errors
            .iter()
            .any(|e| e.code == Some(2104))
    })
    .await;

    let health = connector.health_snapshot();
    assert_eq!(health.state, ConnectionState::Connected);
    assert_eq!(health.reconnect_cycles, 0);
    assert_eq!(gateway.connect_calls(), 1);

    connector.disconnect().await;
}

#[tokio::test]
async fn reconnection_backs_off_between_attempts() {
    let (gateway, connector, _updates) = start(settings());
    assert_ok!(connector.connect().await);

    // Refuse the first two attempts: delays of 20ms, 40ms, then 80ms before success.
    gateway.fail_next_connects(2);
    let started = Instant::now();
    gateway.drop_connection("socket closed");

    wait_until("reconnection", Duration::from_secs(2), || {
        connector.health_snapshot().total_reconnects == 1
    })
    .await;

    assert!(started.elapsed() >= ms(140), "backoff too short: {:?}", started.elapsed());
    assert_eq!(gateway.connect_calls(), 4);
    let health = connector.health_snapshot();
    assert_eq!(health.state, ConnectionState::Connected);
    assert_eq!(health.consecutive_reconnects, 0);

    connector.disconnect().await;
}

#[tokio::test]
async fn reconnection_gives_up_into_error_state() {
    let (gateway, connector, _updates) = start(ConnectorSettings {
        reconnect: ReconnectConfig::new(ms(5), ms(10), 2.0, 3),
        ..settings()
    });
    assert_ok!(connector.connect().await);

    gateway.fail_next_connects(10);
    gateway.drop_connection("socket closed");

    wait_until("error state", Duration::from_secs(2), || {
        connector.connection_state() == ConnectionState::Error
    })
    .await;
    assert_eq!(gateway.connect_calls(), 1 + 3);
    assert!(
        connector
            .health_snapshot()
            .recent_errors
            .iter()
            .any(|e| e.message.contains("abandoned"))
    );

    // A later explicit connect starts over.
    gateway.fail_next_connects(0);
    assert_ok!(connector.connect().await);
    assert_eq!(connector.connection_state(), ConnectionState::Connected);

    connector.disconnect().await;
}

#[tokio::test]
async fn requests_fail_fast_while_reconnecting() {
    let (gateway, connector, _updates) = start(ConnectorSettings {
        reconnect: ReconnectConfig::new(Duration::from_secs(10), Duration::from_secs(10), 2.0, 1),
        ..settings()
    });
    assert_ok!(connector.connect().await);
    gateway.drop_connection("socket closed");
    wait_until("reconnecting", Duration::from_secs(1), || {
        connector.connection_state() == ConnectionState::Reconnecting
    })
    .await;

    let request = OrderRequest::market("AAPL", OrderSide::Buy, dec!(10), "rs-1");
    let started = Instant::now();
    let Err(err) = connector.submit_order(&request).await else {
        panic!("submission must fail while reconnecting");
    };

    assert!(started.elapsed() < ms(50));
    assert_eq!(
        err,
        ConnectorError::NotConnected {
            state: ConnectionState::Reconnecting
        }
    );
    assert!(gateway.placed_orders().is_empty());
    assert!(connector.get_market_data("AAPL").await.is_err());
    assert!(connector.account_snapshot().await.is_err());

    connector.disconnect().await;
}

#[tokio::test]
async fn stale_heartbeat_triggers_reconnect() {
    let (gateway, connector, _updates) = start(ConnectorSettings {
        request_timeout: ms(15),
        monitors: MonitorConfig {
            heartbeat_interval: ms(20),
            health_check_interval: ms(40),
            stale_after: ms(60),
        },
        ..settings()
    });
    assert_ok!(connector.connect().await);

    // Pings hang, so heartbeats stop landing.
    gateway.set_unresponsive(true);
    wait_until("stale heartbeat detection", Duration::from_secs(2), || {
        connector.health_snapshot().reconnect_cycles >= 1
    })
    .await;
    gateway.set_unresponsive(false);

    wait_until("recovery", Duration::from_secs(2), || {
        connector.connection_state() == ConnectionState::Connected
            && connector.health_snapshot().total_reconnects >= 1
    })
    .await;
    let health = connector.health_snapshot();
    assert!(health.recent_errors.iter().any(|e| e.message.contains("heartbeat")));

    connector.disconnect().await;
}

#[tokio::test]
async fn heartbeat_records_latency() {
    let (_gateway, connector, _updates) = start(ConnectorSettings {
        monitors: MonitorConfig {
            heartbeat_interval: ms(10),
            health_check_interval: ms(50),
            stale_after: ms(200),
        },
        ..settings()
    });
    assert_ok!(connector.connect().await);

    wait_until("heartbeat latency", Duration::from_secs(1), || {
        connector.health_snapshot().latency_ms.is_some()
    })
    .await;
    assert!(connector.health_snapshot().last_heartbeat.is_some());

    connector.disconnect().await;
}

#[tokio::test]
async fn closed_connector_refuses_to_reconnect() {
    let (gateway, connector, _updates) = start(settings());
    assert_ok!(connector.connect().await);
    connector.disconnect().await;

    assert!(!connector.schedule_reconnect("late error"));
    gateway.emit_error(1100, "Connectivity lost");
    tokio::time::sleep(ms(50)).await;

    assert_eq!(connector.connection_state(), ConnectionState::Closed);
    assert_eq!(gateway.connect_calls(), 1);
    let err = assert_err!(connector.connect().await);
    assert!(matches!(err, ConnectorError::NotConnected { .. }));
}
