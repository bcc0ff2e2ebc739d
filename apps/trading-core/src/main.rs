//! Trading Core Binary
//!
//! Runs the order lifecycle manager against the in-process paper gateway.
//! Order requests arrive as newline-delimited JSON on stdin; each outcome is
//! logged as JSON.
//!
//! # Usage
//!
//! ```bash
//! echo '{"ticker":"AAPL","price":"190.00"}
//! {"ticker":"AAPL","side":"BUY","quantity":"10","kind":"MARKET","idempotency_key":"k-1"}' \
//!   | cargo run --bin trading-core
//! ```
//!
//! A line with only `ticker` and `price` sets the paper gateway's price.
//!
//! # Environment Variables
//!
//! - `TRADING_CORE_CONFIG`: config file (default: `config/trading-core.yaml`, optional)
//! - `RUST_LOG`: log filter (default: `trading_core=info`)
//! - `OTEL_ENABLED`: `true` to export spans over OTLP

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use trading_core::application::ports::{OrderStore, PortfolioLedger};
use trading_core::application::services::{OrderLifecycleManager, RiskEngine};
use trading_core::config::{Config, DEFAULT_CONFIG_PATH, load_config};
use trading_core::domain::order::OrderRequest;
use trading_core::infrastructure::gateway::{PaperGateway, PaperGatewayConfig, ResilientConnector};
use trading_core::infrastructure::market_board::MarketBoard;
use trading_core::infrastructure::persistence::{
    InMemoryOrderStore, InMemoryPortfolio, SqliteOrderStore,
};
use trading_core::observability::init_metrics;
use trading_core::telemetry::init_telemetry;

/// Bound on waiting for background tasks at shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// One stdin line.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Input {
    Order(Box<OrderRequest>),
    Quote { ticker: String, price: Decimal },
}

type Manager<S> = OrderLifecycleManager<
    ResilientConnector<PaperGateway, S>,
    S,
    InMemoryPortfolio,
    MarketBoard,
>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    let _telemetry = init_telemetry();

    let config_path =
        std::env::var("TRADING_CORE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = if std::path::Path::new(&config_path).exists() {
        load_config(Some(&config_path))
            .with_context(|| format!("loading config from {config_path}"))?
    } else {
        tracing::info!(path = %config_path, "No config file, using defaults");
        Config::default()
    };

    if let Some(metrics) = config.metrics_config().context("metrics config")? {
        init_metrics(&metrics).context("starting metrics exporter")?;
        tracing::info!(listen_addr = %metrics.listen_addr, "Metrics exporter started");
    }

    if config.persistence.is_in_memory() {
        tracing::info!("Using in-memory order store");
        run(config, config_path, Arc::new(InMemoryOrderStore::new())).await
    } else {
        let store = SqliteOrderStore::connect(&config.persistence.database_url)
            .await
            .with_context(|| format!("opening order store {}", config.persistence.database_url))?;
        let store = Arc::new(store);
        let result = run(config, config_path, Arc::clone(&store)).await;
        store.close().await;
        result
    }
}

async fn run<S: OrderStore + 'static>(
    config: Config,
    config_path: String,
    store: Arc<S>,
) -> anyhow::Result<()> {
    let (gateway, events) = PaperGateway::new(PaperGatewayConfig {
        event_buffer: config.gateway.event_buffer,
        ..PaperGatewayConfig::default()
    });
    let (connector, updates) = ResilientConnector::new(
        Arc::clone(&gateway),
        Arc::clone(&store),
        events,
        config.connector_settings(),
    );
    let portfolio = Arc::new(InMemoryPortfolio::default());
    connector.attach_ledger(Arc::clone(&portfolio) as Arc<dyn PortfolioLedger>);
    connector.connect().await.context("connecting to gateway")?;

    portfolio.set_account(connector.account_snapshot().await.context("reading account")?);
    portfolio.replace_positions(connector.positions().await.context("reading positions")?);
    let start_of_day = Utc::now().date_naive().and_time(NaiveTime::MIN).and_utc();
    let stored = store.all_orders().await.context("reading stored orders")?;
    let counted = portfolio.count_stored_orders(&stored, start_of_day);
    tracing::info!(orders_today = counted, "Daily order count restored");

    let board = Arc::new(MarketBoard::new(
        config.trading_session().context("trading session")?,
    ));
    let risk = Arc::new(RiskEngine::new(Arc::clone(&portfolio), config.risk_settings()));
    let manager: Arc<Manager<S>> = Arc::new(OrderLifecycleManager::new(
        config.order_settings(),
        Arc::clone(&risk),
        Arc::clone(&portfolio),
        store,
        Arc::clone(&connector),
        Arc::clone(&board),
    ));

    let shutdown = CancellationToken::new();
    let updates_task = {
        let manager = Arc::clone(&manager);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { manager.process_updates(updates, shutdown).await })
    };
    let reload_task = tokio::spawn(reload_on_hangup(
        config_path,
        Arc::clone(&risk),
        shutdown.clone(),
    ));

    tracing::info!("Trading core ready, reading order requests from stdin");

    tokio::select! {
        result = read_requests(&manager, &gateway, &connector, &board) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Reading requests failed");
            }
            tracing::info!("Input closed, shutting down");
        }
        () = shutdown_signal() => {}
    }

    shutdown.cancel();
    connector.disconnect().await;
    for task in [updates_task, reload_task] {
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await.is_err() {
            tracing::warn!("Background task did not stop in time");
        }
    }

    let metrics = manager.metrics();
    tracing::info!(
        created = metrics.created,
        filled = metrics.filled,
        rejected = metrics.rejected,
        active = metrics.active,
        "Trading core stopped"
    );
    Ok(())
}

async fn read_requests<S: OrderStore + 'static>(
    manager: &Manager<S>,
    gateway: &PaperGateway,
    connector: &ResilientConnector<PaperGateway, S>,
    board: &MarketBoard,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Input>(line) {
            Ok(Input::Quote { ticker, price }) => {
                gateway.set_price(ticker.clone(), price);
                board.set_price(ticker, price);
            }
            Ok(Input::Order(request)) => {
                match connector.get_market_data(&request.ticker).await {
                    Ok(snapshot) => board.apply_snapshot(&snapshot),
                    Err(e) => {
                        tracing::warn!(ticker = %request.ticker, error = %e, "Market data unavailable");
                    }
                }
                let outcome = manager.create_order(*request).await;
                match serde_json::to_string(&outcome) {
                    Ok(json) => tracing::info!(outcome = %json, success = outcome.success, "Order processed"),
                    Err(e) => tracing::error!(error = %e, "Failed to serialize outcome"),
                }
            }
            Err(e) => tracing::warn!(error = %e, "Ignoring malformed input line"),
        }
    }
    Ok(())
}

/// Reload the risk section from the config file on SIGHUP.
#[cfg(unix)]
async fn reload_on_hangup<P>(path: String, risk: Arc<RiskEngine<P>>, shutdown: CancellationToken)
where
    P: trading_core::application::ports::PortfolioReadModel + 'static,
{
    let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "SIGHUP handler unavailable, risk reload disabled");
            return;
        }
    };
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            received = hangup.recv() => {
                if received.is_none() {
                    break;
                }
                match load_config(Some(&path)) {
                    Ok(config) => {
                        risk.replace_settings(config.risk_settings());
                        tracing::info!(path = %path, "Risk settings reloaded");
                    }
                    Err(e) => tracing::error!(path = %path, error = %e, "Risk reload failed, keeping current settings"),
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup<P>(_path: String, _risk: Arc<RiskEngine<P>>, shutdown: CancellationToken)
where
    P: trading_core::application::ports::PortfolioReadModel + 'static,
{
    shutdown.cancelled().await;
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, initiating shutdown"),
        () = terminate => tracing::info!("Received SIGTERM, initiating shutdown"),
    }
}
