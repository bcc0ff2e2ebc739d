//! Connection Monitors
//!
//! Two periodic tasks keep the gateway session honest: a heartbeat that
//! measures round-trip latency, and a health check that triggers recovery
//! when heartbeats go stale. Both hold only a weak reference to their
//! target, so dropping the connector stops them.

use std::sync::Weak;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Configuration for the monitors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Interval between heartbeat pings.
    pub heartbeat_interval: Duration,
    /// Interval between health checks.
    pub health_check_interval: Duration,
    /// Heartbeat age past which a nominally connected session is presumed dead.
    pub stale_after: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            health_check_interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(120),
        }
    }
}

/// What the monitors drive.
#[async_trait]
pub trait MonitorTarget: Send + Sync + 'static {
    /// Ping the session and record the round trip.
    async fn heartbeat(&self);

    /// Inspect heartbeat age and recover the session if it is stale.
    async fn health_check(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MonitorKind {
    Heartbeat,
    HealthCheck,
}

impl MonitorKind {
    const fn name(self) -> &'static str {
        match self {
            Self::Heartbeat => "heartbeat",
            Self::HealthCheck => "health_check",
        }
    }
}

/// Spawn both monitors. They run until `cancel` fires or the target is dropped.
pub fn spawn_monitors<T: MonitorTarget>(
    target: Weak<T>,
    config: &MonitorConfig,
    cancel: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(run(
            MonitorKind::Heartbeat,
            config.heartbeat_interval,
            target.clone(),
            cancel.clone(),
        )),
        tokio::spawn(run(
            MonitorKind::HealthCheck,
            config.health_check_interval,
            target,
            cancel.clone(),
        )),
    ]
}

async fn run<T: MonitorTarget>(
    kind: MonitorKind,
    period: Duration,
    target: Weak<T>,
    cancel: CancellationToken,
) {
    // First tick one period from now; the session was just (re)established.
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!(monitor = kind.name(), "Monitor cancelled");
                break;
            }
            _ = interval.tick() => {
                let Some(target) = target.upgrade() else {
                    tracing::debug!(monitor = kind.name(), "Monitor target dropped");
                    break;
                };
                match kind {
                    MonitorKind::Heartbeat => target.heartbeat().await,
                    MonitorKind::HealthCheck => target.health_check().await,
                }
            }
        }
    }
}
