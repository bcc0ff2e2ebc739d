//! Passive record of gateway connectivity.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::ConnectionState;
use crate::error::ErrorRecord;

/// Capacity of the recent-error ring buffer.
pub const ERROR_HISTORY_CAPACITY: usize = 100;

/// Connectivity, latency and error history of the gateway connection.
#[derive(Debug, Clone)]
pub struct ConnectionHealth {
    state: ConnectionState,
    last_heartbeat: Option<DateTime<Utc>>,
    last_heartbeat_instant: Option<Instant>,
    consecutive_reconnects: u32,
    total_reconnects: u64,
    reconnect_cycles: u64,
    errors: VecDeque<ErrorRecord>,
    latency_ms: Option<f64>,
    messages_received: u64,
    orders_placed: u64,
    orders_failed: u64,
    connected_since: Option<DateTime<Utc>>,
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionHealth {
    /// Fresh record in `disconnected`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            last_heartbeat: None,
            last_heartbeat_instant: None,
            consecutive_reconnects: 0,
            total_reconnects: 0,
            reconnect_cycles: 0,
            errors: VecDeque::with_capacity(ERROR_HISTORY_CAPACITY),
            latency_ms: None,
            messages_received: 0,
            orders_placed: 0,
            orders_failed: 0,
            connected_since: None,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Move to `next`. Returns false, leaving the state unchanged, if the move is not allowed.
    pub fn set_state(&mut self, next: ConnectionState) -> bool {
        if self.state == next {
            return true;
        }
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        if next == ConnectionState::Reconnecting {
            self.reconnect_cycles += 1;
        }
        if next == ConnectionState::Connected {
            self.connected_since = Some(Utc::now());
            self.consecutive_reconnects = 0;
            // A fresh connection counts as a heartbeat.
            self.record_heartbeat(None);
        } else {
            self.connected_since = None;
        }
        true
    }

    /// Record a heartbeat, with the round-trip latency if it was measured.
    pub fn record_heartbeat(&mut self, latency_ms: Option<f64>) {
        self.last_heartbeat = Some(Utc::now());
        self.last_heartbeat_instant = Some(Instant::now());
        if latency_ms.is_some() {
            self.latency_ms = latency_ms;
        }
    }

    /// Seconds since the last heartbeat, or `None` if there never was one.
    #[must_use]
    pub fn seconds_since_heartbeat(&self) -> Option<u64> {
        self.last_heartbeat_instant.map(|at| at.elapsed().as_secs())
    }

    /// Time since the last heartbeat, or `None` if there never was one.
    #[must_use]
    pub fn since_heartbeat(&self) -> Option<Duration> {
        self.last_heartbeat_instant.map(|at| at.elapsed())
    }

    /// Count a reconnection attempt.
    pub const fn record_reconnect_attempt(&mut self) {
        self.consecutive_reconnects += 1;
    }

    /// Count a successful reconnection.
    pub const fn record_reconnected(&mut self) {
        self.total_reconnects += 1;
    }

    /// Append to the error history, evicting the oldest entry when full.
    pub fn record_error(&mut self, error: ErrorRecord) {
        if self.errors.len() == ERROR_HISTORY_CAPACITY {
            self.errors.pop_front();
        }
        self.errors.push_back(error);
    }

    /// Count an inbound gateway message.
    pub const fn record_message(&mut self) {
        self.messages_received += 1;
    }

    /// Count an accepted order.
    pub const fn record_order_placed(&mut self) {
        self.orders_placed += 1;
    }

    /// Count a failed order.
    pub const fn record_order_failed(&mut self) {
        self.orders_failed += 1;
    }

    /// Reconnection attempts since the last successful connect.
    #[must_use]
    pub const fn consecutive_reconnects(&self) -> u32 {
        self.consecutive_reconnects
    }

    /// Successful reconnections since start.
    #[must_use]
    pub const fn total_reconnects(&self) -> u64 {
        self.total_reconnects
    }

    /// Times the connection entered `reconnecting`.
    #[must_use]
    pub const fn reconnect_cycles(&self) -> u64 {
        self.reconnect_cycles
    }

    /// Last measured round-trip latency.
    #[must_use]
    pub const fn latency_ms(&self) -> Option<f64> {
        self.latency_ms
    }

    /// Recent errors, oldest first.
    pub fn errors(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.errors.iter()
    }

    /// Serializable copy of the record.
    #[must_use]
    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            state: self.state,
            last_heartbeat: self.last_heartbeat,
            latency_ms: self.latency_ms,
            consecutive_reconnects: self.consecutive_reconnects,
            total_reconnects: self.total_reconnects,
            reconnect_cycles: self.reconnect_cycles,
            messages_received: self.messages_received,
            orders_placed: self.orders_placed,
            orders_failed: self.orders_failed,
            connected_since: self.connected_since,
            recent_errors: self.errors.iter().cloned().collect(),
        }
    }
}

/// Point-in-time view of [`ConnectionHealth`] for observability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Connection state.
    pub state: ConnectionState,
    /// Last heartbeat.
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Last measured round-trip latency.
    pub latency_ms: Option<f64>,
    /// Reconnection attempts since the last successful connect.
    pub consecutive_reconnects: u32,
    /// Successful reconnections since start.
    pub total_reconnects: u64,
    /// Times the connection entered `reconnecting`.
    pub reconnect_cycles: u64,
    /// Inbound gateway messages.
    pub messages_received: u64,
    /// Orders accepted by the gateway.
    pub orders_placed: u64,
    /// Orders that failed.
    pub orders_failed: u64,
    /// Start of the current connection.
    pub connected_since: Option<DateTime<Utc>>,
    /// Recent errors, oldest first, at most 100.
    pub recent_errors: Vec<ErrorRecord>,
}
