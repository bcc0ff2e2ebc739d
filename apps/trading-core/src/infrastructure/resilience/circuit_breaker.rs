//! Circuit breaker for gateway calls.
//!
//! Stops hammering the brokerage gateway once it keeps failing, and tries
//! it again with a single trial call after a cooldown. Independent of the
//! connection state machine: the connector fails fast on a dead connection
//! before the breaker is consulted.
//!
//! # State Machine
//!
//! ```text
//! CLOSED → OPEN       (failure_threshold consecutive failures)
//! OPEN → HALF_OPEN    (cooldown elapsed)
//! HALF_OPEN → CLOSED  (trial call succeeds)
//! HALF_OPEN → OPEN    (trial call fails)
//! ```
//!
//! While half-open exactly one call is admitted; every other caller is
//! rejected until the trial resolves.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::observability::{
    self, circuit_breaker_state, record_circuit_breaker_failure, record_circuit_breaker_rejected,
};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitBreakerState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected.
    Open,
    /// One trial call is admitted.
    HalfOpen,
}

impl CircuitBreakerState {
    const fn gauge_value(self) -> f64 {
        match self {
            Self::Closed => circuit_breaker_state::CLOSED,
            Self::Open => circuit_breaker_state::OPEN,
            Self::HalfOpen => circuit_breaker_state::HALF_OPEN,
        }
    }
}

impl std::fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time spent open before the trial call.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BreakerError<E> {
    /// The circuit is open; the call was not attempted.
    #[error("circuit breaker '{0}' is open")]
    Open(String),
    /// The call ran and failed.
    #[error(transparent)]
    Inner(E),
}

#[derive(Debug)]
struct Inner {
    state: CircuitBreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Circuit breaker for one external service.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    total_calls: AtomicU64,
    total_failures: AtomicU64,
    total_rejected: AtomicU64,
    state_transitions: AtomicU64,
}

impl CircuitBreaker {
    /// Create a closed circuit breaker.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        observability::record_circuit_breaker_state(&name, circuit_breaker_state::CLOSED);
        Self {
            name,
            config,
            inner: Mutex::new(Inner {
                state: CircuitBreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
            state_transitions: AtomicU64::new(0),
        }
    }

    /// Service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration.
    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state, after applying an elapsed cooldown.
    #[must_use]
    pub fn state(&self) -> CircuitBreakerState {
        let mut inner = self.lock();
        self.check_cooldown(&mut inner);
        inner.state
    }

    /// Whether a call would be admitted now. Does not reserve the trial.
    #[must_use]
    pub fn is_call_permitted(&self) -> bool {
        let mut inner = self.lock();
        self.check_cooldown(&mut inner);
        match inner.state {
            CircuitBreakerState::Closed => true,
            CircuitBreakerState::Open => false,
            CircuitBreakerState::HalfOpen => !inner.trial_in_flight,
        }
    }

    /// Admit a call, reserving the half-open trial if that is what admits it.
    ///
    /// Every `true` must be followed by [`record_success`](Self::record_success)
    /// or [`record_failure`](Self::record_failure).
    pub fn try_acquire(&self) -> bool {
        self.acquire().is_some()
    }

    /// `Some(is_trial)` when admitted.
    fn acquire(&self) -> Option<bool> {
        let mut inner = self.lock();
        self.check_cooldown(&mut inner);
        let admitted = match inner.state {
            CircuitBreakerState::Closed => Some(false),
            CircuitBreakerState::Open => None,
            CircuitBreakerState::HalfOpen if inner.trial_in_flight => None,
            CircuitBreakerState::HalfOpen => {
                inner.trial_in_flight = true;
                Some(true)
            }
        };
        drop(inner);

        if admitted.is_none() {
            self.total_rejected.fetch_add(1, Ordering::Relaxed);
            record_circuit_breaker_rejected(&self.name);
        }
        admitted
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        if inner.state == CircuitBreakerState::HalfOpen {
            self.transition(&mut inner, CircuitBreakerState::Closed);
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        record_circuit_breaker_failure(&self.name);

        let mut inner = self.lock();
        match inner.state {
            CircuitBreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitBreakerState::Open);
                }
            }
            CircuitBreakerState::HalfOpen => {
                self.transition(&mut inner, CircuitBreakerState::Open);
            }
            CircuitBreakerState::Open => {
                tracing::warn!(name = %self.name, "Failure recorded while circuit is OPEN");
            }
        }
    }

    /// Run `f` through the breaker.
    ///
    /// Errors for which `is_failure` returns false (e.g. an order refused
    /// on its merits) count as successes: the service answered.
    pub async fn call<T, E, F, Fut>(
        &self,
        f: F,
        is_failure: impl Fn(&E) -> bool,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(is_trial) = self.acquire() else {
            return Err(BreakerError::Open(self.name.clone()));
        };

        let mut trial = TrialGuard {
            breaker: self,
            armed: is_trial,
        };
        let result = f().await;
        trial.armed = false;

        match &result {
            Err(e) if is_failure(e) => self.record_failure(),
            _ => self.record_success(),
        }
        result.map_err(BreakerError::Inner)
    }

    fn check_cooldown(&self, inner: &mut Inner) {
        if inner.state == CircuitBreakerState::Open
            && let Some(opened) = inner.opened_at
            && opened.elapsed() >= self.config.cooldown
        {
            self.transition(inner, CircuitBreakerState::HalfOpen);
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitBreakerState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        inner.trial_in_flight = false;
        match to {
            CircuitBreakerState::Open => inner.opened_at = Some(Instant::now()),
            CircuitBreakerState::Closed => {
                inner.opened_at = None;
                inner.consecutive_failures = 0;
            }
            CircuitBreakerState::HalfOpen => {}
        }
        self.state_transitions.fetch_add(1, Ordering::Relaxed);
        observability::record_circuit_breaker_state(&self.name, to.gauge_value());

        match to {
            CircuitBreakerState::Open => tracing::warn!(
                name = %self.name,
                from = %from,
                to = %to,
                cooldown_secs = self.config.cooldown.as_secs(),
                "Circuit breaker opened"
            ),
            CircuitBreakerState::HalfOpen => tracing::info!(
                name = %self.name,
                from = %from,
                to = %to,
                "Circuit breaker testing"
            ),
            CircuitBreakerState::Closed => tracing::info!(
                name = %self.name,
                from = %from,
                to = %to,
                "Circuit breaker closed"
            ),
        }
    }

    /// Counters and state.
    #[must_use]
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let mut inner = self.lock();
        self.check_cooldown(&mut inner);
        CircuitBreakerMetrics {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
            state_transitions: self.state_transitions.load(Ordering::Relaxed),
        }
    }

    /// Open the circuit now.
    pub fn force_open(&self) {
        let mut inner = self.lock();
        self.transition(&mut inner, CircuitBreakerState::Open);
    }

    /// Close the circuit now.
    pub fn force_close(&self) {
        let mut inner = self.lock();
        self.transition(&mut inner, CircuitBreakerState::Closed);
    }
}

/// Releases the half-open trial if the call future is dropped before it
/// resolves, so a cancelled trial does not wedge the breaker.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.lock().trial_in_flight = false;
        }
    }
}

/// Counters for a circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Service name.
    pub name: String,
    /// Current state.
    pub state: CircuitBreakerState,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Calls that ran.
    pub total_calls: u64,
    /// Calls that failed.
    pub total_failures: u64,
    /// Calls rejected without running.
    pub total_rejected: u64,
    /// State changes.
    pub state_transitions: u64,
}
