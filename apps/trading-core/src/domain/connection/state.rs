//! Gateway connection state machine.
//!
//! ```text
//! disconnected → connecting → connected → reconnecting → connected
//!                     │            │            └→ error
//!                     └→ error     └→ disconnected
//! any → closed
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// State of the gateway connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection.
    #[default]
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Connected and usable.
    Connected,
    /// Connection lost, recovery in progress.
    Reconnecting,
    /// Retries exhausted.
    Error,
    /// Shut down on purpose. Final.
    Closed,
}

impl ConnectionState {
    /// Whether `next` may follow `self`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState as S;
        match (self, next) {
            (S::Closed, _) => false,
            (_, S::Closed) => true,
            (S::Disconnected | S::Error, S::Connecting | S::Reconnecting) => true,
            (S::Connecting, S::Connected | S::Error | S::Disconnected) => true,
            (S::Connected, S::Disconnected | S::Reconnecting | S::Error) => true,
            (S::Reconnecting, S::Connected | S::Error | S::Disconnected) => true,
            _ => false,
        }
    }

    /// Whether gateway calls may be issued.
    #[must_use]
    pub const fn is_usable(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Numeric code for the state gauge.
    #[must_use]
    pub const fn gauge_value(self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Connected => 2.0,
            Self::Reconnecting => 3.0,
            Self::Error => 4.0,
            Self::Closed => 5.0,
        }
    }

    /// Snake-case name, as serialized.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
