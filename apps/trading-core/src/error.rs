//! Error taxonomy shared across the trading core.
//!
//! Module-level failures are typed `thiserror` enums that live next to the
//! code raising them. This module carries the cross-cutting classification
//! used when those failures are recorded on an order context or in the
//! connection's error history.
//!
//! | Class | Surfaced to caller | Retried |
//! |-------|--------------------|---------|
//! | `VALIDATION` | yes, synchronously | no |
//! | `RISK_REJECTED` | yes, with reasons | no |
//! | `GATEWAY` | only when retries are exhausted | connection level |
//! | `CRITICAL_GATEWAY` | no | reconnect |
//! | `PERSISTENCE` | flagged on the order | no |
//! | `INTERNAL` | order moves to `failed` | no |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of a failure by how it must be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorClass {
    /// Malformed or policy-violating request. Never reaches the gateway.
    Validation,
    /// Well-formed request rejected by risk gating.
    RiskRejected,
    /// Transient gateway or network failure.
    Gateway,
    /// Connection-loss class gateway failure. Triggers reconnection.
    CriticalGateway,
    /// Durable storage failure.
    Persistence,
    /// Unexpected internal fault.
    Internal,
}

impl ErrorClass {
    /// Stable reason string for logs and serialized records.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION",
            Self::RiskRejected => "RISK_REJECTED",
            Self::Gateway => "GATEWAY",
            Self::CriticalGateway => "CRITICAL_GATEWAY",
            Self::Persistence => "PERSISTENCE",
            Self::Internal => "INTERNAL",
        }
    }

    /// Whether the connection layer retries this class of failure.
    #[must_use]
    pub const fn is_retried(&self) -> bool {
        matches!(self, Self::Gateway | Self::CriticalGateway)
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason())
    }
}

/// A timestamped error entry.
///
/// Stored in the connection's bounded error history and in an order
/// context's error list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// How the failure is handled.
    pub class: ErrorClass,
    /// Human-readable message.
    pub message: String,
    /// Gateway error code, when the gateway supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    /// When the failure was recorded.
    pub occurred_at: DateTime<Utc>,
}

impl ErrorRecord {
    /// Create a record stamped with the current time.
    #[must_use]
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            code: None,
            occurred_at: Utc::now(),
        }
    }

    /// Attach a gateway error code.
    #[must_use]
    pub const fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }
}

impl std::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "[{}:{code}] {}", self.class.reason(), self.message),
            None => write!(f, "[{}] {}", self.class.reason(), self.message),
        }
    }
}
