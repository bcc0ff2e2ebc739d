//! Strongly-typed identifiers for domain entities.
//!
//! These prevent mixing up IDs from different contexts, e.g. passing a
//! gateway-assigned id where an idempotency key is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier from a string.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Generate a new unique identifier using UUID v4.
            #[must_use]
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// Get the inner string value.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

define_id!(OrderId, "Identifier of a persisted order row.");
define_id!(
    CorrelationId,
    "Internally generated id tying together everything about one order attempt."
);
define_id!(GatewayOrderId, "Order id assigned by the brokerage gateway.");
define_id!(
    IdempotencyKey,
    "Client-generated token that collapses duplicate submissions of one logical order."
);
define_id!(SignalId, "Reference to the upstream signal that produced an order.");
define_id!(ExecutionId, "Gateway-assigned id of a single execution (fill).");

impl IdempotencyKey {
    /// Derive the key of a bracket child leg from its parent's key.
    ///
    /// Child keys stay unique under the storage constraint while remaining
    /// traceable to the parent.
    #[must_use]
    pub fn child(&self, leg: &str) -> Self {
        Self(format!("{}:{leg}", self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_id_generate_is_unique() {
        let id1 = CorrelationId::generate();
        let id2 = CorrelationId::generate();
        assert_ne!(id1, id2);
    }

    #[test]
    fn gateway_order_id_display() {
        let id = GatewayOrderId::new("1042");
        assert_eq!(id.as_str(), "1042");
        assert_eq!(format!("{id}"), "1042");
    }

    #[test]
    fn idempotency_key_from_str_and_into_inner() {
        let key: IdempotencyKey = "K1".into();
        assert_eq!(key.clone().into_inner(), "K1");
        assert_eq!(key, IdempotencyKey::new(String::from("K1")));
    }

    #[test]
    fn idempotency_key_child_is_distinct_and_traceable() {
        let key = IdempotencyKey::new("K1");
        let stop = key.child("stop_loss");
        let target = key.child("take_profit");

        assert_eq!(stop.as_str(), "K1:stop_loss");
        assert_ne!(stop, target);
        assert!(target.as_str().starts_with(key.as_str()));
    }

    #[test]
    fn ids_serialize_transparently() {
        let id = OrderId::new("ord-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"ord-1\"");

        let parsed: OrderId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }
}
