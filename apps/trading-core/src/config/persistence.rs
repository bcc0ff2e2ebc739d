//! Order store configuration.

use serde::{Deserialize, Serialize};

/// Where orders are stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// `memory` for a process-local store, otherwise a SQLite URL such as
    /// `sqlite://./data/orders.db`.
    pub database_url: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_url: "memory".to_string(),
        }
    }
}

impl PersistenceConfig {
    /// Whether orders live in process memory only.
    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.database_url.eq_ignore_ascii_case("memory")
    }
}
