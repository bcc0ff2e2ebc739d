//! Trading session configuration.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::infrastructure::market_board::TradingSession;

/// Regular trading hours in UTC, weekdays only.
///
/// The session is fixed in UTC and does not follow daylight saving. The
/// default 13:30-20:00 matches the US equity session during daylight time;
/// in winter the exchange opens at 14:30 UTC, so set `open_utc: "14:30"` and
/// `close_utc: "21:00"` for that part of the year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session open, `HH:MM` UTC.
    pub open_utc: String,
    /// Session close, `HH:MM` UTC.
    pub close_utc: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            open_utc: "13:30".to_string(),
            close_utc: "20:00".to_string(),
        }
    }
}

impl SessionConfig {
    /// Parse into a trading session.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for malformed times or a
    /// close that is not after the open.
    pub fn to_session(&self) -> Result<TradingSession, ConfigError> {
        let open = parse_time("session.open_utc", &self.open_utc)?;
        let close = parse_time("session.close_utc", &self.close_utc)?;
        if close <= open {
            return Err(ConfigError::ValidationError(
                "session.close_utc must be after session.open_utc".to_string(),
            ));
        }
        Ok(TradingSession::new(open, close))
    }
}

fn parse_time(field: &str, value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|e| ConfigError::ValidationError(format!("{field} '{value}' is not HH:MM: {e}")))
}
