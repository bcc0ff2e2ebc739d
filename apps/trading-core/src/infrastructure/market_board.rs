//! Market board: last prices, halted symbols and the trading session.
//!
//! Fed from market snapshots fetched through the connector (or set
//! directly in paper mode and tests) and read synchronously by order
//! validation.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::application::ports::{MarketContext, MarketSnapshot};

/// Regular trading hours, evaluated in UTC on weekdays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradingSession {
    open: NaiveTime,
    close: NaiveTime,
    always_open: bool,
}

impl TradingSession {
    /// Session open from `open` (inclusive) to `close` (exclusive) on weekdays.
    #[must_use]
    pub const fn new(open: NaiveTime, close: NaiveTime) -> Self {
        Self {
            open,
            close,
            always_open: false,
        }
    }

    /// A session that never closes.
    #[must_use]
    pub const fn always_open() -> Self {
        Self {
            open: NaiveTime::MIN,
            close: NaiveTime::MIN,
            always_open: true,
        }
    }

    /// Whether the session is open at `at`.
    #[must_use]
    pub fn is_open(&self, at: DateTime<Utc>) -> bool {
        if self.always_open {
            return true;
        }
        if matches!(at.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let time = at.time();
        time >= self.open && time < self.close
    }
}

#[derive(Debug, Default)]
struct BoardState {
    prices: HashMap<String, Decimal>,
    halted: HashSet<String>,
}

/// In-process market state.
#[derive(Debug)]
pub struct MarketBoard {
    session: TradingSession,
    state: RwLock<BoardState>,
}

impl MarketBoard {
    /// Create an empty board for `session`.
    #[must_use]
    pub fn new(session: TradingSession) -> Self {
        Self {
            session,
            state: RwLock::new(BoardState::default()),
        }
    }

    /// Record a last price.
    pub fn set_price(&self, ticker: impl Into<String>, price: Decimal) {
        self.state.write().prices.insert(ticker.into(), price);
    }

    /// Mark a symbol halted or resumed.
    pub fn set_halted(&self, ticker: impl Into<String>, halted: bool) {
        let ticker = ticker.into();
        let mut state = self.state.write();
        if halted {
            state.halted.insert(ticker);
        } else {
            state.halted.remove(&ticker);
        }
    }

    /// Record a snapshot. The last price falls back to the bid/ask midpoint.
    pub fn apply_snapshot(&self, snapshot: &MarketSnapshot) {
        let price = snapshot.last.or_else(|| match (snapshot.bid, snapshot.ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        });
        if let Some(price) = price {
            self.set_price(snapshot.ticker.clone(), price);
        }
        self.set_halted(snapshot.ticker.clone(), snapshot.halted);
    }
}

impl MarketContext for MarketBoard {
    fn last_price(&self, ticker: &str) -> Option<Decimal> {
        self.state.read().prices.get(ticker).copied()
    }

    fn is_halted(&self, ticker: &str) -> bool {
        self.state.read().halted.contains(ticker)
    }

    fn is_market_open(&self, at: DateTime<Utc>) -> bool {
        self.session.is_open(at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn session() -> TradingSession {
        TradingSession::new(
            NaiveTime::from_hms_opt(13, 30, 0).unwrap(),
            NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
        )
    }

    #[test]
    fn session_hours_on_weekdays_only() {
        let s = session();
        // 2025-06-04 is a Wednesday
        assert!(s.is_open(Utc.with_ymd_and_hms(2025, 6, 4, 14, 0, 0).unwrap()));
        assert!(s.is_open(Utc.with_ymd_and_hms(2025, 6, 4, 13, 30, 0).unwrap()));
        assert!(!s.is_open(Utc.with_ymd_and_hms(2025, 6, 4, 20, 0, 0).unwrap()));
        assert!(!s.is_open(Utc.with_ymd_and_hms(2025, 6, 4, 9, 0, 0).unwrap()));
        // Saturday
        assert!(!s.is_open(Utc.with_ymd_and_hms(2025, 6, 7, 14, 0, 0).unwrap()));
        assert!(TradingSession::always_open().is_open(Utc.with_ymd_and_hms(2025, 6, 7, 3, 0, 0).unwrap()));
    }

    #[test]
    fn snapshot_updates_price_and_halt() {
        let board = MarketBoard::new(TradingSession::always_open());
        board.apply_snapshot(&MarketSnapshot {
            ticker: "AAPL".to_string(),
            last: None,
            bid: Some(dec!(149.90)),
            ask: Some(dec!(150.10)),
            volume: dec!(1000),
            halted: true,
            at: Utc::now(),
        });

        assert_eq!(board.last_price("AAPL"), Some(dec!(150.00)));
        assert!(board.is_halted("AAPL"));

        board.set_halted("AAPL", false);
        assert!(!board.is_halted("AAPL"));
        assert_eq!(board.last_price("MSFT"), None);
    }
}
