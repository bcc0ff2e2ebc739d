//! Order request value object.
//!
//! An `OrderRequest` is what upstream signal generation hands to the order
//! lifecycle manager. It is immutable once built; the manager never edits
//! it, only annotates the surrounding context.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::errors::OrderRequestError;
use crate::domain::shared::{IdempotencyKey, SignalId};

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    /// Buy order.
    Buy,
    /// Sell order.
    Sell,
}

impl OrderSide {
    /// Returns the opposite side.
    #[must_use]
    pub const fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Order kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderKind {
    /// Execute at the best available price.
    Market,
    /// Execute at the limit price or better.
    Limit,
    /// Becomes a market order once the stop price trades.
    Stop,
    /// Becomes a limit order once the stop price trades.
    StopLimit,
    /// Entry order with attached stop-loss and take-profit children.
    Bracket,
}

impl OrderKind {
    /// Whether this kind carries a limit price.
    #[must_use]
    pub const fn requires_limit_price(&self) -> bool {
        matches!(self, Self::Limit | Self::StopLimit)
    }

    /// Whether this kind carries a stop price.
    #[must_use]
    pub const fn requires_stop_price(&self) -> bool {
        matches!(self, Self::Stop | Self::StopLimit)
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Market => write!(f, "MARKET"),
            Self::Limit => write!(f, "LIMIT"),
            Self::Stop => write!(f, "STOP"),
            Self::StopLimit => write!(f, "STOP_LIMIT"),
            Self::Bracket => write!(f, "BRACKET"),
        }
    }
}

/// Time-in-force instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeInForce {
    /// Valid for the trading day.
    #[default]
    Day,
    /// Good till cancelled.
    Gtc,
    /// Immediate or cancel.
    Ioc,
    /// Fill or kill.
    Fok,
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Day => write!(f, "DAY"),
            Self::Gtc => write!(f, "GTC"),
            Self::Ioc => write!(f, "IOC"),
            Self::Fok => write!(f, "FOK"),
        }
    }
}

/// A prospective order produced upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Ticker symbol.
    pub ticker: String,
    /// Buy or sell.
    pub side: OrderSide,
    /// Whole number of shares.
    pub quantity: Decimal,
    /// Order kind.
    pub kind: OrderKind,
    /// Limit price (LIMIT, STOP_LIMIT, or the entry of a BRACKET).
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    /// Stop trigger price (STOP, STOP_LIMIT).
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    /// Protective stop-loss price.
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    /// Profit target price.
    #[serde(default)]
    pub take_profit: Option<Decimal>,
    /// Time in force.
    #[serde(default)]
    pub time_in_force: TimeInForce,
    /// Client-generated, unique per logical order.
    pub idempotency_key: IdempotencyKey,
    /// Originating signal.
    #[serde(default)]
    pub signal_id: Option<SignalId>,
    /// Signal confidence in [0, 100], used for position sizing.
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl OrderRequest {
    /// Create a market order request.
    #[must_use]
    pub fn market(
        ticker: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        idempotency_key: impl Into<IdempotencyKey>,
    ) -> Self {
        Self {
            ticker: ticker.into(),
            side,
            quantity,
            kind: OrderKind::Market,
            limit_price: None,
            stop_price: None,
            stop_loss: None,
            take_profit: None,
            time_in_force: TimeInForce::Day,
            idempotency_key: idempotency_key.into(),
            signal_id: None,
            confidence: None,
        }
    }

    /// Create a limit order request.
    #[must_use]
    pub fn limit(
        ticker: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        limit_price: Decimal,
        idempotency_key: impl Into<IdempotencyKey>,
    ) -> Self {
        Self {
            kind: OrderKind::Limit,
            limit_price: Some(limit_price),
            ..Self::market(ticker, side, quantity, idempotency_key)
        }
    }

    /// Create a stop order request.
    #[must_use]
    pub fn stop(
        ticker: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        stop_price: Decimal,
        idempotency_key: impl Into<IdempotencyKey>,
    ) -> Self {
        Self {
            kind: OrderKind::Stop,
            stop_price: Some(stop_price),
            ..Self::market(ticker, side, quantity, idempotency_key)
        }
    }

    /// Create a bracket request: limit entry with stop-loss and take-profit.
    #[must_use]
    pub fn bracket(
        ticker: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        entry_price: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
        idempotency_key: impl Into<IdempotencyKey>,
    ) -> Self {
        Self {
            kind: OrderKind::Bracket,
            limit_price: Some(entry_price),
            stop_loss: Some(stop_loss),
            take_profit: Some(take_profit),
            ..Self::market(ticker, side, quantity, idempotency_key)
        }
    }

    /// Attach a protective stop-loss.
    #[must_use]
    pub const fn with_stop_loss(mut self, stop_loss: Decimal) -> Self {
        self.stop_loss = Some(stop_loss);
        self
    }

    /// Attach the originating signal.
    #[must_use]
    pub fn with_signal(mut self, signal_id: impl Into<SignalId>, confidence: f64) -> Self {
        self.signal_id = Some(signal_id.into());
        self.confidence = Some(confidence);
        self
    }

    /// Set time in force.
    #[must_use]
    pub const fn with_time_in_force(mut self, time_in_force: TimeInForce) -> Self {
        self.time_in_force = time_in_force;
        self
    }

    /// Whether the request is submitted as parent + stop + target.
    #[must_use]
    pub const fn is_bracket(&self) -> bool {
        self.stop_loss.is_some() && self.take_profit.is_some()
    }

    /// The price the request itself names, if any (limit first, then stop).
    #[must_use]
    pub fn stated_price(&self) -> Option<Decimal> {
        self.limit_price.or(self.stop_price)
    }

    /// Check the structural invariants of the request.
    ///
    /// Policy checks (trading hours, positions, halts) are not done here;
    /// they need market and portfolio context.
    pub fn validate(&self, max_quantity: Decimal) -> Result<(), OrderRequestError> {
        if self.ticker.trim().is_empty() {
            return Err(OrderRequestError::EmptyTicker);
        }
        if self.quantity <= Decimal::ZERO {
            return Err(OrderRequestError::NonPositiveQuantity(self.quantity));
        }
        if !self.quantity.fract().is_zero() {
            return Err(OrderRequestError::FractionalQuantity(self.quantity));
        }
        if self.quantity > max_quantity {
            return Err(OrderRequestError::QuantityAboveCap {
                quantity: self.quantity,
                cap: max_quantity,
            });
        }
        if self.kind.requires_limit_price() && self.limit_price.is_none() {
            return Err(OrderRequestError::MissingLimitPrice(self.kind));
        }
        if self.kind.requires_stop_price() && self.stop_price.is_none() {
            return Err(OrderRequestError::MissingStopPrice(self.kind));
        }

        for (field, price) in [
            ("limit_price", self.limit_price),
            ("stop_price", self.stop_price),
            ("stop_loss", self.stop_loss),
            ("take_profit", self.take_profit),
        ] {
            if let Some(value) = price
                && value <= Decimal::ZERO
            {
                return Err(OrderRequestError::NonPositivePrice { field, value });
            }
        }

        if self.kind == OrderKind::Bracket && !self.is_bracket() {
            return Err(OrderRequestError::InvalidBracket(
                "bracket orders need both stop_loss and take_profit".to_string(),
            ));
        }

        if let (Some(stop_loss), Some(take_profit)) = (self.stop_loss, self.take_profit) {
            let ordered = match self.side {
                OrderSide::Buy => stop_loss < take_profit,
                OrderSide::Sell => stop_loss > take_profit,
            };
            if !ordered {
                return Err(OrderRequestError::InvalidBracket(format!(
                    "{} bracket needs stop_loss {} on the losing side of take_profit {}",
                    self.side, stop_loss, take_profit
                )));
            }
            if let Some(entry) = self.limit_price {
                let inside = match self.side {
                    OrderSide::Buy => stop_loss < entry && entry < take_profit,
                    OrderSide::Sell => take_profit < entry && entry < stop_loss,
                };
                if !inside {
                    return Err(OrderRequestError::InvalidBracket(format!(
                        "entry {entry} must lie between stop_loss {stop_loss} and take_profit {take_profit}"
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const CAP: Decimal = dec!(10000);

    #[test]
    fn test_market_request_is_valid() {
        let request = OrderRequest::market("AAPL", OrderSide::Buy, dec!(100), "K1");
        assert!(request.validate(CAP).is_ok());
        assert!(!request.is_bracket());
        assert_eq!(request.stated_price(), None);
    }

    #[test]
    fn test_limit_requires_limit_price() {
        let mut request = OrderRequest::limit("AAPL", OrderSide::Buy, dec!(10), dec!(150), "K1");
        request.limit_price = None;

        let Err(err) = request.validate(CAP) else {
            panic!("limit order without price should fail");
        };
        assert_eq!(err, OrderRequestError::MissingLimitPrice(OrderKind::Limit));
    }

    #[test]
    fn test_stop_kinds_require_stop_price() {
        let mut request = OrderRequest::stop("AAPL", OrderSide::Sell, dec!(10), dec!(140), "K1");
        assert!(request.validate(CAP).is_ok());

        request.kind = OrderKind::StopLimit;
        request.limit_price = Some(dec!(139));
        request.stop_price = None;
        assert_eq!(
            request.validate(CAP),
            Err(OrderRequestError::MissingStopPrice(OrderKind::StopLimit))
        );
    }

    #[test]
    fn test_quantity_must_be_positive_whole_and_capped() {
        let request = OrderRequest::market("AAPL", OrderSide::Buy, dec!(0), "K1");
        assert!(matches!(
            request.validate(CAP),
            Err(OrderRequestError::NonPositiveQuantity(_))
        ));

        let request = OrderRequest::market("AAPL", OrderSide::Buy, dec!(1.5), "K1");
        assert!(matches!(
            request.validate(CAP),
            Err(OrderRequestError::FractionalQuantity(_))
        ));

        let request = OrderRequest::market("AAPL", OrderSide::Buy, dec!(10001), "K1");
        assert!(matches!(
            request.validate(CAP),
            Err(OrderRequestError::QuantityAboveCap { .. })
        ));
    }

    #[test]
    fn test_empty_ticker_rejected() {
        let request = OrderRequest::market("  ", OrderSide::Buy, dec!(1), "K1");
        assert_eq!(request.validate(CAP), Err(OrderRequestError::EmptyTicker));
    }

    #[test]
    fn test_bracket_price_ordering() {
        let request = OrderRequest::bracket(
            "AAPL",
            OrderSide::Buy,
            dec!(100),
            dec!(150),
            dec!(145),
            dec!(160),
            "K1",
        );
        assert!(request.validate(CAP).is_ok());
        assert!(request.is_bracket());

        let inverted = OrderRequest::bracket(
            "AAPL",
            OrderSide::Buy,
            dec!(100),
            dec!(150),
            dec!(160),
            dec!(145),
            "K2",
        );
        assert!(matches!(
            inverted.validate(CAP),
            Err(OrderRequestError::InvalidBracket(_))
        ));

        let short = OrderRequest::bracket(
            "AAPL",
            OrderSide::Sell,
            dec!(100),
            dec!(150),
            dec!(155),
            dec!(140),
            "K3",
        );
        assert!(short.validate(CAP).is_ok());
    }

    #[test]
    fn test_entry_outside_bracket_rejected() {
        let request = OrderRequest::bracket(
            "AAPL",
            OrderSide::Buy,
            dec!(100),
            dec!(170),
            dec!(145),
            dec!(160),
            "K1",
        );
        assert!(matches!(
            request.validate(CAP),
            Err(OrderRequestError::InvalidBracket(_))
        ));
    }

    #[test]
    fn test_negative_prices_rejected() {
        let request = OrderRequest::market("AAPL", OrderSide::Buy, dec!(1), "K1")
            .with_stop_loss(dec!(-1));
        assert!(matches!(
            request.validate(CAP),
            Err(OrderRequestError::NonPositivePrice {
                field: "stop_loss",
                ..
            })
        ));
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let json = r#"{
            "ticker": "MSFT",
            "side": "SELL",
            "quantity": "25",
            "kind": "MARKET",
            "idempotency_key": "sig-7"
        }"#;
        let request: OrderRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.side, OrderSide::Sell);
        assert_eq!(request.quantity, dec!(25));
        assert_eq!(request.time_in_force, TimeInForce::Day);
        assert!(request.signal_id.is_none());
    }

    #[test]
    fn test_side_and_kind_display() {
        assert_eq!(OrderSide::Buy.to_string(), "BUY");
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderKind::StopLimit.to_string(), "STOP_LIMIT");
        assert_eq!(TimeInForce::Gtc.to_string(), "GTC");
    }
}
