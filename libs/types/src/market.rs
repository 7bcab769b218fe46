//! Market data shapes delivered by exchange connectors
//!
//! These are the unvalidated inbound records. Nothing here enforces
//! domain invariants: a crossed ticker or a negative price is
//! representable so the pipeline can count and report it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::TypesError;
use crate::ids::{ExchangeId, Symbol};
use crate::timeframe::Timeframe;

/// A single OHLCV candle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
    /// Period start, Unix milliseconds, aligned to `timeframe`.
    pub timestamp: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub exchange: ExchangeId,
}

impl Candle {
    /// Lower edge of the candle body.
    pub fn body_low(&self) -> Decimal {
        self.open.min(self.close)
    }

    /// Upper edge of the candle body.
    pub fn body_high(&self) -> Decimal {
        self.open.max(self.close)
    }

    /// Exclusive end of the period this candle covers.
    pub fn end_timestamp(&self) -> i64 {
        self.timestamp.saturating_add(self.timeframe.duration_ms())
    }
}

/// Top-of-book ticker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: Symbol,
    pub exchange: ExchangeId,
    pub price: Decimal,
    pub volume: Decimal,
    pub timestamp: i64,
    pub bid: Decimal,
    pub ask: Decimal,
}

/// One side entry of a book: `[price, size]` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel(pub Decimal, pub Decimal);

impl BookLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self(price, size)
    }

    pub fn price(&self) -> Decimal {
        self.0
    }
}

/// Order book snapshot as received from an exchange.
///
/// Level lists are not assumed to be sorted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub symbol: Symbol,
    pub exchange: ExchangeId,
    pub timestamp: i64,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBookSnapshot {
    /// Highest bid price, if any bids exist.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.iter().map(BookLevel::price).max()
    }

    /// Lowest ask price, if any asks exist.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.iter().map(BookLevel::price).min()
    }
}

/// Aggressor side of a trade.
///
/// Any side string other than `buy`/`sell` decodes to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
    #[serde(other)]
    Unknown,
}

/// A public trade print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: Symbol,
    pub exchange: ExchangeId,
    pub timestamp: i64,
    pub price: Decimal,
    pub quantity: Decimal,
    pub side: TradeSide,
    #[serde(alias = "tradeId")]
    pub trade_id: String,
}

/// Kind tag of a market data item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    Candle,
    Ticker,
    #[serde(rename = "orderbook")]
    OrderBook,
    Trade,
}

impl DataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Candle => "candle",
            DataKind::Ticker => "ticker",
            DataKind::OrderBook => "orderbook",
            DataKind::Trade => "trade",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataKind {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "candle" => Ok(DataKind::Candle),
            "ticker" => Ok(DataKind::Ticker),
            "orderbook" | "order_book" => Ok(DataKind::OrderBook),
            "trade" => Ok(DataKind::Trade),
            _ => Err(TypesError::UnknownKind(s.to_string())),
        }
    }
}

/// Any market data item, tagged by kind.
///
/// Wire form: `{"kind": "candle", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum MarketData {
    Candle(Candle),
    Ticker(Ticker),
    #[serde(rename = "orderbook")]
    OrderBook(OrderBookSnapshot),
    Trade(Trade),
}

impl MarketData {
    /// Decode an untyped payload into the shape named by `kind`.
    pub fn from_value(kind: DataKind, payload: serde_json::Value) -> Result<Self, TypesError> {
        let malformed = |err: serde_json::Error| TypesError::MalformedPayload {
            kind: kind.to_string(),
            reason: err.to_string(),
        };

        let item = match kind {
            DataKind::Candle => MarketData::Candle(serde_json::from_value(payload).map_err(malformed)?),
            DataKind::Ticker => MarketData::Ticker(serde_json::from_value(payload).map_err(malformed)?),
            DataKind::OrderBook => {
                MarketData::OrderBook(serde_json::from_value(payload).map_err(malformed)?)
            }
            DataKind::Trade => MarketData::Trade(serde_json::from_value(payload).map_err(malformed)?),
        };
        Ok(item)
    }

    pub fn kind(&self) -> DataKind {
        match self {
            MarketData::Candle(_) => DataKind::Candle,
            MarketData::Ticker(_) => DataKind::Ticker,
            MarketData::OrderBook(_) => DataKind::OrderBook,
            MarketData::Trade(_) => DataKind::Trade,
        }
    }

    pub fn symbol(&self) -> &Symbol {
        match self {
            MarketData::Candle(c) => &c.symbol,
            MarketData::Ticker(t) => &t.symbol,
            MarketData::OrderBook(ob) => &ob.symbol,
            MarketData::Trade(tr) => &tr.symbol,
        }
    }

    pub fn exchange(&self) -> &ExchangeId {
        match self {
            MarketData::Candle(c) => &c.exchange,
            MarketData::Ticker(t) => &t.exchange,
            MarketData::OrderBook(ob) => &ob.exchange,
            MarketData::Trade(tr) => &tr.exchange,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            MarketData::Candle(c) => c.timestamp,
            MarketData::Ticker(t) => t.timestamp,
            MarketData::OrderBook(ob) => ob.timestamp,
            MarketData::Trade(tr) => tr.timestamp,
        }
    }

    /// Candle timeframe, for candle items only.
    pub fn timeframe(&self) -> Option<Timeframe> {
        match self {
            MarketData::Candle(c) => Some(c.timeframe),
            _ => None,
        }
    }
}
