//! Domain validation for inbound market data
//!
//! Pure, stateless checks, one per data kind. Each `validate_*` predicate
//! is backed by a `check_*` function that names the violated rule, which
//! the pipeline forwards in its validation-error events.
//!
//! Validation never retries and never panics on well-typed input.

use rust_decimal::Decimal;
use types::market::{Candle, MarketData, OrderBookSnapshot, Ticker, Trade, TradeSide};

/// The domain rule an item violated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("symbol is empty")]
    EmptySymbol,

    #[error("{field} must be positive, got {value}")]
    NonPositive { field: &'static str, value: Decimal },

    #[error("low {low} is above the candle body ({body_low})")]
    LowAboveBody { low: Decimal, body_low: Decimal },

    #[error("high {high} is below the candle body ({body_high})")]
    HighBelowBody { high: Decimal, body_high: Decimal },

    #[error("crossed quote: bid {bid} > ask {ask}")]
    CrossedQuote { bid: Decimal, ask: Decimal },

    #[error("crossed book: best bid {best_bid} >= best ask {best_ask}")]
    CrossedBook { best_bid: Decimal, best_ask: Decimal },

    #[error("trade side must be buy or sell")]
    UnknownSide,
}

fn require_positive(field: &'static str, value: Decimal) -> Result<(), ValidationError> {
    if value > Decimal::ZERO {
        Ok(())
    } else {
        Err(ValidationError::NonPositive { field, value })
    }
}

/// Check a candle.
///
/// Checks performed (in order):
/// 1. Symbol is non-empty
/// 2. open, high, low, close are all positive
/// 3. low is at or below the body, high is at or above it
///
/// Volume is not checked.
pub fn check_candle(candle: &Candle) -> Result<(), ValidationError> {
    if candle.symbol.is_blank() {
        return Err(ValidationError::EmptySymbol);
    }

    require_positive("open", candle.open)?;
    require_positive("high", candle.high)?;
    require_positive("low", candle.low)?;
    require_positive("close", candle.close)?;

    let body_low = candle.body_low();
    if candle.low > body_low {
        return Err(ValidationError::LowAboveBody {
            low: candle.low,
            body_low,
        });
    }

    let body_high = candle.body_high();
    if candle.high < body_high {
        return Err(ValidationError::HighBelowBody {
            high: candle.high,
            body_high,
        });
    }

    Ok(())
}

/// Check a ticker: non-empty symbol, positive price and volume, bid ≤ ask.
pub fn check_ticker(ticker: &Ticker) -> Result<(), ValidationError> {
    if ticker.symbol.is_blank() {
        return Err(ValidationError::EmptySymbol);
    }
    require_positive("price", ticker.price)?;
    require_positive("volume", ticker.volume)?;

    if ticker.bid > ticker.ask {
        return Err(ValidationError::CrossedQuote {
            bid: ticker.bid,
            ask: ticker.ask,
        });
    }
    Ok(())
}

/// Check an order book snapshot: the best bid must be strictly below the
/// best ask. A book with an empty side cannot be crossed.
pub fn check_order_book(book: &OrderBookSnapshot) -> Result<(), ValidationError> {
    if let (Some(best_bid), Some(best_ask)) = (book.best_bid(), book.best_ask()) {
        if best_bid >= best_ask {
            return Err(ValidationError::CrossedBook { best_bid, best_ask });
        }
    }
    Ok(())
}

/// Check a trade: known side, positive price and quantity.
pub fn check_trade(trade: &Trade) -> Result<(), ValidationError> {
    if trade.side == TradeSide::Unknown {
        return Err(ValidationError::UnknownSide);
    }
    require_positive("price", trade.price)?;
    require_positive("quantity", trade.quantity)?;
    Ok(())
}

/// Check any market data item by dispatching on its kind.
pub fn check(item: &MarketData) -> Result<(), ValidationError> {
    match item {
        MarketData::Candle(candle) => check_candle(candle),
        MarketData::Ticker(ticker) => check_ticker(ticker),
        MarketData::OrderBook(book) => check_order_book(book),
        MarketData::Trade(trade) => check_trade(trade),
    }
}

pub fn validate_candle(candle: &Candle) -> bool {
    check_candle(candle).is_ok()
}

pub fn validate_ticker(ticker: &Ticker) -> bool {
    check_ticker(ticker).is_ok()
}

pub fn validate_order_book(book: &OrderBookSnapshot) -> bool {
    check_order_book(book).is_ok()
}

pub fn validate_trade(trade: &Trade) -> bool {
    check_trade(trade).is_ok()
}
