//! Types library for the market data pipeline
//!
//! Shared data shapes exchanged between upstream connectors, the
//! pipeline service and its consumers.
//!
//! # Modules
//! - `ids`: Identifier newtypes (Symbol, ExchangeId)
//! - `timeframe`: Candle timeframes and epoch-aligned bucketing
//! - `market`: Candle, Ticker, OrderBookSnapshot, Trade and the `MarketData` union
//! - `errors`: Error taxonomy

pub mod errors;
pub mod ids;
pub mod market;
pub mod timeframe;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::errors::*;
    pub use crate::ids::*;
    pub use crate::market::*;
    pub use crate::timeframe::*;
}
