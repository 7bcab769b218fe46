//! Market Data Pipeline
//!
//! Ingests streaming exchange market data and produces:
//! - Validated candles, tickers, order book snapshots and trades
//! - Higher-timeframe candles aggregated from base candles
//! - Throughput and data quality metrics with threshold alerts
//! - Health and per-pair data quality reports
//!
//! # Architecture
//!
//! ```text
//!  MarketDataSource ──mpsc──┐        bulk_fetch
//!                           │            │
//!                      ┌────▼────┐       │
//!       submit() ─────►│ Batch   │       │
//!                      └────┬────┘       │
//!                           │ flush      │
//!                      ┌────▼────────────▼──┐
//!                      │ process_market_data│
//!                      └────┬───────────────┘
//!                           │
//!                  ┌────────┼──────────┐
//!                  │        │          │
//!            ┌─────▼────┐ ┌─▼───────┐ ┌▼───────┐
//!            │Validation│ │Aggregate│ │Metrics │
//!            └─────┬────┘ └─┬───────┘ └┬───────┘
//!                  │        │          │
//!              ┌───▼────────▼──────────▼───┐
//!              │   EventBus (broadcast)    │
//!              └───────────────────────────┘
//! ```

pub mod aggregator;
pub mod batch;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod metrics;
pub mod pipeline;
pub mod quality;
pub mod replay;
pub mod source;
pub mod validation;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use pipeline::{BulkResult, MarketDataPipeline};
pub use source::{BulkRequest, MarketDataSource, SourceError};

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
