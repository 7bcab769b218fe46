//! Data source capability
//!
//! The pipeline does not talk to exchanges itself. A [`MarketDataSource`]
//! delivers live items over a bounded mpsc channel handed to it on
//! `start`, serves bulk historical fetches, and answers connectivity and
//! data quality probes.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use types::ids::{ExchangeId, Symbol};
use types::market::{Candle, MarketData};
use types::timeframe::Timeframe;

use crate::events::BulkProgress;
use crate::validation;

/// Errors raised by data sources.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("data source unavailable: {0}")]
    Unavailable(String),

    #[error("bulk fetch failed: {0}")]
    Fetch(String),

    #[error("no data for {symbol} {timeframe}")]
    NoData { symbol: Symbol, timeframe: Timeframe },

    #[error("data quality assessment failed: {0}")]
    Assessment(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error at line {line}: {reason}")]
    Decode { line: usize, reason: String },
}

/// Parameters of a bulk historical fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkRequest {
    pub symbols: Vec<Symbol>,
    pub timeframes: Vec<Timeframe>,
    /// Inclusive start, Unix milliseconds.
    pub start: i64,
    /// Exclusive end, Unix milliseconds.
    pub end: i64,
    pub exchange: Option<ExchangeId>,
}

impl BulkRequest {
    /// Number of (symbol, timeframe) series requested.
    pub fn series_count(&self) -> u64 {
        (self.symbols.len() * self.timeframes.len()) as u64
    }

    pub fn covers(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }
}

/// Candles returned by a bulk fetch, keyed by symbol then timeframe.
pub type BulkCandles = BTreeMap<Symbol, BTreeMap<Timeframe, Vec<Candle>>>;

/// Progress callback invoked by sources during a bulk fetch.
pub type ProgressCallback = Arc<dyn Fn(BulkProgress) + Send + Sync>;

/// Data quality scores for one (symbol, timeframe) series, each 0–100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub completeness: f64,
    pub consistency: f64,
    pub freshness: f64,
    pub overall: f64,
    pub issues: Vec<String>,
}

impl QualityAssessment {
    /// Score a series of candles as of `now_ms`.
    ///
    /// - completeness: share of expected periods present between the first
    ///   and last candle
    /// - consistency: share of candles passing validation
    /// - freshness: 100 while the last candle is at most two periods old,
    ///   then decaying linearly to 0 at ten periods
    pub fn from_candles(candles: &[Candle], timeframe: Timeframe, now_ms: i64) -> Self {
        if candles.is_empty() {
            return Self {
                completeness: 0.0,
                consistency: 0.0,
                freshness: 0.0,
                overall: 0.0,
                issues: vec!["no candles available".to_string()],
            };
        }

        let period = timeframe.duration_ms();
        let mut issues = Vec::new();

        let first = candles.iter().map(|c| c.timestamp).min().unwrap_or_default();
        let last = candles.iter().map(|c| c.timestamp).max().unwrap_or_default();
        let expected = (last.saturating_sub(first) / period + 1).max(1) as f64;
        let completeness = (candles.len() as f64 / expected * 100.0).min(100.0);
        if completeness < 100.0 {
            issues.push(format!(
                "{} of {} expected periods missing",
                expected as usize - candles.len().min(expected as usize),
                expected as usize
            ));
        }

        let invalid = candles
            .iter()
            .filter(|c| !validation::validate_candle(c))
            .count();
        let consistency = (candles.len() - invalid) as f64 / candles.len() as f64 * 100.0;
        if invalid > 0 {
            issues.push(format!("{} invalid candles", invalid));
        }

        let age_periods = now_ms.saturating_sub(last.saturating_add(period)).max(0) as f64 / period as f64;
        let freshness = if age_periods <= 2.0 {
            100.0
        } else {
            ((10.0 - age_periods) / 8.0 * 100.0).clamp(0.0, 100.0)
        };
        if freshness < 100.0 {
            issues.push(format!("last candle is {:.1} periods old", age_periods));
        }

        Self {
            completeness,
            consistency,
            freshness,
            overall: (completeness + consistency + freshness) / 3.0,
            issues,
        }
    }
}

/// A provider of live and historical market data.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Begin emitting live items into `sender`.
    async fn start(&self, sender: mpsc::Sender<MarketData>) -> Result<(), SourceError>;

    /// Stop emitting. Dropping the sender closes the pipeline's intake.
    async fn stop(&self) -> Result<(), SourceError>;

    /// Fetch historical candles for every requested (symbol, timeframe).
    async fn bulk_fetch(
        &self,
        request: &BulkRequest,
        on_progress: Option<ProgressCallback>,
    ) -> Result<BulkCandles, SourceError>;

    /// Connectivity per exchange.
    async fn health_check(&self) -> Result<BTreeMap<ExchangeId, bool>, SourceError>;

    async fn assess_data_quality(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> Result<QualityAssessment, SourceError>;
}
