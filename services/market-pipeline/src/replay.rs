//! Replay data source
//!
//! Serves a recorded capture as if it were live: items are emitted in
//! file order on `start`, and bulk fetches and quality assessments are
//! answered from the candles in the capture.
//!
//! Capture format is JSON lines, one tagged item per line:
//! `{"kind":"candle","data":{...}}`. Blank lines and lines starting with
//! `#` are skipped.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use types::ids::{ExchangeId, Symbol};
use types::market::{Candle, MarketData};
use types::timeframe::Timeframe;

use crate::events::BulkProgress;
use crate::source::{
    BulkCandles, BulkRequest, MarketDataSource, ProgressCallback, QualityAssessment, SourceError,
};

/// Parse a JSON-lines capture.
pub fn parse_capture(contents: &str) -> Result<Vec<MarketData>, SourceError> {
    let mut items = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let item: MarketData = serde_json::from_str(line).map_err(|e| SourceError::Decode {
            line: idx + 1,
            reason: e.to_string(),
        })?;
        items.push(item);
    }
    Ok(items)
}

/// A [`MarketDataSource`] backed by an in-memory capture.
pub struct ReplaySource {
    items: Arc<Vec<MarketData>>,
    pace: Duration,
    running: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ReplaySource {
    pub fn new(items: Vec<MarketData>) -> Self {
        Self {
            items: Arc::new(items),
            pace: Duration::ZERO,
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Load a JSON-lines capture from disk.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path).await?;
        let items = parse_capture(&contents)?;
        info!(path = %path.display(), items = items.len(), "Replay capture loaded");
        Ok(Self::new(items))
    }

    /// Delay between emitted items.
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn candles(&self) -> impl Iterator<Item = &Candle> {
        self.items.iter().filter_map(|item| match item {
            MarketData::Candle(c) => Some(c),
            _ => None,
        })
    }

    /// End of the capture, used as "now" when scoring freshness.
    fn capture_end(&self) -> i64 {
        self.items
            .iter()
            .map(|item| match item {
                MarketData::Candle(c) => c.end_timestamp(),
                other => other.timestamp(),
            })
            .max()
            .unwrap_or_default()
    }
}

#[async_trait]
impl MarketDataSource for ReplaySource {
    async fn start(&self, sender: mpsc::Sender<MarketData>) -> Result<(), SourceError> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Replay source already running");
            return Ok(());
        }

        let items = Arc::clone(&self.items);
        let running = Arc::clone(&self.running);
        let pace = self.pace;

        let handle = tokio::spawn(async move {
            let mut sent = 0usize;
            for item in items.iter() {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                if sender.send(item.clone()).await.is_err() {
                    debug!("Replay receiver closed");
                    break;
                }
                sent += 1;
                if !pace.is_zero() {
                    tokio::time::sleep(pace).await;
                }
            }
            info!(sent, total = items.len(), "Replay finished");
        });

        let mut task = self
            .task
            .lock()
            .map_err(|_| SourceError::Unavailable("replay task lock poisoned".to_string()))?;
        *task = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> Result<(), SourceError> {
        self.running.store(false, Ordering::SeqCst);
        let handle = self
            .task
            .lock()
            .map_err(|_| SourceError::Unavailable("replay task lock poisoned".to_string()))?
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
        Ok(())
    }

    async fn bulk_fetch(
        &self,
        request: &BulkRequest,
        on_progress: Option<ProgressCallback>,
    ) -> Result<BulkCandles, SourceError> {
        let total = request.series_count();
        let mut completed = 0u64;
        let mut result: BulkCandles = BTreeMap::new();

        for symbol in &request.symbols {
            for &timeframe in &request.timeframes {
                let mut series: Vec<Candle> = self
                    .candles()
                    .filter(|c| &c.symbol == symbol && c.timeframe == timeframe)
                    .filter(|c| request.covers(c.timestamp))
                    .filter(|c| request.exchange.as_ref().map_or(true, |ex| &c.exchange == ex))
                    .cloned()
                    .collect();
                series.sort_by_key(|c| c.timestamp);

                completed += 1;
                if let Some(callback) = &on_progress {
                    callback(BulkProgress {
                        completed,
                        total,
                        current: format!("{symbol} {timeframe}"),
                    });
                }

                result
                    .entry(symbol.clone())
                    .or_default()
                    .insert(timeframe, series);
            }
        }

        Ok(result)
    }

    async fn health_check(&self) -> Result<BTreeMap<ExchangeId, bool>, SourceError> {
        Ok(self
            .items
            .iter()
            .map(|item| (item.exchange().clone(), true))
            .collect())
    }

    async fn assess_data_quality(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> Result<QualityAssessment, SourceError> {
        let mut series: Vec<Candle> = self
            .candles()
            .filter(|c| &c.symbol == symbol && c.timeframe == timeframe)
            .cloned()
            .collect();
        if series.is_empty() {
            return Err(SourceError::NoData {
                symbol: symbol.clone(),
                timeframe,
            });
        }
        series.sort_by_key(|c| c.timestamp);
        Ok(QualityAssessment::from_candles(
            &series,
            timeframe,
            self.capture_end(),
        ))
    }
}
