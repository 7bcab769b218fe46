//! Pipeline metrics
//!
//! Per-kind processed counters, per-stage error counters, a rolling
//! processing-time window and derived quality figures. Counters are
//! atomics so concurrent dispatch needs no lock; the latency window sits
//! behind a mutex.
//!
//! Metrics reset only when the pipeline (re)starts.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use types::market::DataKind;

/// Processed item counts by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedCounts {
    pub candles: u64,
    pub tickers: u64,
    pub order_books: u64,
    pub trades: u64,
}

impl ProcessedCounts {
    pub fn total(&self) -> u64 {
        self.candles + self.tickers + self.order_books + self.trades
    }
}

/// Error counts by pipeline stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCounts {
    pub validation: u64,
    pub processing: u64,
    pub storage: u64,
}

impl ErrorCounts {
    pub fn total(&self) -> u64 {
        self.validation + self.processing + self.storage
    }
}

/// Point-in-time view of the pipeline metrics with derived figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub processed: ProcessedCounts,
    pub errors: ErrorCounts,
    /// Live items dropped because their exchange, symbol or timeframe is disabled.
    pub filtered: u64,
    /// Rolling average processing time per successfully processed item.
    pub avg_processing_time_ms: f64,
    /// Items processed per second since start.
    pub throughput: f64,
    /// processed / (processed + validation errors) × 100
    pub validation_rate: f64,
    /// total errors / (processed + total errors) × 100
    pub error_rate: f64,
    pub uptime_secs: f64,
    /// Unix milliseconds of the last processed item, 0 if none.
    pub last_processed_at: i64,
}

/// validation rate in percent; 100 when nothing has been seen.
pub fn validation_rate(processed: u64, validation_errors: u64) -> f64 {
    let seen = processed + validation_errors;
    if seen == 0 {
        return 100.0;
    }
    processed as f64 / seen as f64 * 100.0
}

/// error rate in percent; 0 when nothing has been seen.
pub fn error_rate(processed: u64, total_errors: u64) -> f64 {
    let seen = processed + total_errors;
    if seen == 0 {
        return 0.0;
    }
    total_errors as f64 / seen as f64 * 100.0
}

/// Core metrics for the pipeline.
pub struct PipelineMetrics {
    candles: AtomicU64,
    tickers: AtomicU64,
    order_books: AtomicU64,
    trades: AtomicU64,

    validation_errors: AtomicU64,
    processing_errors: AtomicU64,
    storage_errors: AtomicU64,
    filtered: AtomicU64,

    processing_ns: Mutex<LatencyTracker>,
    started_at: Mutex<Option<Instant>>,
    last_processed_at: AtomicI64,
}

impl PipelineMetrics {
    pub fn new(latency_window: usize) -> Self {
        Self {
            candles: AtomicU64::new(0),
            tickers: AtomicU64::new(0),
            order_books: AtomicU64::new(0),
            trades: AtomicU64::new(0),
            validation_errors: AtomicU64::new(0),
            processing_errors: AtomicU64::new(0),
            storage_errors: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
            processing_ns: Mutex::new(LatencyTracker::new(latency_window)),
            started_at: Mutex::new(None),
            last_processed_at: AtomicI64::new(0),
        }
    }

    /// Zero every counter and restart the uptime clock.
    pub fn reset(&self) {
        for counter in [
            &self.candles,
            &self.tickers,
            &self.order_books,
            &self.trades,
            &self.validation_errors,
            &self.processing_errors,
            &self.storage_errors,
            &self.filtered,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.last_processed_at.store(0, Ordering::Relaxed);
        if let Ok(mut tracker) = self.processing_ns.lock() {
            tracker.clear();
        }
        if let Ok(mut started) = self.started_at.lock() {
            *started = Some(Instant::now());
        }
    }

    /// Record a successfully processed item.
    pub fn record_processed(&self, kind: DataKind, elapsed: Duration) {
        let counter = match kind {
            DataKind::Candle => &self.candles,
            DataKind::Ticker => &self.tickers,
            DataKind::OrderBook => &self.order_books,
            DataKind::Trade => &self.trades,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.last_processed_at
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);

        if let Ok(mut tracker) = self.processing_ns.lock() {
            tracker.record(u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX));
        }
    }

    pub fn record_validation_error(&self) {
        self.validation_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processing_error(&self) {
        self.processing_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_storage_error(&self) {
        self.storage_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed(&self) -> ProcessedCounts {
        ProcessedCounts {
            candles: self.candles.load(Ordering::Relaxed),
            tickers: self.tickers.load(Ordering::Relaxed),
            order_books: self.order_books.load(Ordering::Relaxed),
            trades: self.trades.load(Ordering::Relaxed),
        }
    }

    pub fn errors(&self) -> ErrorCounts {
        ErrorCounts {
            validation: self.validation_errors.load(Ordering::Relaxed),
            processing: self.processing_errors.load(Ordering::Relaxed),
            storage: self.storage_errors.load(Ordering::Relaxed),
        }
    }

    /// Time since the last reset, zero if never started.
    pub fn uptime(&self) -> Duration {
        self.started_at
            .lock()
            .ok()
            .and_then(|started| started.map(|at| at.elapsed()))
            .unwrap_or_default()
    }

    /// Build a snapshot with derived throughput and quality figures.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let processed = self.processed();
        let errors = self.errors();
        let total_processed = processed.total();

        let uptime_secs = self.uptime().as_secs_f64();
        let throughput = if uptime_secs > 0.0 {
            total_processed as f64 / uptime_secs
        } else {
            0.0
        };

        let avg_processing_time_ms = self
            .processing_ns
            .lock()
            .ok()
            .and_then(|tracker| tracker.average())
            .map(|ns| ns as f64 / 1_000_000.0)
            .unwrap_or(0.0);

        MetricsSnapshot {
            processed,
            errors,
            filtered: self.filtered.load(Ordering::Relaxed),
            avg_processing_time_ms,
            throughput,
            validation_rate: validation_rate(total_processed, errors.validation),
            error_rate: error_rate(total_processed, errors.total()),
            uptime_secs,
            last_processed_at: self.last_processed_at.load(Ordering::Relaxed),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Bounded window of latency samples.
pub struct LatencyTracker {
    samples: Vec<u64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: Vec::with_capacity(max_samples),
            max_samples: max_samples.max(1),
        }
    }

    /// Record a latency sample, evicting the oldest when full.
    pub fn record(&mut self, value: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.remove(0);
        }
        self.samples.push(value);
    }

    pub fn average(&self) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: u64 = self.samples.iter().sum();
        Some(sum / self.samples.len() as u64)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Alert severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Warning,
    Critical,
}

/// An alert triggered by a threshold breach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub metric: String,
    pub message: String,
}

/// Data quality thresholds, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityThresholds {
    pub min_validation_rate: f64,
    pub max_error_rate: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_validation_rate: 95.0,
            max_error_rate: 5.0,
        }
    }
}

impl QualityThresholds {
    pub fn validation_rate_ok(&self, snapshot: &MetricsSnapshot) -> bool {
        snapshot.validation_rate >= self.min_validation_rate
    }

    pub fn error_rate_ok(&self, snapshot: &MetricsSnapshot) -> bool {
        snapshot.error_rate <= self.max_error_rate
    }

    /// Alerts for every threshold the snapshot breaches.
    pub fn check(&self, snapshot: &MetricsSnapshot) -> Vec<Alert> {
        let mut alerts = Vec::new();

        if !self.validation_rate_ok(snapshot) {
            alerts.push(Alert {
                level: AlertLevel::Warning,
                metric: "validation_rate".to_string(),
                message: format!(
                    "Validation rate {:.2}% < threshold {:.2}%",
                    snapshot.validation_rate, self.min_validation_rate
                ),
            });
        }

        if !self.error_rate_ok(snapshot) {
            alerts.push(Alert {
                level: AlertLevel::Critical,
                metric: "error_rate".to_string(),
                message: format!(
                    "Error rate {:.2}% > threshold {:.2}%",
                    snapshot.error_rate, self.max_error_rate
                ),
            });
        }

        if snapshot.errors.storage > 0 {
            alerts.push(Alert {
                level: AlertLevel::Warning,
                metric: "storage_errors".to_string(),
                message: format!("Storage errors reported: {}", snapshot.errors.storage),
            });
        }

        alerts
    }
}
