//! Pipeline orchestrator
//!
//! Wires an injected [`MarketDataSource`] to validation and aggregation,
//! tracks metrics and fans out events.
//!
//! Live flow:
//! source → mpsc channel → intake task → batch queue → flush → process
//!
//! The queue is flushed when it reaches the batch size, on every timer
//! tick, and on `stop()`. Each item runs to completion synchronously;
//! shared state sits behind per-pipeline mutexes and atomics.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use types::ids::Symbol;
use types::market::{DataKind, MarketData};
use types::timeframe::Timeframe;

use crate::aggregator::TimeframeAggregator;
use crate::batch::{BatchQueue, PushOutcome};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::events::{EventBus, EventEnvelope, PipelineEvent};
use crate::health::{HealthChecks, HealthReport};
use crate::metrics::{MetricsSnapshot, PipelineMetrics, QualityThresholds};
use crate::quality::{DataQualityReport, PairQuality};
use crate::source::{BulkRequest, MarketDataSource, ProgressCallback};
use crate::validation;

/// Bulk replay yields to the runtime after this many items.
const BULK_YIELD_EVERY: u64 = 256;

/// Outcome of a bulk historical run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkResult {
    pub success: bool,
    pub processed: u64,
    pub errors: u64,
    pub duration: Duration,
}

struct BackgroundTasks {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

struct Inner {
    config: PipelineConfig,
    thresholds: QualityThresholds,
    source: Option<Arc<dyn MarketDataSource>>,
    aggregator: Mutex<TimeframeAggregator>,
    batch: Mutex<BatchQueue>,
    metrics: PipelineMetrics,
    events: EventBus,
    running: AtomicBool,
    tasks: Mutex<Option<BackgroundTasks>>,
}

/// The market data pipeline. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MarketDataPipeline {
    inner: Arc<Inner>,
}

impl MarketDataPipeline {
    /// Create a pipeline with no data source. Items can still be pushed
    /// through [`submit`](Self::submit) or processed directly.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        Self::build(config, None)
    }

    pub fn with_source(config: PipelineConfig, source: Arc<dyn MarketDataSource>) -> Result<Self> {
        Self::build(config, Some(source))
    }

    fn build(config: PipelineConfig, source: Option<Arc<dyn MarketDataSource>>) -> Result<Self> {
        config.validate()?;
        let base = config.base_timeframe()?;
        let targets = config.target_timeframes()?;

        info!(
            batch_size = config.processing.batch_size,
            interval_ms = config.processing.processing_interval_ms,
            base = %base,
            targets = ?targets,
            has_source = source.is_some(),
            "MarketDataPipeline initialized"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                thresholds: config.thresholds(),
                aggregator: Mutex::new(TimeframeAggregator::new(base, targets)),
                batch: Mutex::new(BatchQueue::new(config.processing.batch_size)),
                metrics: PipelineMetrics::default(),
                events: EventBus::new(config.processing.event_capacity),
                running: AtomicBool::new(false),
                tasks: Mutex::new(None),
                source,
                config,
            }),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn has_source(&self) -> bool {
        self.inner.source.is_some()
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.inner.events.subscribe()
    }

    /// Start the data source and background tasks. A no-op while running.
    pub async fn start(&self) -> Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            warn!("Pipeline already running");
            return Ok(());
        }

        self.inner.metrics.reset();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::with_capacity(2);

        match &self.inner.source {
            Some(source) => {
                let (tx, rx) = mpsc::channel(self.inner.config.processing.channel_capacity);
                if let Err(e) = source.start(tx).await {
                    self.inner.running.store(false, Ordering::SeqCst);
                    error!(error = %e, "Data source failed to start");
                    return Err(PipelineError::SourceStart(e));
                }
                handles.push(tokio::spawn(self.clone().intake_loop(rx, shutdown_rx.clone())));
            }
            None => warn!("No data source attached, accepting submitted items only"),
        }

        handles.push(tokio::spawn(self.clone().timer_loop(shutdown_rx)));

        match self.inner.tasks.lock() {
            Ok(mut tasks) => {
                *tasks = Some(BackgroundTasks {
                    shutdown: shutdown_tx,
                    handles,
                })
            }
            Err(_) => error!("Task registry lock poisoned"),
        }

        self.inner.events.publish(PipelineEvent::Started);
        info!("Pipeline started");
        Ok(())
    }

    /// Stop the source, drain queued items within the drain timeout and
    /// cancel background tasks. A no-op when stopped.
    pub async fn stop(&self) -> Result<()> {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            debug!("Pipeline not running");
            return Ok(());
        }

        if let Some(source) = &self.inner.source {
            if let Err(e) = source.stop().await {
                warn!(error = %e, "Data source stop failed");
            }
        }

        let drain_timeout = self.inner.config.drain_timeout();

        let tasks = match self.inner.tasks.lock() {
            Ok(mut tasks) => tasks.take(),
            Err(_) => None,
        };
        if let Some(tasks) = tasks {
            let _ = tasks.shutdown.send(true);
            for mut handle in tasks.handles {
                if tokio::time::timeout(drain_timeout, &mut handle).await.is_err() {
                    warn!("Background task did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        let drained = tokio::time::timeout(drain_timeout, async {
            let mut total = 0usize;
            loop {
                let n = self.flush();
                if n == 0 {
                    break total;
                }
                total += n;
                tokio::task::yield_now().await;
            }
        })
        .await;

        match drained {
            Ok(total) => info!(drained = total, "Pipeline stopped"),
            Err(_) => warn!(
                remaining = self.queued(),
                "Drain timeout elapsed, pipeline stopped with items queued"
            ),
        }

        self.inner.events.publish(PipelineEvent::Stopped);
        Ok(())
    }

    async fn intake_loop(self, mut rx: mpsc::Receiver<MarketData>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                item = rx.recv() => match item {
                    Some(item) => {
                        self.enqueue(item);
                    }
                    None => {
                        debug!("Data source channel closed");
                        return;
                    }
                }
            }
        }

        // Items already delivered by the source are kept.
        while let Ok(item) = rx.try_recv() {
            self.enqueue(item);
        }
    }

    async fn timer_loop(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.inner.config.processing_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        let retry_attempts = self.inner.config.processing.retry_attempts;
        let retry_delay = self.inner.config.retry_delay();

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.flush();

                    let mut attempt = 0;
                    while attempt < retry_attempts && self.queued() > 0 {
                        attempt += 1;
                        tokio::select! {
                            _ = shutdown.changed() => return,
                            _ = tokio::time::sleep(retry_delay) => {}
                        }
                        debug!(attempt, queued = self.queued(), "Re-flushing batch");
                        self.flush();
                    }
                }
            }
        }
    }

    /// Queue an item for batch processing.
    ///
    /// Returns false if the pipeline is stopped or the item is filtered by
    /// exchange enablement.
    pub fn submit(&self, item: MarketData) -> bool {
        if !self.is_running() {
            debug!(kind = %item.kind(), "Pipeline stopped, dropping submitted item");
            return false;
        }
        self.enqueue(item)
    }

    fn enqueue(&self, item: MarketData) -> bool {
        if !self.inner.config.accepts(&item) {
            self.inner.metrics.record_filtered();
            debug!(
                kind = %item.kind(),
                exchange = %item.exchange(),
                symbol = %item.symbol(),
                "Item filtered by exchange configuration"
            );
            return false;
        }

        let outcome = self
            .inner
            .batch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(item);

        if outcome == PushOutcome::BatchReady {
            self.flush();
        }
        true
    }

    /// Process everything currently queued. Returns the number of items taken.
    pub fn flush(&self) -> usize {
        let batch = self
            .inner
            .batch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain();

        let n = batch.len();
        for item in &batch {
            self.process_market_data(item);
        }
        n
    }

    /// Number of items waiting in the batch queue.
    pub fn queued(&self) -> usize {
        self.inner.batch.lock().unwrap_or_else(PoisonError::into_inner).pending()
    }

    /// Validate and process a single item.
    ///
    /// Returns false if the item failed validation or its handler failed;
    /// both are counted and signaled.
    pub fn process_market_data(&self, item: &MarketData) -> bool {
        let started = Instant::now();
        let kind = item.kind();

        if let Err(reason) = validation::check(item) {
            self.inner.metrics.record_validation_error();
            debug!(
                kind = %kind,
                symbol = %item.symbol(),
                exchange = %item.exchange(),
                reason = %reason,
                "Validation failed"
            );
            self.inner.events.publish(PipelineEvent::ValidationError {
                kind,
                data: item.clone(),
                reason: reason.to_string(),
            });
            return false;
        }

        match self.handle(item) {
            Ok(()) => {
                self.inner.metrics.record_processed(kind, started.elapsed());
                self.inner.events.publish(PipelineEvent::DataProcessed {
                    kind,
                    data: item.clone(),
                });
                true
            }
            Err(e) => {
                self.inner.metrics.record_processing_error();
                error!(
                    kind = %kind,
                    symbol = %item.symbol(),
                    error = %e,
                    "Processing failed"
                );
                self.inner.events.publish(PipelineEvent::ProcessingError {
                    kind,
                    data: item.clone(),
                    error: e.to_string(),
                });
                false
            }
        }
    }

    fn handle(&self, item: &MarketData) -> Result<()> {
        match item {
            MarketData::Candle(candle) => {
                // A failed fold leaves the aggregator untouched, so state
                // behind a poisoned lock is still consistent.
                let emitted = self
                    .inner
                    .aggregator
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .process_candle(candle)?;

                for aggregated in emitted {
                    self.inner.events.publish(PipelineEvent::AggregatedCandle {
                        candle: aggregated.candle,
                        source_candles: aggregated.source_candles,
                        is_final: aggregated.is_final,
                    });
                }
                Ok(())
            }
            MarketData::Ticker(_) | MarketData::OrderBook(_) | MarketData::Trade(_) => Ok(()),
        }
    }

    /// Process an untyped item.
    ///
    /// An unknown kind is dropped without touching metrics. A payload that
    /// does not decode counts as a validation error.
    pub fn process_raw(&self, kind: &str, payload: serde_json::Value) -> bool {
        let kind: DataKind = match kind.parse() {
            Ok(kind) => kind,
            Err(_) => {
                warn!(kind, "Unrecognized data kind, dropping");
                return false;
            }
        };

        match MarketData::from_value(kind, payload.clone()) {
            Ok(item) => self.process_market_data(&item),
            Err(e) => {
                self.inner.metrics.record_validation_error();
                debug!(kind = %kind, error = %e, "Malformed payload");
                self.inner.events.publish(PipelineEvent::MalformedInput {
                    kind,
                    payload,
                    reason: e.to_string(),
                });
                false
            }
        }
    }

    /// Fetch historical candles from the source and replay them through
    /// validation and aggregation, oldest first per series.
    ///
    /// Never fails: a fetch failure is reported as one error.
    pub async fn bulk_process_historical_data(&self, request: BulkRequest) -> BulkResult {
        let started = Instant::now();

        let Some(source) = self.inner.source.clone() else {
            warn!("Bulk processing requested without a data source");
            return BulkResult {
                success: false,
                processed: 0,
                errors: 1,
                duration: started.elapsed(),
            };
        };

        info!(
            symbols = request.symbols.len(),
            timeframes = request.timeframes.len(),
            start = request.start,
            end = request.end,
            "Bulk historical processing started"
        );

        let inner = Arc::clone(&self.inner);
        let on_progress: ProgressCallback = Arc::new(move |progress| {
            inner.events.publish(PipelineEvent::BulkProgress(progress));
        });

        let fetched = match source.bulk_fetch(&request, Some(on_progress)).await {
            Ok(fetched) => fetched,
            Err(e) => {
                error!(error = %e, "Bulk fetch failed");
                return BulkResult {
                    success: false,
                    processed: 0,
                    errors: 1,
                    duration: started.elapsed(),
                };
            }
        };

        let mut processed = 0u64;
        let mut errors = 0u64;
        for (symbol, by_timeframe) in fetched {
            for (timeframe, mut candles) in by_timeframe {
                candles.sort_by_key(|c| c.timestamp);
                debug!(symbol = %symbol, timeframe = %timeframe, candles = candles.len(), "Replaying series");

                for candle in candles {
                    if self.process_market_data(&MarketData::Candle(candle)) {
                        processed += 1;
                    } else {
                        errors += 1;
                    }
                    if (processed + errors) % BULK_YIELD_EVERY == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            }
        }

        let result = BulkResult {
            success: errors == 0,
            processed,
            errors,
            duration: started.elapsed(),
        };
        info!(
            processed,
            errors,
            duration_ms = result.duration.as_millis() as u64,
            "Bulk historical processing finished"
        );
        result
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Count a failed write reported by a storage consumer.
    pub fn record_storage_error(&self) {
        self.inner.metrics.record_storage_error();
    }

    pub async fn health_check(&self) -> HealthReport {
        let snapshot = self.inner.metrics.snapshot();
        let thresholds = self.inner.thresholds;

        let (exchange_connectivity, exchanges) = match &self.inner.source {
            Some(source) => {
                let probe = tokio::time::timeout(
                    self.inner.config.health_probe_timeout(),
                    source.health_check(),
                )
                .await;
                match probe {
                    Ok(Ok(report)) => {
                        let all_up = !report.is_empty() && report.values().all(|ok| *ok);
                        let exchanges: BTreeMap<String, bool> = report
                            .into_iter()
                            .map(|(exchange, ok)| (exchange.to_string(), ok))
                            .collect();
                        (all_up, exchanges)
                    }
                    Ok(Err(e)) => {
                        warn!(error = %e, "Exchange connectivity probe failed");
                        (false, Default::default())
                    }
                    Err(_) => {
                        warn!("Exchange connectivity probe timed out");
                        (false, Default::default())
                    }
                }
            }
            None => (false, Default::default()),
        };

        let checks = HealthChecks {
            data_source: self.inner.source.is_some(),
            exchange_connectivity,
            data_quality: thresholds.validation_rate_ok(&snapshot)
                && thresholds.error_rate_ok(&snapshot),
            running: self.is_running(),
            error_rate: thresholds.error_rate_ok(&snapshot),
        };
        let status = checks.status();
        let alerts = thresholds.check(&snapshot);

        debug!(status = ?status, passed = checks.passed(), "Health check");

        HealthReport {
            status,
            checks,
            exchanges,
            metrics: snapshot,
            alerts,
        }
    }

    /// Quality per (symbol, timeframe). A failing pair is reported in
    /// place and does not affect the others.
    pub async fn get_data_quality_report(
        &self,
        symbols: &[Symbol],
        timeframes: &[Timeframe],
    ) -> DataQualityReport {
        let mut report = DataQualityReport::new();

        for symbol in symbols {
            for &timeframe in timeframes {
                let quality = match &self.inner.source {
                    Some(source) => match source.assess_data_quality(symbol, timeframe).await {
                        Ok(assessment) => PairQuality::Assessed(assessment),
                        Err(e) => {
                            warn!(symbol = %symbol, timeframe = %timeframe, error = %e, "Quality assessment failed");
                            PairQuality::failed(e)
                        }
                    },
                    None => PairQuality::failed(PipelineError::NoDataSource),
                };
                report.insert(symbol.clone(), timeframe, quality);
            }
        }

        info!(
            pairs = report.pair_count(),
            failed = report.failed_count(),
            average_overall = report.average_overall(),
            "Data quality report generated"
        );
        report
    }
}
