//! End-to-end pipeline scenarios
//!
//! Drives `MarketDataPipeline` through stub data sources:
//! - Aggregation of live candles into higher timeframes, base resolution only
//! - Quality rates under mixed valid/invalid input
//! - Bulk historical processing
//! - Lifecycle (idempotent start, start failure, draining stop)
//! - Health status thresholds and per-pair quality isolation

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use market_pipeline::config::ExchangeConfig;
use market_pipeline::events::{BulkProgress, PipelineEvent};
use market_pipeline::health::HealthStatus;
use market_pipeline::replay::ReplaySource;
use market_pipeline::source::{BulkCandles, ProgressCallback, QualityAssessment};
use market_pipeline::{
    BulkRequest, MarketDataPipeline, MarketDataSource, PipelineConfig, SourceError,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;
use types::ids::{ExchangeId, Symbol};
use types::market::{Candle, MarketData, Ticker};
use types::timeframe::Timeframe;

const T0: i64 = 1_640_995_200_000;
const MINUTE: i64 = 60_000;

fn candle(minute: i64, open: Decimal, high: Decimal, low: Decimal, close: Decimal, volume: Decimal) -> Candle {
    Candle {
        symbol: Symbol::new("BTCUSDT"),
        timeframe: Timeframe::M1,
        timestamp: T0 + minute * MINUTE,
        open,
        high,
        low,
        close,
        volume,
        exchange: ExchangeId::new("binance"),
    }
}

fn ticker(bid: Decimal, ask: Decimal) -> Ticker {
    Ticker {
        symbol: Symbol::new("BTCUSDT"),
        exchange: ExchangeId::new("binance"),
        price: dec!(3008),
        volume: dec!(100),
        timestamp: T0,
        bid,
        ask,
    }
}

fn five_candles() -> Vec<Candle> {
    vec![
        candle(0, dec!(100), dec!(105), dec!(99), dec!(104), dec!(1.5)),
        candle(1, dec!(104), dec!(110), dec!(103), dec!(108), dec!(2.0)),
        candle(2, dec!(108), dec!(109), dec!(95), dec!(96), dec!(0.5)),
        candle(3, dec!(96), dec!(101), dec!(96), dec!(100), dec!(1.0)),
        candle(4, dec!(100), dec!(102), dec!(98), dec!(101), dec!(3.0)),
    ]
}

fn config_with_targets(targets: &[&str]) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.aggregation.target_timeframes = targets.iter().map(|s| s.to_string()).collect();
    config
}

/// Configurable stand-in for an exchange connector.
#[derive(Default)]
struct StubSource {
    fail_start: bool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    sender: Mutex<Option<mpsc::Sender<MarketData>>>,
    bulk: Option<BulkCandles>,
    exchanges: BTreeMap<ExchangeId, bool>,
    health_delay: Option<Duration>,
    failing_symbols: Vec<Symbol>,
}

impl StubSource {
    fn healthy() -> Self {
        Self {
            exchanges: BTreeMap::from([(ExchangeId::new("binance"), true)]),
            ..Default::default()
        }
    }

    async fn emit(&self, item: MarketData) {
        let sender = self.sender.lock().unwrap().clone();
        sender.expect("source not started").send(item).await.unwrap();
    }
}

#[async_trait]
impl MarketDataSource for StubSource {
    async fn start(&self, sender: mpsc::Sender<MarketData>) -> Result<(), SourceError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(SourceError::Unavailable("connection refused".to_string()));
        }
        *self.sender.lock().unwrap() = Some(sender);
        Ok(())
    }

    async fn stop(&self) -> Result<(), SourceError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn bulk_fetch(
        &self,
        request: &BulkRequest,
        on_progress: Option<ProgressCallback>,
    ) -> Result<BulkCandles, SourceError> {
        let bulk = self
            .bulk
            .clone()
            .ok_or_else(|| SourceError::Fetch("rate limited".to_string()))?;
        if let Some(callback) = on_progress {
            callback(BulkProgress {
                completed: request.series_count(),
                total: request.series_count(),
                current: "done".to_string(),
            });
        }
        Ok(bulk)
    }

    async fn health_check(&self) -> Result<BTreeMap<ExchangeId, bool>, SourceError> {
        if let Some(delay) = self.health_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.exchanges.clone())
    }

    async fn assess_data_quality(
        &self,
        symbol: &Symbol,
        _timeframe: Timeframe,
    ) -> Result<QualityAssessment, SourceError> {
        if self.failing_symbols.contains(symbol) {
            return Err(SourceError::Assessment(format!("no history for {symbol}")));
        }
        Ok(QualityAssessment {
            completeness: 100.0,
            consistency: 100.0,
            freshness: 90.0,
            overall: 96.7,
            issues: vec![],
        })
    }
}

fn bulk_request() -> BulkRequest {
    BulkRequest {
        symbols: vec![Symbol::new("BTCUSDT")],
        timeframes: vec![Timeframe::M1],
        start: T0,
        end: T0 + 60 * MINUTE,
        exchange: None,
    }
}

#[test]
fn test_five_candles_make_one_final_five_minute_candle() {
    let pipeline = MarketDataPipeline::new(config_with_targets(&["5m"])).unwrap();
    let mut events = pipeline.subscribe();

    for c in five_candles() {
        assert!(pipeline.process_market_data(&MarketData::Candle(c)));
    }

    let mut finals = Vec::new();
    while let Ok(envelope) = events.try_recv() {
        if let PipelineEvent::AggregatedCandle { candle, source_candles, is_final: true } = envelope.event {
            finals.push((candle, source_candles));
        }
    }

    assert_eq!(finals.len(), 1);
    let (bar, source_candles) = &finals[0];
    assert_eq!(*source_candles, 5);
    assert_eq!(bar.timeframe, Timeframe::M5);
    assert_eq!(bar.timestamp, T0);
    assert_eq!(bar.open, dec!(100));
    assert_eq!(bar.close, dec!(101));
    assert_eq!(bar.high, dec!(110));
    assert_eq!(bar.low, dec!(95));
    assert_eq!(bar.volume, dec!(8.0));
}

#[test]
fn test_partial_bucket_volume() {
    let pipeline = MarketDataPipeline::new(config_with_targets(&["5m"])).unwrap();
    let mut events = pipeline.subscribe();

    for c in five_candles().into_iter().take(2) {
        pipeline.process_market_data(&MarketData::Candle(c));
    }

    let last = std::iter::from_fn(|| events.try_recv().ok())
        .filter_map(|envelope| match envelope.event {
            PipelineEvent::AggregatedCandle { candle, is_final, .. } => Some((candle, is_final)),
            _ => None,
        })
        .last()
        .unwrap();
    assert!(!last.1);
    assert_eq!(last.0.volume, dec!(3.5));
}

#[test]
fn test_mixed_resolution_feed_aggregates_base_only() {
    let pipeline = MarketDataPipeline::new(config_with_targets(&["15m"])).unwrap();
    let mut events = pipeline.subscribe();

    for c in five_candles() {
        pipeline.process_market_data(&MarketData::Candle(c));
    }
    // The exchange also reports the same five minutes as one 5m candle
    let mut five = candle(0, dec!(100), dec!(110), dec!(95), dec!(101), dec!(8.0));
    five.timeframe = Timeframe::M5;
    assert!(pipeline.process_market_data(&MarketData::Candle(five)));

    let emissions: Vec<(Candle, u32)> = std::iter::from_fn(|| events.try_recv().ok())
        .filter_map(|envelope| match envelope.event {
            PipelineEvent::AggregatedCandle { candle, source_candles, .. } => Some((candle, source_candles)),
            _ => None,
        })
        .collect();
    assert_eq!(emissions.len(), 5);
    let (bar, source_candles) = &emissions[4];
    assert_eq!(*source_candles, 5);
    assert_eq!(bar.volume, dec!(8.0));
    assert_eq!(pipeline.get_metrics().processed.candles, 6);
}

#[test]
fn test_quality_rates_with_mixed_input() {
    let pipeline = MarketDataPipeline::new(PipelineConfig::default()).unwrap();

    for _ in 0..8 {
        assert!(pipeline.process_market_data(&MarketData::Ticker(ticker(dec!(3005), dec!(3010)))));
    }
    for _ in 0..2 {
        assert!(!pipeline.process_market_data(&MarketData::Ticker(ticker(dec!(3010), dec!(3005)))));
    }

    let metrics = pipeline.get_metrics();
    assert_eq!(metrics.processed.tickers, 8);
    assert_eq!(metrics.errors.validation, 2);
    assert!((metrics.validation_rate - 80.0).abs() < 0.1);
    assert!((metrics.error_rate - 20.0).abs() < 0.1);
}

#[tokio::test]
async fn test_bulk_with_one_valid_candle() {
    let bulk: BulkCandles = BTreeMap::from([(
        Symbol::new("BTCUSDT"),
        BTreeMap::from([(Timeframe::M1, vec![five_candles().remove(0)])]),
    )]);
    let source = Arc::new(StubSource {
        bulk: Some(bulk),
        ..StubSource::healthy()
    });
    let pipeline = MarketDataPipeline::with_source(PipelineConfig::default(), source).unwrap();
    let mut events = pipeline.subscribe();

    let result = pipeline.bulk_process_historical_data(bulk_request()).await;
    assert!(result.success);
    assert_eq!(result.processed, 1);
    assert_eq!(result.errors, 0);

    let progress = std::iter::from_fn(|| events.try_recv().ok())
        .any(|envelope| matches!(envelope.event, PipelineEvent::BulkProgress(_)));
    assert!(progress);
}

#[tokio::test]
async fn test_bulk_counts_invalid_and_replays_in_order() {
    let mut candles = five_candles();
    candles.reverse();
    candles.push(candle(5, dec!(-1), dec!(1), dec!(-2), dec!(1), dec!(1)));
    let bulk: BulkCandles = BTreeMap::from([(
        Symbol::new("BTCUSDT"),
        BTreeMap::from([(Timeframe::M1, candles)]),
    )]);
    let source = Arc::new(StubSource {
        bulk: Some(bulk),
        ..StubSource::healthy()
    });
    let pipeline =
        MarketDataPipeline::with_source(config_with_targets(&["5m"]), source).unwrap();
    let mut events = pipeline.subscribe();

    let result = pipeline.bulk_process_historical_data(bulk_request()).await;
    assert!(!result.success);
    assert_eq!(result.processed, 5);
    assert_eq!(result.errors, 1);

    // sorted replay completes the bucket with the true open
    let finals: Vec<Candle> = std::iter::from_fn(|| events.try_recv().ok())
        .filter_map(|envelope| match envelope.event {
            PipelineEvent::AggregatedCandle { candle, is_final: true, .. } => Some(candle),
            _ => None,
        })
        .collect();
    assert_eq!(finals.len(), 1);
    assert_eq!(finals[0].open, dec!(100));
}

#[tokio::test]
async fn test_bulk_fetch_failure_is_soft() {
    let pipeline =
        MarketDataPipeline::with_source(PipelineConfig::default(), Arc::new(StubSource::healthy()))
            .unwrap();

    let result = pipeline.bulk_process_historical_data(bulk_request()).await;
    assert!(!result.success);
    assert_eq!(result.processed, 0);
    assert_eq!(result.errors, 1);
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let source = Arc::new(StubSource::healthy());
    let pipeline =
        MarketDataPipeline::with_source(PipelineConfig::default(), source.clone()).unwrap();

    pipeline.start().await.unwrap();
    pipeline.start().await.unwrap();
    assert_eq!(source.starts.load(Ordering::SeqCst), 1);
    assert!(pipeline.is_running());

    pipeline.stop().await.unwrap();
    pipeline.stop().await.unwrap();
    assert_eq!(source.stops.load(Ordering::SeqCst), 1);
    assert!(!pipeline.is_running());
}

#[tokio::test]
async fn test_start_failure_leaves_pipeline_stopped() {
    let source = Arc::new(StubSource {
        fail_start: true,
        ..StubSource::healthy()
    });
    let pipeline =
        MarketDataPipeline::with_source(PipelineConfig::default(), source.clone()).unwrap();

    let err = pipeline.start().await.unwrap_err();
    assert!(err.to_string().contains("connection refused"));
    assert!(!pipeline.is_running());

    // a later start retries the source
    let _ = pipeline.start().await;
    assert_eq!(source.starts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_restart_resets_metrics() {
    let pipeline = MarketDataPipeline::new(PipelineConfig::default()).unwrap();
    pipeline.start().await.unwrap();
    pipeline.process_market_data(&MarketData::Ticker(ticker(dec!(3005), dec!(3010))));
    pipeline.stop().await.unwrap();
    assert_eq!(pipeline.get_metrics().processed.tickers, 1);

    pipeline.start().await.unwrap();
    assert_eq!(pipeline.get_metrics().processed.total(), 0);
    pipeline.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_drains_live_items() {
    let mut config = PipelineConfig::default();
    config.processing.batch_size = 1000;
    config.processing.processing_interval_ms = 60_000;
    let source = Arc::new(StubSource::healthy());
    let pipeline = MarketDataPipeline::with_source(config, source.clone()).unwrap();

    pipeline.start().await.unwrap();
    for c in five_candles() {
        source.emit(MarketData::Candle(c)).await;
    }
    assert_eq!(pipeline.get_metrics().processed.total(), 0);

    pipeline.stop().await.unwrap();
    let metrics = pipeline.get_metrics();
    assert_eq!(metrics.processed.candles, 5);
    assert_eq!(pipeline.queued(), 0);
}

#[tokio::test]
async fn test_timer_flushes_queue() {
    let mut config = PipelineConfig::default();
    config.processing.processing_interval_ms = 20;
    let pipeline = MarketDataPipeline::new(config).unwrap();
    pipeline.start().await.unwrap();

    assert!(pipeline.submit(MarketData::Ticker(ticker(dec!(3005), dec!(3010)))));

    tokio::time::timeout(Duration::from_secs(5), async {
        while pipeline.get_metrics().processed.tickers == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timer flush did not happen");
    pipeline.stop().await.unwrap();
}

#[tokio::test]
async fn test_disabled_exchange_is_filtered() {
    let mut config = PipelineConfig::default();
    config.exchanges.insert(
        "okx".to_string(),
        ExchangeConfig {
            enabled: true,
            symbols: vec![],
            timeframes: vec![],
        },
    );
    let pipeline = MarketDataPipeline::new(config).unwrap();
    pipeline.start().await.unwrap();

    assert!(!pipeline.submit(MarketData::Ticker(ticker(dec!(3005), dec!(3010)))));
    pipeline.stop().await.unwrap();

    let metrics = pipeline.get_metrics();
    assert_eq!(metrics.filtered, 1);
    assert_eq!(metrics.processed.total(), 0);
}

#[tokio::test]
async fn test_health_status_thresholds() {
    let pipeline =
        MarketDataPipeline::with_source(PipelineConfig::default(), Arc::new(StubSource::healthy()))
            .unwrap();

    // running, source present and connected, no traffic
    pipeline.start().await.unwrap();
    let report = pipeline.health_check().await;
    assert_eq!(report.status, HealthStatus::Healthy);
    assert_eq!(report.checks.passed(), 5);
    assert_eq!(report.exchanges.get("binance"), Some(&true));

    // not running: 4 of 5
    pipeline.stop().await.unwrap();
    let report = pipeline.health_check().await;
    assert_eq!(report.status, HealthStatus::Degraded);

    // not running and one exchange down: 3 of 5
    let source = StubSource {
        exchanges: BTreeMap::from([
            (ExchangeId::new("binance"), true),
            (ExchangeId::new("okx"), false),
        ]),
        ..Default::default()
    };
    let pipeline =
        MarketDataPipeline::with_source(PipelineConfig::default(), Arc::new(source)).unwrap();
    let report = pipeline.health_check().await;
    assert!(!report.checks.exchange_connectivity);
    assert_eq!(report.status, HealthStatus::Unhealthy);
}

#[tokio::test]
async fn test_health_degrades_on_error_rate() {
    let pipeline =
        MarketDataPipeline::with_source(PipelineConfig::default(), Arc::new(StubSource::healthy()))
            .unwrap();
    pipeline.start().await.unwrap();

    pipeline.process_market_data(&MarketData::Ticker(ticker(dec!(3005), dec!(3010))));
    pipeline.process_market_data(&MarketData::Ticker(ticker(dec!(3010), dec!(3005))));

    let report = pipeline.health_check().await;
    assert!(!report.checks.data_quality);
    assert!(!report.checks.error_rate);
    assert_eq!(report.status, HealthStatus::Unhealthy);
    assert!(!report.alerts.is_empty());
    pipeline.stop().await.unwrap();
}

#[tokio::test]
async fn test_health_probe_is_bounded() {
    let mut config = PipelineConfig::default();
    config.health.probe_timeout_ms = 50;
    let source = StubSource {
        health_delay: Some(Duration::from_secs(5)),
        ..StubSource::healthy()
    };
    let pipeline = MarketDataPipeline::with_source(config, Arc::new(source)).unwrap();

    let report = tokio::time::timeout(Duration::from_secs(2), pipeline.health_check())
        .await
        .expect("health check exceeded its probe timeout");
    assert!(!report.checks.exchange_connectivity);
}

#[tokio::test]
async fn test_quality_report_isolates_failures() {
    let source = StubSource {
        failing_symbols: vec![Symbol::new("ETHUSDT")],
        ..StubSource::healthy()
    };
    let pipeline = MarketDataPipeline::with_source(PipelineConfig::default(), Arc::new(source)).unwrap();

    let symbols = [Symbol::new("BTCUSDT"), Symbol::new("ETHUSDT")];
    let report = pipeline
        .get_data_quality_report(&symbols, &[Timeframe::M1, Timeframe::H1])
        .await;

    assert_eq!(report.pair_count(), 4);
    let eth = report.get(&Symbol::new("ETHUSDT"), Timeframe::M1).unwrap();
    assert!(eth.is_failed());
    assert_eq!(eth.overall(), 0.0);

    let btc = report.get(&Symbol::new("BTCUSDT"), Timeframe::H1).unwrap();
    assert!(!btc.is_failed());
    assert!((btc.overall() - 96.7).abs() < 1e-9);
}

#[tokio::test]
async fn test_replay_source_end_to_end() {
    let items: Vec<MarketData> = five_candles().into_iter().map(MarketData::Candle).collect();
    let mut config = config_with_targets(&["5m"]);
    config.processing.batch_size = 1;
    let pipeline =
        MarketDataPipeline::with_source(config, Arc::new(ReplaySource::new(items))).unwrap();
    let mut events = pipeline.subscribe();

    pipeline.start().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while pipeline.get_metrics().processed.candles < 5 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("replay did not complete");
    pipeline.stop().await.unwrap();

    let mut saw_final = false;
    let mut last_sequence = 0;
    while let Ok(envelope) = events.try_recv() {
        assert!(envelope.sequence > last_sequence);
        last_sequence = envelope.sequence;
        if let PipelineEvent::AggregatedCandle { candle, is_final: true, .. } = envelope.event {
            assert_eq!(candle.volume, dec!(8.0));
            saw_final = true;
        }
    }
    assert!(saw_final);
}
