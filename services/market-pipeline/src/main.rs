use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use market_pipeline::events::PipelineEvent;
use market_pipeline::health::HealthStatus;
use market_pipeline::replay::ReplaySource;
use market_pipeline::{MarketDataPipeline, PipelineConfig};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = PipelineConfig::load().context("Failed to load configuration")?;
    init_tracing(&config.logging.level, config.logging.json);

    tracing::info!(version = market_pipeline::SERVICE_VERSION, "Starting market data pipeline");

    let pipeline = match &config.replay.path {
        Some(path) => {
            let source = ReplaySource::from_file(path)
                .await
                .with_context(|| format!("Failed to load replay capture {path}"))?
                .with_pace(Duration::from_millis(config.replay.pace_ms));
            if source.is_empty() {
                tracing::warn!(path = %path, "Replay capture holds no items");
            }
            MarketDataPipeline::with_source(config.clone(), Arc::new(source))?
        }
        None => MarketDataPipeline::new(config.clone())?,
    };

    let mut events = pipeline.subscribe();
    let event_logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(envelope) => match &envelope.event {
                    PipelineEvent::AggregatedCandle { candle, is_final: true, source_candles } => {
                        tracing::info!(
                            sequence = envelope.sequence,
                            symbol = %candle.symbol,
                            timeframe = %candle.timeframe,
                            timestamp = candle.timestamp,
                            close = %candle.close,
                            volume = %candle.volume,
                            source_candles,
                            "Candle closed"
                        );
                    }
                    PipelineEvent::ValidationError { kind, data, reason } => {
                        tracing::warn!(
                            sequence = envelope.sequence,
                            kind = %kind,
                            symbol = %data.symbol(),
                            reason = %reason,
                            "Item rejected"
                        );
                    }
                    PipelineEvent::BulkProgress(progress) => {
                        tracing::info!(
                            completed = progress.completed,
                            total = progress.total,
                            current = %progress.current,
                            "Bulk progress"
                        );
                    }
                    other => tracing::debug!(sequence = envelope.sequence, event = other.label(), "Event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event logger lagging");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    pipeline.start().await.context("Failed to start pipeline")?;

    let mut health_interval = tokio::time::interval(HEALTH_LOG_INTERVAL);
    health_interval.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
            _ = health_interval.tick() => {
                let report = pipeline.health_check().await;
                let m = &report.metrics;
                match report.status {
                    HealthStatus::Healthy => tracing::info!(
                        processed = m.processed.total(),
                        throughput = m.throughput,
                        validation_rate = m.validation_rate,
                        "Pipeline healthy"
                    ),
                    status => tracing::warn!(
                        status = ?status,
                        checks = ?report.checks,
                        alerts = report.alerts.len(),
                        "Pipeline not healthy"
                    ),
                }
            }
        }
    }

    pipeline.stop().await?;
    event_logger.abort();

    let metrics = pipeline.get_metrics();
    tracing::info!(
        processed = metrics.processed.total(),
        validation_errors = metrics.errors.validation,
        processing_errors = metrics.errors.processing,
        filtered = metrics.filtered,
        "Market data pipeline stopped"
    );

    Ok(())
}
