//! Pipeline configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! `config/pipeline` file (any format the crate supports), then
//! `MARKET_PIPELINE__*` environment variables. A `.env` file is loaded
//! into the environment first.
//!
//! Example: `MARKET_PIPELINE__PROCESSING__BATCH_SIZE=500`.

use std::collections::BTreeMap;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use types::market::MarketData;
use types::timeframe::Timeframe;

use crate::error::{PipelineError, Result};
use crate::metrics::QualityThresholds;

pub const ENV_PREFIX: &str = "MARKET_PIPELINE";
pub const DEFAULT_CONFIG_FILE: &str = "config/pipeline";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub processing: ProcessingConfig,
    pub quality: QualityConfig,
    pub aggregation: AggregationConfig,
    /// Per-exchange enablement. Empty means every exchange is accepted.
    #[serde(default)]
    pub exchanges: BTreeMap<String, ExchangeConfig>,
    pub health: HealthConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Queue length that triggers an immediate flush.
    pub batch_size: usize,
    pub processing_interval_ms: u64,
    /// Extra flushes after a timer flush leaves items queued.
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    /// Capacity of the source → pipeline mpsc channel.
    pub channel_capacity: usize,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
    pub drain_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Percent, 0–100.
    pub min_validation_rate: f64,
    /// Percent, 0–100.
    pub max_error_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Timeframe of the candles that are folded. Candles of any other
    /// timeframe still validate but are not aggregated.
    #[serde(default = "default_base_timeframe")]
    pub base_timeframe: String,
    /// Target timeframes such as "5m" or "1h".
    pub target_timeframes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Accepted symbols. Empty accepts all.
    #[serde(default)]
    pub symbols: Vec<String>,
    /// Accepted candle timeframes. Empty accepts all.
    #[serde(default)]
    pub timeframes: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_base_timeframe() -> String {
    "1m".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Upper bound on the data source connectivity probe.
    pub probe_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// JSON-lines capture to replay as the live data source.
    pub path: Option<String>,
    /// Delay between replayed items.
    #[serde(default)]
    pub pace_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            processing: ProcessingConfig {
                batch_size: 100,
                processing_interval_ms: 1000,
                retry_attempts: 3,
                retry_delay_ms: 1000,
                channel_capacity: 10_000,
                event_capacity: 1024,
                drain_timeout_ms: 5000,
            },
            quality: QualityConfig {
                min_validation_rate: 95.0,
                max_error_rate: 5.0,
            },
            aggregation: AggregationConfig {
                base_timeframe: default_base_timeframe(),
                target_timeframes: ["5m", "15m", "1h", "4h", "1d"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            },
            exchanges: BTreeMap::new(),
            health: HealthConfig {
                probe_timeout_ms: 2000,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
            replay: ReplayConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from `.env`, the default config file and the environment.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load with an explicit config file path (extension optional).
    pub fn load_from(path: &str) -> Result<Self> {
        let config = Config::builder()
            // Processing defaults
            .set_default("processing.batch_size", 100)?
            .set_default("processing.processing_interval_ms", 1000)?
            .set_default("processing.retry_attempts", 3)?
            .set_default("processing.retry_delay_ms", 1000)?
            .set_default("processing.channel_capacity", 10_000)?
            .set_default("processing.event_capacity", 1024)?
            .set_default("processing.drain_timeout_ms", 5000)?
            // Quality thresholds
            .set_default("quality.min_validation_rate", 95.0)?
            .set_default("quality.max_error_rate", 5.0)?
            // Aggregation
            .set_default("aggregation.base_timeframe", "1m")?
            .set_default(
                "aggregation.target_timeframes",
                vec!["5m", "15m", "1h", "4h", "1d"],
            )?
            .set_default("health.probe_timeout_ms", 2000)?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("aggregation.target_timeframes")
                    .try_parsing(true),
            )
            .build()?;

        let pipeline_config: PipelineConfig = config.try_deserialize()?;
        pipeline_config.validate()?;
        Ok(pipeline_config)
    }

    /// Check value ranges and that every timeframe string parses.
    pub fn validate(&self) -> Result<()> {
        if self.processing.batch_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "processing.batch_size must be greater than 0".to_string(),
            ));
        }
        if self.processing.channel_capacity == 0 || self.processing.event_capacity == 0 {
            return Err(PipelineError::InvalidConfig(
                "channel capacities must be greater than 0".to_string(),
            ));
        }
        for (name, rate) in [
            ("quality.min_validation_rate", self.quality.min_validation_rate),
            ("quality.max_error_rate", self.quality.max_error_rate),
        ] {
            if !(0.0..=100.0).contains(&rate) {
                return Err(PipelineError::InvalidConfig(format!(
                    "{name} must be within 0-100, got {rate}"
                )));
            }
        }

        let base = self.base_timeframe()?;
        let targets = self.target_timeframes()?;
        if !targets.is_empty() && !targets.iter().any(|target| target.is_multiple_of(base)) {
            return Err(PipelineError::InvalidConfig(format!(
                "aggregation.target_timeframes: none is a multiple of base timeframe {base}"
            )));
        }
        for (exchange, cfg) in &self.exchanges {
            for tf in &cfg.timeframes {
                tf.parse::<Timeframe>().map_err(|e| {
                    PipelineError::InvalidConfig(format!("exchanges.{exchange}.timeframes: {e}"))
                })?;
            }
        }
        Ok(())
    }

    /// Parsed aggregation base timeframe.
    pub fn base_timeframe(&self) -> Result<Timeframe> {
        self.aggregation.base_timeframe.parse::<Timeframe>().map_err(|e| {
            PipelineError::InvalidConfig(format!("aggregation.base_timeframe: {e}"))
        })
    }

    /// Parsed aggregation targets.
    pub fn target_timeframes(&self) -> Result<Vec<Timeframe>> {
        self.aggregation
            .target_timeframes
            .iter()
            .map(|s| {
                s.parse::<Timeframe>().map_err(|e| {
                    PipelineError::InvalidConfig(format!("aggregation.target_timeframes: {e}"))
                })
            })
            .collect()
    }

    pub fn thresholds(&self) -> QualityThresholds {
        QualityThresholds {
            min_validation_rate: self.quality.min_validation_rate,
            max_error_rate: self.quality.max_error_rate,
        }
    }

    /// Whether a live item passes exchange, symbol and timeframe enablement.
    pub fn accepts(&self, item: &MarketData) -> bool {
        if self.exchanges.is_empty() {
            return true;
        }

        let Some(exchange) = self
            .exchanges
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(item.exchange().as_str()))
            .map(|(_, cfg)| cfg)
        else {
            return false;
        };

        if !exchange.enabled {
            return false;
        }

        if !exchange.symbols.is_empty()
            && !exchange
                .symbols
                .iter()
                .any(|s| s.eq_ignore_ascii_case(item.symbol().as_str()))
        {
            return false;
        }

        match item.timeframe() {
            Some(tf) if !exchange.timeframes.is_empty() => exchange
                .timeframes
                .iter()
                .any(|s| s.parse::<Timeframe>().map(|t| t == tf).unwrap_or(false)),
            _ => true,
        }
    }

    pub fn processing_interval(&self) -> Duration {
        Duration::from_millis(self.processing.processing_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.processing.retry_delay_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.processing.drain_timeout_ms)
    }

    pub fn health_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.health.probe_timeout_ms)
    }
}
