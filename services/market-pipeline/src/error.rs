//! Pipeline error types

use crate::aggregator::AggregationError;
use crate::source::SourceError;

/// Errors surfaced by pipeline lifecycle and configuration.
///
/// Per-item failures are never returned as errors: they are counted and
/// signaled as events instead.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("data source failed to start: {0}")]
    SourceStart(#[source] SourceError),

    #[error("no data source attached")]
    NoDataSource,

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("aggregation failed: {0}")]
    Aggregation(#[from] AggregationError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
