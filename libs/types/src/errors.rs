//! Error types for the market data types library

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TypesError {
    #[error("Unknown timeframe: {0}")]
    UnknownTimeframe(String),

    #[error("Unknown market data kind: {0}")]
    UnknownKind(String),

    #[error("Malformed {kind} payload: {reason}")]
    MalformedPayload { kind: String, reason: String },
}
