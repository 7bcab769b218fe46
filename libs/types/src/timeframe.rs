//! Candle timeframes
//!
//! Boundaries are aligned to the Unix epoch in UTC: a 5m candle starting
//! at 12:05:00 covers `[12:05:00, 12:10:00)`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::TypesError;

/// Supported candle timeframes.
///
/// Ordering follows duration, so `M1 < M5 < H1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "3m")]
    M3,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "6h")]
    H6,
    #[serde(rename = "12h")]
    H12,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "1w")]
    W1,
}

const MINUTE_MS: i64 = 60_000;

impl Timeframe {
    /// Duration of this timeframe in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        match self {
            Timeframe::M1 => MINUTE_MS,
            Timeframe::M3 => 3 * MINUTE_MS,
            Timeframe::M5 => 5 * MINUTE_MS,
            Timeframe::M15 => 15 * MINUTE_MS,
            Timeframe::M30 => 30 * MINUTE_MS,
            Timeframe::H1 => 60 * MINUTE_MS,
            Timeframe::H2 => 2 * 60 * MINUTE_MS,
            Timeframe::H4 => 4 * 60 * MINUTE_MS,
            Timeframe::H6 => 6 * 60 * MINUTE_MS,
            Timeframe::H12 => 12 * 60 * MINUTE_MS,
            Timeframe::D1 => 24 * 60 * MINUTE_MS,
            Timeframe::W1 => 7 * 24 * 60 * MINUTE_MS,
        }
    }

    /// All supported timeframes, shortest first.
    pub fn all() -> &'static [Timeframe] {
        &[
            Timeframe::M1,
            Timeframe::M3,
            Timeframe::M5,
            Timeframe::M15,
            Timeframe::M30,
            Timeframe::H1,
            Timeframe::H2,
            Timeframe::H4,
            Timeframe::H6,
            Timeframe::H12,
            Timeframe::D1,
            Timeframe::W1,
        ]
    }

    /// Align a millisecond timestamp to the start of its bucket (floor).
    ///
    /// Uses euclidean division so pre-epoch timestamps still floor.
    pub fn align_to_boundary(&self, timestamp_ms: i64) -> i64 {
        let duration = self.duration_ms();
        timestamp_ms.saturating_sub(timestamp_ms.rem_euclid(duration))
    }

    /// True if a bucket of `self` is made of a whole number of `base` buckets.
    pub fn is_multiple_of(&self, base: Timeframe) -> bool {
        self.duration_ms() > base.duration_ms() && self.duration_ms() % base.duration_ms() == 0
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H4 => "4h",
            Timeframe::H6 => "6h",
            Timeframe::H12 => "12h",
            Timeframe::D1 => "1d",
            Timeframe::W1 => "1w",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim();
        Timeframe::all()
            .iter()
            .copied()
            .find(|tf| tf.as_str().eq_ignore_ascii_case(normalized))
            .ok_or_else(|| TypesError::UnknownTimeframe(s.to_string()))
    }
}
