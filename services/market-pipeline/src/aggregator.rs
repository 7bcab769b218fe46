//! Timeframe aggregation of base candles
//!
//! Folds base-resolution candles (1m unless configured otherwise) into
//! every configured higher timeframe. Only candles of the base timeframe
//! are folded, so a symbol fed several resolutions is not double-counted.
//! State is kept per (symbol, target timeframe) and holds one bucket at a
//! time: a candle for a later bucket replaces the state in place, so
//! memory is bounded by symbols × targets.
//!
//! Every fold emits the current state of the bucket. Consumers treat
//! repeated emissions for the same bucket timestamp as upserts. Gaps in
//! the input are not back-filled.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use types::ids::{ExchangeId, Symbol};
use types::market::Candle;
use types::timeframe::Timeframe;

/// Errors raised while folding a candle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregationError {
    #[error("volume overflow folding into {symbol} {timeframe} bucket {bucket_start}")]
    VolumeOverflow {
        symbol: Symbol,
        timeframe: Timeframe,
        bucket_start: i64,
    },
}

/// One emission of a synthesized higher-timeframe candle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedCandle {
    /// Candle with `timeframe` set to the target and `timestamp` to the bucket start.
    pub candle: Candle,
    /// Number of base candles folded into this bucket so far.
    pub source_candles: u32,
    /// Whether the bucket is complete.
    pub is_final: bool,
}

/// In-progress state for one (symbol, target timeframe) key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationState {
    pub symbol: Symbol,
    pub exchange: ExchangeId,
    pub timeframe: Timeframe,
    pub bucket_start: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub source_candles: u32,
    /// Set once the bucket's last base period has been folded or a later
    /// bucket has started.
    pub finalized: bool,
}

impl AggregationState {
    /// Open a bucket from its first contributing candle.
    fn open(candle: &Candle, timeframe: Timeframe, bucket_start: i64) -> Self {
        Self {
            symbol: candle.symbol.clone(),
            exchange: candle.exchange.clone(),
            timeframe,
            bucket_start,
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
            volume: candle.volume,
            source_candles: 1,
            finalized: false,
        }
    }

    fn folded_volume(&self, candle: &Candle) -> Result<Decimal, AggregationError> {
        self.volume
            .checked_add(candle.volume)
            .ok_or_else(|| AggregationError::VolumeOverflow {
                symbol: self.symbol.clone(),
                timeframe: self.timeframe,
                bucket_start: self.bucket_start,
            })
    }

    /// Fold a later candle of the same bucket. Leaves the state untouched
    /// on error.
    fn fold(&mut self, candle: &Candle) -> Result<(), AggregationError> {
        let volume = self.folded_volume(candle)?;
        if candle.high > self.high {
            self.high = candle.high;
        }
        if candle.low < self.low {
            self.low = candle.low;
        }
        self.close = candle.close;
        self.volume = volume;
        self.source_candles = self.source_candles.saturating_add(1);
        Ok(())
    }

    /// Exclusive end of the bucket.
    pub fn bucket_end(&self) -> i64 {
        self.bucket_start.saturating_add(self.timeframe.duration_ms())
    }

    fn to_candle(&self) -> Candle {
        Candle {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
            timestamp: self.bucket_start,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            exchange: self.exchange.clone(),
        }
    }

    fn emit(&self) -> AggregatedCandle {
        AggregatedCandle {
            candle: self.to_candle(),
            source_candles: self.source_candles,
            is_final: self.finalized,
        }
    }
}

/// Rolling multi-timeframe aggregator.
///
/// Not internally synchronized; the pipeline serializes access.
#[derive(Debug, Clone)]
pub struct TimeframeAggregator {
    /// Timeframe of the candles that are folded.
    base: Timeframe,
    /// Target timeframes, shortest first, deduplicated, each a multiple of `base`.
    targets: Vec<Timeframe>,
    /// Current bucket per (symbol, target). BTreeMap for deterministic iteration.
    states: BTreeMap<(Symbol, Timeframe), AggregationState>,
}

impl TimeframeAggregator {
    /// Targets that are not a whole multiple of `base` are dropped.
    pub fn new(base: Timeframe, targets: impl IntoIterator<Item = Timeframe>) -> Self {
        let mut targets: Vec<Timeframe> = targets.into_iter().collect();
        targets.sort();
        targets.dedup();
        targets.retain(|target| {
            let usable = target.is_multiple_of(base);
            if !usable {
                warn!(base = %base, target = %target, "Dropping target that is not a multiple of the base timeframe");
            }
            usable
        });

        Self {
            base,
            targets,
            states: BTreeMap::new(),
        }
    }

    pub fn base(&self) -> Timeframe {
        self.base
    }

    pub fn targets(&self) -> &[Timeframe] {
        &self.targets
    }

    /// Fold one base candle into every target.
    ///
    /// Returns the emissions in target order. When a candle opens a new
    /// bucket while the previous one was never marked final, the previous
    /// bucket is emitted once more as final before the new partial.
    /// Candles of any other timeframe produce no emissions.
    ///
    /// On error no state has been modified.
    pub fn process_candle(&mut self, candle: &Candle) -> Result<Vec<AggregatedCandle>, AggregationError> {
        if candle.timeframe != self.base {
            debug!(
                symbol = %candle.symbol,
                timeframe = %candle.timeframe,
                base = %self.base,
                "Skipping candle that is not of the base timeframe"
            );
            return Ok(Vec::new());
        }

        // Check every fold before mutating so a failure is all-or-nothing.
        for &target in &self.targets {
            let bucket_start = target.align_to_boundary(candle.timestamp);
            if let Some(state) = self.states.get(&(candle.symbol.clone(), target)) {
                if state.bucket_start == bucket_start {
                    state.folded_volume(candle)?;
                }
            }
        }

        let mut emitted = Vec::with_capacity(self.targets.len());
        for &target in &self.targets {
            let bucket_start = target.align_to_boundary(candle.timestamp);
            let key = (candle.symbol.clone(), target);

            let state = match self.states.entry(key) {
                Entry::Vacant(slot) => slot.insert(AggregationState::open(candle, target, bucket_start)),
                Entry::Occupied(slot) => {
                    let state = slot.into_mut();
                    if state.bucket_start == bucket_start {
                        state.fold(candle)?;
                    } else if bucket_start < state.bucket_start {
                        debug!(
                            symbol = %candle.symbol,
                            timeframe = %target,
                            candle_ts = candle.timestamp,
                            current_bucket = state.bucket_start,
                            "Skipping candle older than current bucket"
                        );
                        continue;
                    } else {
                        // Boundary flush: the previous bucket can receive nothing further
                        if !state.finalized {
                            state.finalized = true;
                            emitted.push(state.emit());
                        }
                        *state = AggregationState::open(candle, target, bucket_start);
                    }
                    state
                }
            };

            if candle.end_timestamp() >= state.bucket_end() {
                state.finalized = true;
            }
            emitted.push(state.emit());
        }

        Ok(emitted)
    }

    /// Current bucket state for a key.
    pub fn current(&self, symbol: &Symbol, timeframe: Timeframe) -> Option<&AggregationState> {
        self.states.get(&(symbol.clone(), timeframe))
    }
}
