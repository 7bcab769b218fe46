//! Batch queue between intake and processing
//!
//! Items arriving from the data source (or pushed by a host through
//! `submit`) are buffered here. The queue is drained when it reaches the
//! batch size, on every timer tick, and once more on shutdown.

use std::collections::VecDeque;

use tracing::debug;
use types::market::MarketData;

/// Outcome of pushing an item onto the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Item queued; batch not yet full.
    Queued,
    /// Item queued and the batch size has been reached.
    BatchReady,
}

/// FIFO of items awaiting processing.
pub struct BatchQueue {
    buffer: VecDeque<MarketData>,
    batch_size: usize,
}

impl BatchQueue {
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            buffer: VecDeque::with_capacity(batch_size),
            batch_size,
        }
    }

    pub fn push(&mut self, item: MarketData) -> PushOutcome {
        self.buffer.push_back(item);

        if self.buffer.len() >= self.batch_size {
            PushOutcome::BatchReady
        } else {
            PushOutcome::Queued
        }
    }

    /// Take every queued item in arrival order.
    pub fn drain(&mut self) -> Vec<MarketData> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let batch: Vec<MarketData> = self.buffer.drain(..).collect();
        debug!(batch_len = batch.len(), "Batch drained");
        batch
    }

    /// Number of items waiting to be drained.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
