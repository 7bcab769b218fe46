//! Events emitted by the pipeline
//!
//! Every emission is wrapped in an [`EventEnvelope`] carrying a UUID v7 id
//! and a per-bus monotonic sequence, then fanned out over a
//! `tokio::sync::broadcast` channel. Publishing with no subscribers is not
//! an error.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use types::market::{Candle, DataKind, MarketData};
use uuid::Uuid;

/// Progress of a bulk historical fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkProgress {
    pub completed: u64,
    pub total: u64,
    /// Series currently being fetched, e.g. `BTCUSDT 1m`.
    pub current: String,
}

/// Pipeline event payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    Started,
    Stopped,
    DataProcessed {
        kind: DataKind,
        data: MarketData,
    },
    ValidationError {
        kind: DataKind,
        data: MarketData,
        reason: String,
    },
    /// A raw payload that could not be decoded into its kind's shape.
    MalformedInput {
        kind: DataKind,
        payload: serde_json::Value,
        reason: String,
    },
    ProcessingError {
        kind: DataKind,
        data: MarketData,
        error: String,
    },
    AggregatedCandle {
        candle: Candle,
        source_candles: u32,
        is_final: bool,
    },
    BulkProgress(BulkProgress),
}

impl PipelineEvent {
    /// Event type label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            PipelineEvent::Started => "started",
            PipelineEvent::Stopped => "stopped",
            PipelineEvent::DataProcessed { .. } => "data_processed",
            PipelineEvent::ValidationError { .. } => "validation_error",
            PipelineEvent::MalformedInput { .. } => "malformed_input",
            PipelineEvent::ProcessingError { .. } => "processing_error",
            PipelineEvent::AggregatedCandle { .. } => "aggregated_candle",
            PipelineEvent::BulkProgress(_) => "bulk_progress",
        }
    }
}

/// An emitted event with its identity and ordering metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event identifier (UUID v7)
    pub event_id: Uuid,
    /// Monotonic per-pipeline sequence, starting at 1
    pub sequence: u64,
    pub emitted_at: DateTime<Utc>,
    pub event: PipelineEvent,
}

/// Broadcast fan-out of pipeline events.
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
    sequence: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sequence: AtomicU64::new(0),
        }
    }

    /// Wrap and publish an event. Returns the assigned sequence.
    pub fn publish(&self, event: PipelineEvent) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let envelope = EventEnvelope {
            event_id: Uuid::now_v7(),
            sequence,
            emitted_at: Utc::now(),
            event,
        };
        // Err only means there is currently no receiver.
        let _ = self.sender.send(envelope);
        sequence
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(8);
        assert_eq!(bus.publish(PipelineEvent::Started), 1);
        assert_eq!(bus.publish(PipelineEvent::Stopped), 2);
    }

    #[test]
    fn test_subscriber_receives_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(PipelineEvent::Started);
        bus.publish(PipelineEvent::BulkProgress(BulkProgress {
            completed: 1,
            total: 2,
            current: "BTCUSDT 1m".to_string(),
        }));

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.event, PipelineEvent::Started);
        assert!(first.sequence < second.sequence);
        assert_ne!(first.event_id, second.event_id);
        assert_eq!(second.event.label(), "bulk_progress");
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let value = serde_json::to_value(PipelineEvent::Stopped).unwrap();
        assert_eq!(value["type"], "stopped");
    }
}
