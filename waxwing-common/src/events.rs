//! Progress event types and the event bus
//!
//! The batch coordinator writes progress events to an [`EventBus`]; callers
//! (CLI, a future UI) drain them however they like. The core never knows how
//! events are rendered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events emitted while a batch run progresses
///
/// Status fields carry the display label of the per-file outcome
/// (`resolved`, `partially_resolved`, `unresolved`, `bypassed`, `failed`) so
/// subscribers need no dependency on the engine's types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    /// Batch accepted and workers started
    BatchStarted {
        batch_id: Uuid,
        total: usize,
        timestamp: DateTime<Utc>,
    },

    /// A file entered the identification pipeline
    FileStarted {
        batch_id: Uuid,
        path: String,
        timestamp: DateTime<Utc>,
    },

    /// A file reached a terminal status
    FileCompleted {
        batch_id: Uuid,
        path: String,
        status: String,
        processed: usize,
        total: usize,
        timestamp: DateTime<Utc>,
    },

    /// Cancellation was observed; remaining files will be bypassed
    BatchCancelled {
        batch_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// All files reached a terminal status
    BatchCompleted {
        batch_id: Uuid,
        resolved: usize,
        partially_resolved: usize,
        unresolved: usize,
        bypassed: usize,
        failed: usize,
        duration_seconds: u64,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast-based event bus
///
/// Slow subscribers lose the oldest events rather than back-pressuring the
/// coordinator.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BatchEvent>,
}

impl EventBus {
    /// Create a new bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring the no-subscriber case
    ///
    /// Progress reporting must never fail the pipeline, so the send error
    /// (no active receivers) is intentionally dropped.
    pub fn emit_lossy(&self, event: BatchEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
