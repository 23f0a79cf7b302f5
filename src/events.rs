//! Fire-and-forget event publishing.
//!
//! Publishing never fails from the caller's point of view. With no publisher
//! configured ([`NoopPublisher`]) or no subscribers on the bus, events are
//! silently discarded.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// Published after every admitted run, carrying the [`crate::history::RunRecord`].
pub const TOPIC_JOB_FINISHED: &str = "job.finished";

/// Published when a job body panics, carrying the fault detail.
pub const TOPIC_ERROR: &str = "error";

/// A published event.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub topic: String,
    pub payload: Value,
    pub emitted_at: DateTime<Utc>,
}

/// Best-effort publish capability.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, topic: &str, payload: Value);
}

/// Publisher used when no event bus is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, _topic: &str, _payload: Value) {}
}

/// In-process broadcast bus. Slow subscribers lag and lose old events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl EventPublisher for EventBus {
    fn publish(&self, topic: &str, payload: Value) {
        let event = Event {
            topic: topic.to_owned(),
            payload,
            emitted_at: Utc::now(),
        };
        // Err only means nobody is listening.
        if self.tx.send(event).is_err() {
            tracing::trace!(topic = %topic, "Event dropped, no subscribers");
        }
    }
}

/// Log every event on the bus until it closes.
pub async fn log_events(mut rx: broadcast::Receiver<Event>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                tracing::debug!(topic = %event.topic, payload = %event.payload, "Event published");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event logger lagged behind the bus");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
