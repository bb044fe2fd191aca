//! In-process publish/subscribe with named channels.
//!
//! Each event name gets its own [`tokio::sync::broadcast`] channel. Emission
//! is best-effort: a subscriber that falls behind has its oldest messages
//! dropped rather than blocking the pipeline (broadcast's own lagged-receiver
//! semantics), matching the "may drop a slow subscriber" requirement.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;

/// Event payload. `data` carries whatever JSON blob is relevant to `name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub queue: Option<String>,
    pub job_id: Option<String>,
    pub at: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl Event {
    pub fn new(name: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            queue: None,
            job_id: None,
            at: Utc::now(),
            data,
        }
    }

    pub fn for_job(mut self, queue: impl Into<String>, job_id: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self.job_id = Some(job_id.into());
        self
    }
}

/// Topic-indexed fan-out. Subscribing to a topic that has never been emitted
/// to creates it with a bounded backlog.
pub struct EventBus {
    capacity: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<Event>>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Event> {
        let mut channels = self.channels.lock();
        channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Publishes `event` under `event.name`. A topic with no subscribers is
    /// a silent no-op, never an error.
    pub fn emit(&self, event: Event) {
        let _ = self.sender(&event.name).send(event);
    }

    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<Event> {
        self.sender(topic).subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Standard event names (§4.15).
pub mod names {
    pub const JOB_ADDED: &str = "jobAdded";
    pub const JOB_COMPLETED: &str = "jobCompleted";
    pub const JOB_FAILED: &str = "jobFailed";
    pub const JOB_PROGRESS: &str = "jobProgress";
    pub const JOB_ACTIVE: &str = "jobActive";
    pub const JOB_STALLED: &str = "jobStalled";
    pub const JOB_DELAYED: &str = "jobDelayed";
    pub const JOB_REMOVED: &str = "jobRemoved";
    pub const READY: &str = "ready";
    pub const ERROR: &str = "error";
    pub const BATCH_ADDED: &str = "batchAdded";
    pub const BATCH_COMPLETED: &str = "batchCompleted";
    pub const BATCH_FAILED: &str = "batchFailed";
    pub const BATCH_PROGRESS: &str = "batchProgress";
    pub const GROUP_CREATED: &str = "groupCreated";
    pub const GROUP_REMOVED: &str = "groupRemoved";
    pub const OBSERVABLE_STARTED: &str = "observableStarted";
    pub const OBSERVABLE_STOPPED: &str = "observableStopped";
    pub const JOB_MOVED_TO_DEAD_LETTER: &str = "jobMovedToDeadLetter";
    pub const JOB_REPUBLISHED_FROM_DEAD_LETTER: &str = "jobRepublishedFromDeadLetter";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscriber_receives_emitted_event() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe(names::JOB_ADDED);

        bus.emit(Event::new(names::JOB_ADDED, json!({"v": 1})).for_job("default", "1"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, names::JOB_ADDED);
        assert_eq!(event.job_id.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn emit_with_no_subscribers_does_not_error() {
        let bus = EventBus::default();
        bus.emit(Event::new(names::READY, json!(null)));
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking_emitter() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe(names::JOB_PROGRESS);

        for i in 0..5 {
            bus.emit(Event::new(names::JOB_PROGRESS, json!({"i": i})));
        }

        // The receiver lagged behind the bounded capacity; it observes a
        // Lagged error rather than the emitter blocking on it.
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            other => panic!("expected Lagged, got {other:?}"),
        }
    }
}
