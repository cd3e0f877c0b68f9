//! Event system for progress tracking
//!
//! The orchestrator emits [`Event`]s as a request moves through gating,
//! transcoding and the per-target pipelines. Consumers (the CLI's
//! `--progress` output, a server pushing updates to a browser) subscribe
//! to an [`EventBus`].
//!
//! The bus wraps `tokio::sync::broadcast`: emission never blocks, events
//! are dropped when nobody is subscribed, and a lagging subscriber loses
//! the oldest events rather than slowing the request down.
//!
//! # Example
//!
//! ```no_run
//! use libcrosspost::events::{Event, EventBus};
//!
//! # async fn example() {
//! let event_bus = EventBus::new(100);
//! let mut receiver = event_bus.subscribe();
//!
//! event_bus.emit(Event::RequestStarted {
//!     request_id: "abc123".to_string(),
//!     targets: vec!["bluesky".to_string()],
//!     image_count: 0,
//! });
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {:?}", event);
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::TargetResult;

/// Event receiver type alias
pub type EventReceiver = broadcast::Receiver<Event>;

/// Default per-subscriber buffer
pub const DEFAULT_CAPACITY: usize = 100;

/// Event bus for distributing progress events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus
    ///
    /// `capacity` is how many events are buffered per subscriber before
    /// the oldest are dropped.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: Event) {
        // Err only means nobody is listening
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Progress of one crosspost request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Request passed validation and resolved its targets
    RequestStarted {
        request_id: String,
        targets: Vec<String>,
        image_count: usize,
    },

    /// A target's upload-and-post pipeline began
    TargetStarted { request_id: String, target: String },

    /// A target published the post
    TargetCompleted {
        request_id: String,
        target: String,
        data: serde_json::Value,
    },

    /// A target's pipeline failed; other targets are unaffected
    TargetFailed {
        request_id: String,
        target: String,
        error: String,
    },

    /// At least one target succeeded
    RequestCompleted {
        request_id: String,
        results: Vec<TargetResult>,
    },

    /// The request as a whole failed
    RequestFailed { request_id: String, error: String },
}

impl Event {
    pub fn request_id(&self) -> &str {
        match self {
            Event::RequestStarted { request_id, .. }
            | Event::TargetStarted { request_id, .. }
            | Event::TargetCompleted { request_id, .. }
            | Event::TargetFailed { request_id, .. }
            | Event::RequestCompleted { request_id, .. }
            | Event::RequestFailed { request_id, .. } => request_id,
        }
    }

    /// Whether this is the last event of its request
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::RequestCompleted { .. } | Event::RequestFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TargetName;

    #[tokio::test]
    async fn test_event_emission_and_subscription() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        event_bus.emit(Event::TargetStarted {
            request_id: "req-1".to_string(),
            target: "bluesky".to_string(),
        });

        match receiver.recv().await.unwrap() {
            Event::TargetStarted { request_id, target } => {
                assert_eq!(request_id, "req-1");
                assert_eq!(target, "bluesky");
            }
            other => panic!("Wrong event type received: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();

        let event = Event::TargetFailed {
            request_id: "req-2".to_string(),
            target: "twitter".to_string(),
            error: "timeout".to_string(),
        };
        event_bus.emit(event.clone());

        assert_eq!(receiver1.recv().await.unwrap(), event);
        assert_eq!(receiver2.recv().await.unwrap(), event);
    }

    #[test]
    fn test_no_subscribers() {
        let event_bus = EventBus::default();

        // Must not panic or block
        event_bus.emit(Event::RequestFailed {
            request_id: "req-3".to_string(),
            error: "All posts failed".to_string(),
        });

        assert_eq!(event_bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_serialization() {
        let event = Event::RequestCompleted {
            request_id: "req-4".to_string(),
            results: vec![
                TargetResult::succeeded(TargetName::Bluesky, serde_json::json!({"uri": "at://x"})),
                TargetResult::failed(TargetName::Twitter, "timeout"),
            ],
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "request_completed");
        assert_eq!(json["results"][0]["platform"], "bluesky");
        assert_eq!(json["results"][1]["error"], "timeout");

        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_request_id_and_terminal() {
        let started = Event::RequestStarted {
            request_id: "r".to_string(),
            targets: vec![],
            image_count: 2,
        };
        let failed = Event::RequestFailed {
            request_id: "r".to_string(),
            error: "x".to_string(),
        };

        assert_eq!(started.request_id(), "r");
        assert!(!started.is_terminal());
        assert!(failed.is_terminal());
    }
}
