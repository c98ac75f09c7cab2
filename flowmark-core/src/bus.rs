//! Pub/sub fan-out of lifecycle phases.
//!
//! Each dispatched phase is published on three topics:
//!
//! - `flowmark.<phase>`
//! - `flowmark.<workflow>.<phase>`
//! - `flowmark.<workflow>.<phase>.<transition>`
//!
//! where `<phase>` is the lowercase event type.

use crate::definition::StateSpec;
use crate::dispatch::EventType;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

const TOPIC_PREFIX: &str = "flowmark";

/// Event data sent to bus subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedEvent {
    pub workflow: String,
    pub entity_id: String,
    pub event_type: EventType,
    pub transition: String,
    pub from_states: Vec<String>,
    pub to_states: StateSpec,
    pub metadata: Value,
}

/// Receiver of published lifecycle phases.
pub trait EventBus: Send + Sync {
    fn publish(&self, topic: &str, event: &PublishedEvent);
}

/// Returns the global, workflow-scoped and transition-scoped topic names.
pub fn topics(workflow: &str, event_type: EventType, transition: &str) -> [String; 3] {
    let key = event_type.topic_key();
    [
        format!("{}.{}", TOPIC_PREFIX, key),
        format!("{}.{}.{}", TOPIC_PREFIX, workflow, key),
        format!("{}.{}.{}.{}", TOPIC_PREFIX, workflow, key, transition),
    ]
}

/// In-process bus backed by one broadcast channel per topic.
pub struct EventBroadcaster {
    /// Per-topic broadcast channels.
    channels: DashMap<String, broadcast::Sender<PublishedEvent>>,

    /// Channel capacity.
    channel_capacity: usize,
}

impl EventBroadcaster {
    /// Creates a new EventBroadcaster with the specified channel capacity.
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            channel_capacity,
        }
    }

    /// Subscribes to a topic, creating its channel on first use.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<PublishedEvent> {
        self.channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0)
            .subscribe()
    }

    /// Returns the number of live receivers on a topic.
    pub fn receiver_count(&self, topic: &str) -> usize {
        self.channels
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Returns the number of topics that have ever been subscribed.
    pub fn topic_count(&self) -> usize {
        self.channels.len()
    }
}

impl EventBus for EventBroadcaster {
    fn publish(&self, topic: &str, event: &PublishedEvent) {
        if let Some(sender) = self.channels.get(topic) {
            // Ignore send errors (no receivers)
            let _ = sender.send(event.clone());
        }
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_event() -> PublishedEvent {
        PublishedEvent {
            workflow: "article".to_string(),
            entity_id: "123".to_string(),
            event_type: EventType::Transition,
            transition: "submit".to_string(),
            from_states: vec!["draft".to_string()],
            to_states: StateSpec::from(vec!["review"]),
            metadata: json!({}),
        }
    }

    #[test]
    fn test_topics() {
        let [global, workflow, transition] = topics("article", EventType::Transition, "submit");
        assert_eq!(global, "flowmark.transition");
        assert_eq!(workflow, "flowmark.article.transition");
        assert_eq!(transition, "flowmark.article.transition.submit");
    }

    #[test]
    fn test_subscribe_creates_topic() {
        let broadcaster = EventBroadcaster::new(16);
        assert_eq!(broadcaster.topic_count(), 0);

        let _rx = broadcaster.subscribe("flowmark.guard");
        assert_eq!(broadcaster.topic_count(), 1);
        assert_eq!(broadcaster.receiver_count("flowmark.guard"), 1);
        assert_eq!(broadcaster.receiver_count("flowmark.leave"), 0);
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let broadcaster = EventBroadcaster::new(16);
        let mut rx = broadcaster.subscribe("flowmark.article.transition.submit");

        broadcaster.publish("flowmark.article.transition.submit", &sample_event());

        let received = rx.recv().await.unwrap();
        assert_eq!(received.transition, "submit");
        assert_eq!(received.entity_id, "123");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let broadcaster = EventBroadcaster::new(16);
        // No channel, no panic
        broadcaster.publish("flowmark.transition", &sample_event());

        let mut rx = broadcaster.subscribe("flowmark.transition");
        drop(rx);
        broadcaster.publish("flowmark.transition", &sample_event());

        rx = broadcaster.subscribe("flowmark.transition");
        broadcaster.publish("flowmark.transition", &sample_event());
        assert_eq!(rx.recv().await.unwrap().event_type, EventType::Transition);
    }
}
