//! Topic-based notification fan-out.
//!
//! Every topic owns a tokio broadcast channel. Observers subscribe when a
//! duplex connection opens and unsubscribe when it closes; publishing to a
//! topic nobody listens to is a silent no-op. Delivery is best-effort: an
//! observer that falls more than `capacity` messages behind skips the gap.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

/// Structured payload carrying a routing hint for the receiving page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutedPayload {
    pub helper: String,
    pub js_helper_function: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Either a plain progress line or a routed payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NotificationPayload {
    Text(String),
    Routed(RoutedPayload),
}

impl NotificationPayload {
    pub fn routed(helper: &str, js_helper_function: &str, data: serde_json::Value) -> Self {
        NotificationPayload::Routed(RoutedPayload {
            helper: helper.to_string(),
            js_helper_function: js_helper_function.to_string(),
            data,
        })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            NotificationPayload::Text(text) => Some(text),
            NotificationPayload::Routed(_) => None,
        }
    }
}

impl From<&str> for NotificationPayload {
    fn from(value: &str) -> Self {
        NotificationPayload::Text(value.to_string())
    }
}

impl From<String> for NotificationPayload {
    fn from(value: String) -> Self {
        NotificationPayload::Text(value)
    }
}

/// Message delivered to observers of a topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMessage {
    pub target_topic: String,
    pub message: NotificationPayload,
}

/// Publish/subscribe hub shared by every workflow
#[derive(Clone)]
pub struct NotificationHub {
    topics: Arc<RwLock<HashMap<String, broadcast::Sender<NotificationMessage>>>>,
    next_observer: Arc<AtomicU64>,
    capacity: usize,
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            next_observer: Arc::new(AtomicU64::new(1)),
            capacity: capacity.max(1),
        }
    }

    /// Fan a message out to every observer currently subscribed to `topic`.
    ///
    /// Returns how many observers the message was handed to.
    pub fn publish(&self, topic: &str, message: impl Into<NotificationPayload>) -> usize {
        let topics = self.topics.read();
        let Some(sender) = topics.get(topic) else {
            return 0;
        };

        if sender.receiver_count() == 0 {
            return 0;
        }

        let message = NotificationMessage {
            target_topic: topic.to_string(),
            message: message.into(),
        };

        sender.send(message).unwrap_or(0)
    }

    /// Register a new observer on `topic`
    pub fn subscribe(&self, topic: &str) -> ObserverHandle {
        let mut topics = self.topics.write();
        let sender = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);

        let id = self.next_observer.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(topic, observer = id, "Observer subscribed");

        ObserverHandle {
            id,
            topic: topic.to_string(),
            receiver: sender.subscribe(),
        }
    }

    /// Remove an observer; the topic is dropped once nobody listens to it
    pub fn unsubscribe(&self, handle: ObserverHandle) {
        let ObserverHandle {
            id,
            topic,
            receiver,
        } = handle;
        drop(receiver);

        let mut topics = self.topics.write();
        if let Some(sender) = topics.get(&topic) {
            if sender.receiver_count() == 0 {
                topics.remove(&topic);
            }
        }
        tracing::debug!(topic = %topic, observer = id, "Observer unsubscribed");
    }

    pub fn observer_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .get(topic)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }

    /// Convenience publisher bound to one topic
    pub fn topic(&self, topic: &str) -> TopicPublisher {
        TopicPublisher {
            hub: self.clone(),
            topic: topic.to_string(),
        }
    }
}

/// Membership token returned by [`NotificationHub::subscribe`]
pub struct ObserverHandle {
    id: u64,
    topic: String,
    receiver: broadcast::Receiver<NotificationMessage>,
}

impl ObserverHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the next message; `None` once the topic is gone
    pub async fn recv(&mut self) -> Option<NotificationMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Some(message),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(observer = self.id, skipped, "Observer lagged behind");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-delivered message, if any
    pub fn try_recv(&mut self) -> Option<NotificationMessage> {
        loop {
            match self.receiver.try_recv() {
                Ok(message) => return Some(message),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}

/// Publisher bound to a single topic
#[derive(Clone)]
pub struct TopicPublisher {
    hub: NotificationHub,
    topic: String,
}

impl TopicPublisher {
    pub fn send(&self, message: impl Into<NotificationPayload>) {
        self.hub.publish(&self.topic, message);
    }
}
