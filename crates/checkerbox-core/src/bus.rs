//! # Topic-keyed publish/subscribe bus.
//!
//! [`EventBus`] maps a topic to an ordered list of subscriber inboxes.
//! Runners publish step dispatches on [`SEQUENCE_TOPIC`](crate::event::SEQUENCE_TOPIC);
//! every device inbox subscribed there receives a copy and filters it.
//!
//! ## Rules
//! - **Blocking publish**: `publish()` awaits until every inbox accepted the event.
//!   Inboxes are bounded, so a device that never drains stalls its publishers.
//! - **Registration order**: inboxes receive events in the order they subscribed.
//! - **Read-mostly registry**: publishes share a read lock and run concurrently;
//!   `subscribe()` takes the write lock and only happens while (re)building.
//! - **Closed inboxes** are skipped; their device task has already been reaped.

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::event::Event;

/// Message destination of one subscriber.
pub type Inbox = mpsc::Sender<Event>;

#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<String, Vec<Inbox>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `inbox` under `topic`.
    pub async fn subscribe(&self, topic: impl Into<String>, inbox: Inbox) {
        let mut subscribers = self.subscribers.write().await;
        subscribers.entry(topic.into()).or_default().push(inbox);
    }

    /// Delivers `event` to every inbox registered under its topic.
    ///
    /// Returns the number of inboxes that accepted it.
    pub async fn publish(&self, event: Event) -> usize {
        let subscribers = self.subscribers.read().await;
        let Some(inboxes) = subscribers.get(&event.topic) else {
            return 0;
        };

        let mut delivered = 0;
        for inbox in inboxes {
            if inbox.send(event.clone()).await.is_ok() {
                delivered += 1;
            } else {
                debug!(topic = %event.topic, "Skipping closed inbox");
            }
        }
        delivered
    }

    /// Number of inboxes registered under `topic`.
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers
            .read()
            .await
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }
}
