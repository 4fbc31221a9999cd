// SPDX-License-Identifier: MIT

//! Topic-based publish/subscribe bus
//!
//! This module provides:
//! - `TopicBus` - process-wide named channels shared by runs and background tasks
//! - `Subscription` - a bounded, from-point-of-attachment receiver, also used
//!   for run event streams
//!
//! Delivery is FIFO per topic and non-durable: messages published before a
//! subscriber attached are never replayed. A subscriber that falls more than
//! the channel bound behind is disconnected instead of slowing publishers.

use futures::stream::{self, Stream};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// A receiver attached to a broadcast channel.
///
/// Yields items from the point of attachment until the channel closes or the
/// subscriber overflows its buffer.
pub struct Subscription<T> {
    name: String,
    rx: broadcast::Receiver<T>,
    overflowed: bool,
    finished: bool,
}

impl<T: Clone + Send + 'static> Subscription<T> {
    pub(crate) fn new(name: impl Into<String>, rx: broadcast::Receiver<T>) -> Self {
        Self {
            name: name.into(),
            rx,
            overflowed: false,
            finished: false,
        }
    }

    /// A subscription that yields nothing
    pub(crate) fn closed(name: impl Into<String>) -> Self {
        let mut sub = Self::new(name, broadcast::channel(1).1);
        sub.finished = true;
        sub
    }

    /// Next item, or `None` once the channel is closed or this subscriber was
    /// dropped for falling behind.
    pub async fn next(&mut self) -> Option<T> {
        if self.finished {
            return None;
        }
        match self.rx.recv().await {
            Ok(item) => Some(item),
            Err(broadcast::error::RecvError::Closed) => {
                self.finished = true;
                None
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!(
                    "Subscriber on '{}' fell {} item(s) behind; disconnecting",
                    self.name,
                    skipped
                );
                self.overflowed = true;
                self.finished = true;
                None
            }
        }
    }

    /// Whether the subscription ended because the consumer was too slow
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn into_stream(self) -> impl Stream<Item = T> + Send + 'static {
        stream::unfold(self, |mut sub| async move {
            let item = sub.next().await?;
            Some((item, sub))
        })
    }
}

pub type TopicSubscription = Subscription<Value>;

/// Named publish/subscribe channels
#[derive(Clone)]
pub struct TopicBus {
    topics: Arc<RwLock<HashMap<String, broadcast::Sender<Value>>>>,
    capacity: usize,
}

impl TopicBus {
    /// `capacity` bounds how far any subscriber may fall behind
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Publish a message; returns how many subscribers it was delivered to
    pub async fn emit(&self, topic: &str, message: Value) -> usize {
        let delivered = {
            let topics = self.topics.read().await;
            match topics.get(topic) {
                Some(tx) => tx.send(message).unwrap_or(0),
                None => 0,
            }
        };

        if delivered == 0 {
            // Drop channels nobody listens to any more
            let mut topics = self.topics.write().await;
            if topics
                .get(topic)
                .is_some_and(|tx| tx.receiver_count() == 0)
            {
                topics.remove(topic);
            }
            log::debug!("Message on topic '{}' had no subscribers", topic);
        }
        delivered
    }

    /// Subscribe to messages published on `topic` from now on
    pub async fn recv(&self, topic: &str) -> TopicSubscription {
        let mut topics = self.topics.write().await;
        topics.retain(|_, tx| tx.receiver_count() > 0);
        let tx = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        Subscription::new(topic, tx.subscribe())
    }

    /// Topics that currently have at least one subscriber
    pub async fn topics(&self) -> Vec<String> {
        let mut topics = self.topics.write().await;
        topics.retain(|_, tx| tx.receiver_count() > 0);
        let mut names: Vec<String> = topics.keys().cloned().collect();
        names.sort();
        names
    }

    #[cfg(test)]
    async fn channel_count(&self) -> usize {
        self.topics.read().await.len()
    }
}

impl Default for TopicBus {
    fn default() -> Self {
        Self::new(256)
    }
}
