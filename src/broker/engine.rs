//! Broker engine
//!
//! The broker owns the store and a registry of consumers per topic. It is
//! responsible for:
//! - writing published payloads to the store
//! - waking at most one waiting consumer of the topic after each publish
//! - handing out [`Consumer`]s and forgetting them once they are dropped
//!
//! Concurrency notes:
//! - The registry is a single `RwLock` over all topics. Subscribing and
//!   unsubscribing take the write side, notification takes the read side.
//! - The registry lock is never held while the store is called.
//! - Notification never blocks: a wake nobody is waiting for is dropped. The
//!   entry is still in the store and the next `Consumer::next` finds it.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, trace};

use crate::broker::consumer::Consumer;
use crate::broker::message::Event;
use crate::broker::topic::{ConsumerId, Topic};
use crate::persistence::Store;
use crate::utils::BrokerError;

pub struct Broker {
    store: Arc<dyn Store>,
    topics: RwLock<HashMap<String, Topic>>,
}

impl Broker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            topics: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    /// Append `payload` to `topic` and wake one waiting consumer.
    ///
    /// Store errors are returned as-is, nothing is retried.
    pub fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.store.insert(topic, payload)?;
        self.notify_consumer(topic, Event::Publish);
        Ok(())
    }

    /// Register a new consumer on `topic`. Topics need no explicit creation.
    pub fn subscribe(self: &Arc<Self>, topic: &str) -> Consumer {
        let mut topics = self.write_topics();

        let consumer = Consumer::new(topic, self.clone());
        topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(topic))
            .subscribe(consumer.id(), consumer.signal());

        debug!(consumer = %consumer.id(), topic, "consumer registered");
        consumer
    }

    /// Drop a consumer from the registry, and the topic entry with it once
    /// it has no consumers left.
    pub(crate) fn unsubscribe(&self, topic: &str, id: &ConsumerId) {
        let mut topics = self.write_topics();

        if let Some(entry) = topics.get_mut(topic) {
            entry.unsubscribe(id);
            if entry.is_empty() {
                topics.remove(topic);
            }
        }

        debug!(consumer = %id, topic, "consumer deregistered");
    }

    /// Wake the earliest-registered consumer of `topic` that is waiting.
    ///
    /// Consumers that are not waiting are skipped. When nobody waits the
    /// wake is dropped.
    pub fn notify_consumer(&self, topic: &str, event: Event) {
        let topics = self.read_topics();

        let Some(entry) = topics.get(topic) else {
            trace!(topic, %event, "no consumers registered, wake dropped");
            return;
        };

        match entry.wake_first_waiting() {
            Some(id) => trace!(consumer = %id, topic = %entry.name, %event, "woke consumer"),
            None => trace!(topic = %entry.name, %event, "no waiting consumer, wake dropped"),
        }
    }

    /// Number of consumers registered on `topic`.
    pub fn consumer_count(&self, topic: &str) -> usize {
        self.read_topics()
            .get(topic)
            .map_or(0, |entry| entry.consumers.len())
    }

    pub fn shutdown(&self) -> Result<(), BrokerError> {
        self.store.close()?;
        Ok(())
    }

    fn read_topics(&self) -> RwLockReadGuard<'_, HashMap<String, Topic>> {
        self.topics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_topics(&self) -> RwLockWriteGuard<'_, HashMap<String, Topic>> {
        self.topics.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("topics", &self.read_topics().len())
            .finish()
    }
}
