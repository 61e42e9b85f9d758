//! Consumer: one subscription's handle onto a topic.
//!
//! A consumer fetches at most one message at a time. [`Consumer::next`]
//! long-polls the store and parks on the consumer's [`WakeSignal`] while the
//! topic has nothing claimable; [`Consumer::ack`] and [`Consumer::nack`]
//! settle the message it holds.
//!
//! Dropping a consumer requeues any message it still holds and removes it from
//! the broker's registry.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::broker::engine::Broker;
use crate::broker::message::{Event, Payload};
use crate::broker::topic::ConsumerId;
use crate::utils::BrokerError;

/// Single-slot wake-up for one consumer.
///
/// Notifiers only signal a consumer that is waiting, and only once per wait:
/// `try_wake` flips `waiting` off before notifying. `Notify` keeps at most one
/// permit, so a wake racing the start of the wait is not lost.
#[derive(Debug, Default)]
pub struct WakeSignal {
    waiting: AtomicBool,
    notify: Notify,
}

impl WakeSignal {
    /// Wake the consumer if it is waiting. Never blocks.
    pub fn try_wake(&self) -> bool {
        if self
            .waiting
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.notify.notify_one();
            true
        } else {
            false
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Store `waiting` before the consumer reads the store; publishers write
    /// the store before reading `waiting`. Both sides need `SeqCst`.
    fn arm(&self) {
        self.waiting.store(true, Ordering::SeqCst);
    }

    /// Leave the waiting state. Returns false if a wake was already taken.
    fn disarm(&self) -> bool {
        self.waiting.swap(false, Ordering::SeqCst)
    }
}

pub struct Consumer {
    id: ConsumerId,
    topic: String,
    broker: Arc<Broker>,
    signal: Arc<WakeSignal>,
    holding: AtomicBool,
}

impl Consumer {
    pub(crate) fn new(topic: &str, broker: Arc<Broker>) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.to_string(),
            broker,
            signal: Arc::new(WakeSignal::default()),
            holding: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ConsumerId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Whether this consumer holds an unacknowledged message.
    pub fn holds_claim(&self) -> bool {
        self.holding.load(Ordering::Acquire)
    }

    pub(crate) fn signal(&self) -> Arc<WakeSignal> {
        self.signal.clone()
    }

    /// Claim the oldest pending message of the topic, waiting for one if
    /// needed.
    ///
    /// Returns [`BrokerError::Cancelled`] as soon as `cancel` fires; nothing is
    /// claimed in that case.
    pub async fn next(&self, cancel: &CancellationToken) -> Result<Payload, BrokerError> {
        if self.holds_claim() {
            return Err(BrokerError::AlreadyHolding);
        }

        let _wait = WaitGuard::new(self);

        loop {
            let notified = self.signal.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            self.signal.arm();

            if cancel.is_cancelled() {
                return Err(BrokerError::Cancelled);
            }

            if let Some(payload) = self.broker.store().fetch_next(&self.topic)? {
                self.holding.store(true, Ordering::Release);
                debug!(consumer = %self.id, topic = %self.topic, "claimed message");
                return Ok(payload);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(BrokerError::Cancelled),
                _ = &mut notified => {
                    debug!(consumer = %self.id, topic = %self.topic, "woken");
                }
            }
        }
    }

    /// Commit the held message.
    pub fn ack(&self) -> Result<(), BrokerError> {
        self.settle(Event::Ack)
    }

    /// Put the held message back at the head of the topic.
    pub fn nack(&self) -> Result<(), BrokerError> {
        self.settle(Event::Nack)
    }

    fn settle(&self, event: Event) -> Result<(), BrokerError> {
        if !self.holds_claim() {
            return Err(BrokerError::NothingClaimed);
        }

        let store = self.broker.store();
        match event {
            Event::Ack => store.commit(&self.topic)?,
            _ => store.requeue(&self.topic)?,
        }
        self.holding.store(false, Ordering::Release);

        // The head is claimable again; someone blocked behind us can go.
        self.broker.notify_consumer(&self.topic, event);
        Ok(())
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        if self.holds_claim() {
            match self.nack() {
                Ok(()) => warn!(
                    consumer = %self.id,
                    topic = %self.topic,
                    "requeued unacknowledged message on release"
                ),
                Err(e) => error!(
                    consumer = %self.id,
                    topic = %self.topic,
                    error = %e,
                    "failed to requeue message on release"
                ),
            }
        }

        self.broker.unsubscribe(&self.topic, &self.id);
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("holding", &self.holds_claim())
            .finish()
    }
}

/// Ends a wait on every exit from `next`, including the future being dropped.
struct WaitGuard<'a> {
    consumer: &'a Consumer,
}

impl<'a> WaitGuard<'a> {
    fn new(consumer: &'a Consumer) -> Self {
        Self { consumer }
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        let consumer = self.consumer;
        if !consumer.signal.disarm() {
            // A wake landed here after we stopped needing it.
            consumer
                .broker
                .notify_consumer(&consumer.topic, Event::Handoff);
        }
    }
}
