//! Topic registry entry
//!
//! A `Topic` holds the wake handles of the consumers subscribed to it, in
//! registration order. Notification always scans from the front, so the
//! earliest registered consumer that is waiting gets the wake.
//!
//! Callers synchronize access through the broker's registry lock.

use std::sync::Arc;

use uuid::Uuid;

use crate::broker::consumer::WakeSignal;

pub type ConsumerId = Uuid;

#[derive(Debug)]
pub struct Registration {
    pub id: ConsumerId,
    pub signal: Arc<WakeSignal>,
}

#[derive(Debug, Default)]
pub struct Topic {
    pub name: String,
    pub consumers: Vec<Registration>,
}

impl Topic {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            consumers: Vec::new(),
        }
    }

    /// Append a consumer at the back of the scan order.
    pub fn subscribe(&mut self, id: ConsumerId, signal: Arc<WakeSignal>) {
        self.consumers.push(Registration { id, signal });
    }

    /// Remove a consumer. Unknown ids are ignored.
    pub fn unsubscribe(&mut self, id: &ConsumerId) {
        self.consumers.retain(|registration| registration.id != *id);
    }

    /// Wake the first consumer currently waiting. Returns its id, or `None`
    /// when nobody was waiting and the wake was dropped.
    pub fn wake_first_waiting(&self) -> Option<ConsumerId> {
        self.consumers
            .iter()
            .find(|registration| registration.signal.try_wake())
            .map(|registration| registration.id)
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }
}
