//! Message and event definitions for the broker
//!
//! Payloads are opaque bytes; the broker attaches no metadata and ordering
//! within a topic is whatever the store keeps (FIFO).

use std::fmt;

pub type Payload = bytes::Bytes;

/// Why a topic's waiting consumer is being woken.
///
/// A publish adds an entry; an ack or nack releases the topic's claim so the
/// head becomes available again. `Handoff` passes on a wake that landed on a
/// consumer which no longer needed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Publish,
    Ack,
    Nack,
    Handoff,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Event::Publish => "publish",
            Event::Ack => "ack",
            Event::Nack => "nack",
            Event::Handoff => "handoff",
        };
        f.write_str(name)
    }
}
