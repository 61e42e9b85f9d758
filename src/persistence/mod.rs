//! The `persistence` module defines the durable queue the broker sits on.
//!
//! Every topic is a FIFO of opaque payloads. A consumer claims the oldest
//! entry with [`Store::fetch_next`], then either commits it (removes it for
//! good) or requeues it (the entry goes back to the head of the topic).
//!
//! A topic has at most one claimed entry at a time: while the head is
//! claimed, `fetch_next` on that topic reports empty. The store is the only
//! authority on claims; the broker never caches them.

pub mod sled_store;

pub use sled_store::SledStore;

use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no claimed message for topic {0}")]
    NothingClaimed(String),
    #[error("store is closed")]
    Closed,
    #[error("storage backend error: {0}")]
    Backend(#[from] sled::Error),
    #[error("stored entry could not be decoded: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable per-topic queue with claim, commit and requeue.
///
/// Implementations must make `fetch_next` atomic per topic: two concurrent
/// calls never claim the same entry.
pub trait Store: Send + Sync {
    /// Append `payload` to the tail of `topic`. Durable once this returns.
    fn insert(&self, topic: &str, payload: &[u8]) -> StoreResult<()>;

    /// Claim the oldest unclaimed entry of `topic`, `Ok(None)` when there is
    /// nothing to hand out.
    fn fetch_next(&self, topic: &str) -> StoreResult<Option<Bytes>>;

    /// Remove the claimed entry of `topic`.
    fn commit(&self, topic: &str) -> StoreResult<()>;

    /// Release the claim on `topic`, leaving the entry at the head.
    fn requeue(&self, topic: &str) -> StoreResult<()>;

    fn close(&self) -> StoreResult<()>;
}
