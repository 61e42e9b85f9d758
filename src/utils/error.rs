//! Error types surfaced by the broker and its consumers.
//!
//! Store failures are wrapped unchanged so callers can still match on the
//! underlying [`StoreError`]. Cancellation has its own variant: it is an
//! expected outcome of a long-poll, not a failure.

use thiserror::Error;

use crate::persistence::StoreError;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("request context cancelled")]
    Cancelled,
    #[error("consumer does not hold a claimed message")]
    NothingClaimed,
    #[error("consumer already holds an unacknowledged message")]
    AlreadyHolding,
}

impl BrokerError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BrokerError::Cancelled)
    }
}
