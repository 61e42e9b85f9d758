//! Queue storage backed by `sled`
//!
//! Each topic lives in its own tree. Keys are big-endian ids from
//! `Db::generate_id`, which only ever grow, so iterating a tree yields the
//! topic in publish order. Values are JSON-encoded [`StoredEntry`] records.
//!
//! Claims are kept in memory. After a restart nothing is claimed, so an entry
//! that was in flight when the process died is delivered again.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sled::{Db, IVec, Tree};
use tracing::debug;

use super::{Store, StoreError, StoreResult};

const TREE_PREFIX: &str = "topic:";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StoredEntry {
    pub payload: Vec<u8>,
    /// Milliseconds since the UNIX epoch.
    pub enqueued_at: i64,
}

pub struct SledStore {
    db: Db,
    flush_on_insert: bool,
    /// topic -> key of the claimed head entry
    claims: Mutex<HashMap<String, IVec>>,
    closed: AtomicBool,
}

impl SledStore {
    /// Open or create a sled database at `path`.
    pub fn open(path: impl AsRef<Path>, flush_on_insert: bool) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Ok(Self::with_db(db, flush_on_insert))
    }

    /// Wrap an already opened database.
    pub fn with_db(db: Db, flush_on_insert: bool) -> Self {
        Self {
            db,
            flush_on_insert,
            claims: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of entries stored for `topic`, claimed one included.
    pub fn len(&self, topic: &str) -> StoreResult<usize> {
        Ok(self.tree(topic)?.len())
    }

    fn tree(&self, topic: &str) -> StoreResult<Tree> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(self.db.open_tree(format!("{TREE_PREFIX}{topic}"))?)
    }

    fn claims(&self) -> std::sync::MutexGuard<'_, HashMap<String, IVec>> {
        self.claims
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Store for SledStore {
    fn insert(&self, topic: &str, payload: &[u8]) -> StoreResult<()> {
        let tree = self.tree(topic)?;
        let entry = StoredEntry {
            payload: payload.to_vec(),
            enqueued_at: Utc::now().timestamp_millis(),
        };
        let id = self.db.generate_id()?;

        tree.insert(id.to_be_bytes(), serde_json::to_vec(&entry)?)?;
        if self.flush_on_insert {
            tree.flush()?;
        }

        debug!(topic, id, "stored entry");
        Ok(())
    }

    fn fetch_next(&self, topic: &str) -> StoreResult<Option<Bytes>> {
        let tree = self.tree(topic)?;

        // Held across the tree read so two fetches cannot claim the same head.
        let mut claims = self.claims();
        if claims.contains_key(topic) {
            return Ok(None);
        }

        let Some((key, value)) = tree.first()? else {
            return Ok(None);
        };
        let entry: StoredEntry = serde_json::from_slice(&value)?;
        claims.insert(topic.to_string(), key);

        Ok(Some(Bytes::from(entry.payload)))
    }

    fn commit(&self, topic: &str) -> StoreResult<()> {
        let tree = self.tree(topic)?;

        let mut claims = self.claims();
        let key = claims
            .remove(topic)
            .ok_or_else(|| StoreError::NothingClaimed(topic.to_string()))?;

        if let Err(e) = tree.remove(&key) {
            claims.insert(topic.to_string(), key);
            return Err(e.into());
        }
        Ok(())
    }

    fn requeue(&self, topic: &str) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }

        // The claimed entry is always the head, so dropping the claim is
        // enough to put it back in front.
        self.claims()
            .remove(topic)
            .map(|_| ())
            .ok_or_else(|| StoreError::NothingClaimed(topic.to_string()))
    }

    fn close(&self) -> StoreResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.db.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("db", &"sled::Db")
            .field("flush_on_insert", &self.flush_on_insert)
            .finish()
    }
}
