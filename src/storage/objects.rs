//! Content-addressed object store
//!
//! Objects are stored under the hash of their canonical JSON. Missing objects
//! can be requested from a peer; concurrent requests for the same id share a
//! single `getobject` and are all woken by the `put` that delivers it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

use super::{ChainDB, KeyValueStore, StorageError};
use crate::constants::RETRIEVAL_TIMEOUT;
use crate::consensus::Object;
use crate::crypto::Hash;
use crate::p2p::Peer;

/// Retrieval errors
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Timeout of {}ms in retrieving object {id} exceeded", timeout.as_millis())]
    Timeout { id: Hash, timeout: Duration },
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

type Waiters = HashMap<Hash, Vec<oneshot::Sender<Object>>>;

/// Object store with asynchronous fetch-or-wait
pub struct ObjectManager {
    db: ChainDB,
    waiters: Mutex<Waiters>,
    timeout: Duration,
}

impl ObjectManager {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_timeout(store, RETRIEVAL_TIMEOUT)
    }

    pub fn with_timeout(store: Arc<dyn KeyValueStore>, timeout: Duration) -> Self {
        Self {
            db: ChainDB::new(store),
            waiters: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Typed records sharing this store
    pub fn db(&self) -> &ChainDB {
        &self.db
    }

    pub fn exists(&self, id: &Hash) -> Result<bool, StorageError> {
        self.db.object_exists(id)
    }

    pub fn get(&self, id: &Hash) -> Result<Option<Object>, StorageError> {
        match self.db.get_object_bytes(id)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Store an object and wake everyone waiting for it
    pub fn put(&self, object: &Object) -> Result<Hash, StorageError> {
        let id = object.id();
        debug!("Storing {} with id {}", object.kind(), id);
        self.db.put_object_bytes(&id, object.canonical_json().as_bytes())?;

        let waiting = self.lock_waiters()?.remove(&id);
        for waiter in waiting.into_iter().flatten() {
            // The waiter may have given up already
            let _ = waiter.send(object.clone());
        }
        Ok(id)
    }

    /// Get an object locally or from `peer`, waiting at most the retrieval timeout
    pub async fn retrieve(&self, id: &Hash, peer: &dyn Peer) -> Result<Object, RetrievalError> {
        debug!("Retrieving object {}", id);
        let receiver = {
            let mut waiters = self.lock_waiters()?;
            // Checked under the waiter lock so a concurrent put cannot slip between
            if let Some(object) = self.get(id)? {
                debug!("Object {} was already in database", id);
                return Ok(object);
            }

            let entry = waiters.entry(*id).or_default();
            entry.retain(|waiter| !waiter.is_closed());
            let first = entry.is_empty();
            let (sender, receiver) = oneshot::channel();
            entry.push(sender);

            if first {
                debug!("Object {} not in database. Requesting it from peer {}", id, peer.addr());
                peer.send_get_object(*id);
            }
            receiver
        };

        match tokio::time::timeout(self.timeout, receiver).await {
            Ok(Ok(object)) => {
                debug!("Object {} was retrieved from peer {}", id, peer.addr());
                Ok(object)
            }
            _ => {
                self.forget_closed(id)?;
                Err(RetrievalError::Timeout {
                    id: *id,
                    timeout: self.timeout,
                })
            }
        }
    }

    /// Number of ids with outstanding retrievals
    pub fn pending_retrievals(&self) -> usize {
        self.waiters.lock().map(|w| w.len()).unwrap_or(0)
    }

    fn forget_closed(&self, id: &Hash) -> Result<(), StorageError> {
        let mut waiters = self.lock_waiters()?;
        if let Some(entry) = waiters.get_mut(id) {
            entry.retain(|waiter| !waiter.is_closed());
            if entry.is_empty() {
                waiters.remove(id);
            }
        }
        Ok(())
    }

    fn lock_waiters(&self) -> Result<std::sync::MutexGuard<'_, Waiters>, StorageError> {
        self.waiters.lock().map_err(|_| StorageError::Poisoned)
    }
}

impl std::fmt::Debug for ObjectManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectManager")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
