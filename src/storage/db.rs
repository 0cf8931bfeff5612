//! Database persistence layer using Sled
//!
//! Handles saving and loading node state. Everything goes through the
//! `KeyValueStore` trait so the node runs equally on sled or in memory.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use thiserror::Error;

use crate::crypto::Hash;
use crate::storage::UTXOSet;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Sled(#[from] sled::Error),
    #[error("Record encoding error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("Stored object is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Missing record {0}")]
    Missing(String),
    #[error("Store lock poisoned")]
    Poisoned,
}

/// Abstract key-value persistence
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;
    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key)?.is_some())
    }
}

/// Sled-backed store
#[derive(Debug, Clone)]
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }
}

impl KeyValueStore for SledStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.db.insert(key, value)?;
        self.db.flush()?;
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.db.contains_key(key)?)
    }
}

/// In-memory store, used by tests and ephemeral nodes
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let entries = self.entries.read().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::Poisoned)?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

/// Derived data cached for a validated block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub height: u64,
    pub state_after: UTXOSet,
}

/// Persisted chain tip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTip {
    pub blockid: Hash,
    pub height: u64,
}

const CHAINTIP_KEY: &str = "chaintip";
const MEMPOOL_TXIDS_KEY: &str = "mempool:txids";
const MEMPOOL_STATE_KEY: &str = "mempool:state";

fn object_key(id: &Hash) -> String {
    format!("object:{id}")
}

fn blockinfo_key(id: &Hash) -> String {
    format!("blockinfo:{id}")
}

/// Typed record access on top of a key-value store
#[derive(Clone)]
pub struct ChainDB {
    store: Arc<dyn KeyValueStore>,
}

impl ChainDB {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.store.get(key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let bytes = bincode::serialize(value)?;
        self.store.put(key, &bytes)
    }

    /// Raw canonical JSON of a stored object
    pub fn get_object_bytes(&self, id: &Hash) -> Result<Option<Vec<u8>>, StorageError> {
        self.store.get(&object_key(id))
    }

    pub fn put_object_bytes(&self, id: &Hash, canonical: &[u8]) -> Result<(), StorageError> {
        self.store.put(&object_key(id), canonical)
    }

    pub fn object_exists(&self, id: &Hash) -> Result<bool, StorageError> {
        self.store.exists(&object_key(id))
    }

    pub fn get_block_info(&self, id: &Hash) -> Result<Option<BlockInfo>, StorageError> {
        self.load(&blockinfo_key(id))
    }

    pub fn put_block_info(&self, id: &Hash, info: &BlockInfo) -> Result<(), StorageError> {
        self.save(&blockinfo_key(id), info)
    }

    /// Whether the block has been validated, without decoding its state
    pub fn block_info_exists(&self, id: &Hash) -> Result<bool, StorageError> {
        self.store.exists(&blockinfo_key(id))
    }

    pub fn get_chain_tip(&self) -> Result<Option<ChainTip>, StorageError> {
        self.load(CHAINTIP_KEY)
    }

    pub fn put_chain_tip(&self, tip: &ChainTip) -> Result<(), StorageError> {
        self.save(CHAINTIP_KEY, tip)
    }

    /// Load the persisted mempool, if both halves were written
    pub fn get_mempool(&self) -> Result<Option<(Vec<Hash>, UTXOSet)>, StorageError> {
        let txids: Option<Vec<Hash>> = self.load(MEMPOOL_TXIDS_KEY)?;
        let state: Option<UTXOSet> = self.load(MEMPOOL_STATE_KEY)?;
        Ok(txids.zip(state))
    }

    pub fn put_mempool(&self, txids: &[Hash], state: &UTXOSet) -> Result<(), StorageError> {
        self.save(MEMPOOL_TXIDS_KEY, &txids)?;
        self.save(MEMPOOL_STATE_KEY, state)
    }
}

impl std::fmt::Debug for ChainDB {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainDB").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash_bytes;
    use crate::validation::Outpoint;

    fn roundtrip_records(db: &ChainDB) {
        let id = hash_bytes(b"block");
        assert_eq!(db.get_block_info(&id).unwrap(), None);
        assert!(!db.block_info_exists(&id).unwrap());

        let info = BlockInfo {
            height: 4,
            state_after: [Outpoint::new(hash_bytes(b"tx"), 1)].into_iter().collect(),
        };
        db.put_block_info(&id, &info).unwrap();
        assert_eq!(db.get_block_info(&id).unwrap(), Some(info.clone()));
        assert!(db.block_info_exists(&id).unwrap());
        assert!(!db.object_exists(&id).unwrap());

        let tip = ChainTip { blockid: id, height: 4 };
        db.put_chain_tip(&tip).unwrap();
        assert_eq!(db.get_chain_tip().unwrap(), Some(tip));

        assert!(db.get_mempool().unwrap().is_none());
        db.put_mempool(&[hash_bytes(b"tx")], &info.state_after).unwrap();
        let (txids, state) = db.get_mempool().unwrap().unwrap();
        assert_eq!(txids, vec![hash_bytes(b"tx")]);
        assert_eq!(state, info.state_after);
    }

    #[test]
    fn test_memory_store_records() {
        roundtrip_records(&ChainDB::new(Arc::new(MemoryStore::new())));
    }

    #[test]
    fn test_sled_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = hash_bytes(b"object");
        {
            let db = ChainDB::new(Arc::new(SledStore::open(dir.path()).unwrap()));
            roundtrip_records(&db);
            db.put_object_bytes(&id, br#"{"type":"block"}"#).unwrap();
        }

        let db = ChainDB::new(Arc::new(SledStore::open(dir.path()).unwrap()));
        assert!(db.object_exists(&id).unwrap());
        assert_eq!(db.get_chain_tip().unwrap().map(|t| t.height), Some(4));
    }

    #[test]
    fn test_object_keys_are_namespaced() {
        let store = Arc::new(MemoryStore::new());
        let db = ChainDB::new(store.clone());
        let id = hash_bytes(b"x");
        db.put_object_bytes(&id, b"{}").unwrap();

        assert!(store.exists(&format!("object:{id}")).unwrap());
        assert!(db.get_block_info(&id).unwrap().is_none());
    }
}
