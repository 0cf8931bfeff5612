//! Block structure and network objects
//!
//! Blocks reference their transactions by id; the transactions themselves
//! travel as separate objects.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::crypto::{canonical_string, hash_bytes, Hash};
use crate::storage::UTXOSet;
use crate::validation::{nullable, present, Transaction};

/// Longest allowed `miner` or `note`
pub const MAX_LABEL_LEN: usize = 128;

/// A block as it travels on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Block {
    /// Proof-of-work target
    #[serde(rename = "T")]
    pub target: Hash,
    /// Creation time (seconds since Unix epoch)
    pub created: u64,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub miner: Option<String>,
    pub nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub note: Option<String>,
    /// Parent block id; `null` only for genesis
    #[serde(deserialize_with = "nullable")]
    pub previd: Option<Hash>,
    pub txids: Vec<Hash>,
}

impl Block {
    /// JSON form of the block as a network object, `type` tag included
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("type".into(), "block".into());
        map.insert("T".into(), self.target.to_hex().into());
        map.insert("created".into(), self.created.into());
        if let Some(miner) = &self.miner {
            map.insert("miner".into(), miner.as_str().into());
        }
        map.insert("nonce".into(), self.nonce.as_str().into());
        if let Some(note) = &self.note {
            map.insert("note".into(), note.as_str().into());
        }
        map.insert(
            "previd".into(),
            self.previd.map_or(Value::Null, |id| id.to_hex().into()),
        );
        map.insert(
            "txids".into(),
            self.txids.iter().map(|id| id.to_hex()).collect(),
        );
        Value::Object(map)
    }

    /// Canonical JSON of the block as a network object
    pub fn canonical_json(&self) -> String {
        canonical_string(&self.to_value())
    }

    /// Get the block id
    pub fn id(&self) -> Hash {
        hash_bytes(self.canonical_json().as_bytes())
    }

    /// Check if this claims to be the genesis block
    pub fn is_genesis(&self) -> bool {
        self.previd.is_none()
    }

    /// Structural checks beyond the serde schema
    pub fn check_format(&self) -> Result<(), String> {
        for (name, label) in [("miner", &self.miner), ("note", &self.note)] {
            if let Some(label) = label {
                if !is_human_readable(label) {
                    return Err(format!(
                        "block {name} must be 1 to {MAX_LABEL_LEN} printable ASCII characters"
                    ));
                }
            }
        }
        Ok(())
    }
}

fn is_human_readable(s: &str) -> bool {
    !s.is_empty() && s.len() <= MAX_LABEL_LEN && s.bytes().all(|b| (b' '..=b'~').contains(&b))
}

/// Any object that can be exchanged with peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Object {
    Transaction(Transaction),
    Block(Block),
}

impl Object {
    /// Canonical JSON, the form that is hashed and stored
    pub fn canonical_json(&self) -> String {
        match self {
            Object::Transaction(tx) => tx.canonical_json(),
            Object::Block(block) => block.canonical_json(),
        }
    }

    /// Content-addressed object id
    pub fn id(&self) -> Hash {
        match self {
            Object::Transaction(tx) => tx.txid(),
            Object::Block(block) => block.id(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Object::Transaction(_) => "transaction",
            Object::Block(_) => "block",
        }
    }

    /// Structural checks every object must pass before it is stored
    pub fn check_format(&self) -> Result<(), String> {
        match self {
            Object::Transaction(tx) => tx.check_format(),
            Object::Block(block) => block.check_format(),
        }
    }

    /// Parse an object, schema and format rules included
    pub fn from_json(bytes: &[u8]) -> Result<Self, String> {
        let object: Object = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
        object.check_format()?;
        Ok(object)
    }
}

/// A block together with the facts established by validating it
#[derive(Debug, Clone)]
pub struct ValidBlock {
    pub block: Block,
    pub id: Hash,
    pub height: u64,
    pub state_after: Arc<UTXOSet>,
}
