//! Block validation errors and the single-flight registry
//!
//! Each block id is validated by at most one task at a time. Other callers
//! subscribe to the running validation's outcome instead of repeating it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;

use super::{ChainError, CoinbasePolicyError};
use crate::crypto::Hash;
use crate::storage::{StorageError, UtxoError};
use crate::validation::TransactionError;

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Block {id} does not specify the fixed target, but uses target {target} instead")]
    BadTarget { id: Hash, target: Hash },
    #[error("Block {0} does not satisfy the proof-of-work equation")]
    InsufficientWork(Hash),
    #[error("Invalid genesis block {0}")]
    InvalidGenesis(Hash),
    #[error("Got parent {parent} of block {id}, but it is not a block")]
    InvalidParentType { id: Hash, parent: Hash },
    #[error("Parent of block {id} was rejected: {reason}")]
    ParentRejected { id: Hash, reason: String },
    #[error("Parent of block {id} was created at {parent_created}, not before the block's {created}")]
    TimestampNotIncreasing {
        id: Hash,
        parent_created: u64,
        created: u64,
    },
    #[error("Block {id} has a timestamp {created} in the future; current time is {now}")]
    TimestampInFuture { id: Hash, created: u64, now: u64 },
    #[error("Retrieval of transactions of block {id} failed: {reason}")]
    MissingTransactionDependency { id: Hash, reason: String },
    #[error("Block {block} lists {txid}, which is not a transaction")]
    NotATransaction { block: Hash, txid: Hash },
    #[error("Invalid transaction: {0}")]
    Transaction(#[from] TransactionError),
    #[error("Transactions do not apply: {0}")]
    Utxo(#[from] UtxoError),
    #[error(
        "Coinbase transaction {txid} does not respect macroeconomic policy: \
         output is {claimed}, while reward is {reward} and fees are {fees}"
    )]
    CoinbaseViolatesPolicy {
        txid: Hash,
        claimed: u64,
        reward: u64,
        fees: u64,
    },
    #[error("Coinbase transaction {txid} indicates height {claimed}, while the block has height {height}")]
    CoinbaseHeightMismatch { txid: Hash, claimed: u64, height: u64 },
    #[error("Block {0} validation failure received through propagation")]
    PropagatedFailure(Hash),
    #[error("Fee total of block {0} overflows")]
    ValueOverflow(Hash),
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CoinbasePolicyError> for ValidationError {
    fn from(err: CoinbasePolicyError) -> Self {
        match err {
            CoinbasePolicyError::ExcessiveClaim {
                txid,
                claimed,
                reward,
                fees,
            } => ValidationError::CoinbaseViolatesPolicy {
                txid,
                claimed,
                reward,
                fees,
            },
            CoinbasePolicyError::HeightMismatch {
                txid,
                claimed,
                height,
            } => ValidationError::CoinbaseHeightMismatch {
                txid,
                claimed,
                height,
            },
        }
    }
}

/// Outcome slot shared by one validation and its subscribers
type Outcome = watch::Receiver<Option<bool>>;

/// Per-block registry of running validations
#[derive(Debug, Default)]
pub struct InFlightValidations {
    entries: Mutex<HashMap<Hash, Outcome>>,
}

/// What a caller should do about a block it wants validated
#[derive(Debug)]
pub enum Flight {
    /// Already validated earlier
    Cached,
    /// The caller runs the validation and must resolve the guard
    Leader(FlightGuard),
    /// Another task is validating; wait for its outcome
    Follower(Outcome),
}

impl InFlightValidations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically check the cache, join a running validation, or start one
    pub fn join(
        self: &Arc<Self>,
        id: Hash,
        is_cached: impl FnOnce() -> Result<bool, StorageError>,
    ) -> Result<Flight, StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        if let Some(outcome) = entries.get(&id) {
            return Ok(Flight::Follower(outcome.clone()));
        }
        // Under the lock: a finished leader saves its results before leaving the map
        if is_cached()? {
            return Ok(Flight::Cached);
        }
        let (sender, receiver) = watch::channel(None);
        entries.insert(id, receiver);
        Ok(Flight::Leader(FlightGuard {
            registry: Arc::clone(self),
            id,
            sender,
        }))
    }

    pub fn is_pending(&self, id: &Hash) -> bool {
        self.entries
            .lock()
            .map(|entries| entries.contains_key(id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held by the task validating a block.
///
/// Dropping the guard without `succeed` resolves subscribers with failure and
/// clears the entry, so a later announcement validates from scratch.
#[derive(Debug)]
pub struct FlightGuard {
    registry: Arc<InFlightValidations>,
    id: Hash,
    sender: watch::Sender<Option<bool>>,
}

impl FlightGuard {
    pub fn succeed(&self) {
        self.sender.send_replace(Some(true));
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if self.sender.borrow().is_none() {
            self.sender.send_replace(Some(false));
        }
        if let Ok(mut entries) = self.registry.entries.lock() {
            entries.remove(&self.id);
        }
    }
}

/// Wait for a running validation; `true` if it succeeded
pub async fn await_outcome(mut outcome: Outcome) -> bool {
    match outcome.wait_for(Option::is_some).await {
        Ok(result) => *result == Some(true),
        Err(_) => false,
    }
}
