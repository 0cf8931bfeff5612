//! Transaction mempool
//!
//! Pending transactions in arrival order, plus the UTXO state they produce on
//! top of the best chain tip. Every pooled transaction applies cleanly to the
//! state left by the ones before it.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::consensus::{Forks, Object};
use crate::crypto::Hash;
use crate::storage::{ChainDB, ObjectManager, StorageError, UTXOSet};
use crate::validation::Transaction;

/// Transaction mempool
#[derive(Debug)]
pub struct Mempool {
    txs: Vec<Transaction>,
    state: UTXOSet,
    db: ChainDB,
}

impl Mempool {
    /// Load the persisted mempool, or start empty on top of `tip_state`
    pub fn load(objects: &ObjectManager, tip_state: &UTXOSet) -> Result<Self, StorageError> {
        let db = objects.db().clone();
        let Some((txids, state)) = db.get_mempool()? else {
            debug!("No cached mempool; starting from the chain tip state");
            return Ok(Self {
                txs: Vec::new(),
                state: tip_state.clone(),
                db,
            });
        };

        let mut txs = Vec::with_capacity(txids.len());
        for txid in &txids {
            match objects.get(txid)? {
                Some(Object::Transaction(tx)) => txs.push(tx),
                _ => break,
            }
        }
        if txs.len() == txids.len() {
            info!("Loaded cached mempool with {} transactions", txs.len());
            return Ok(Self { txs, state, db });
        }

        warn!("Cached mempool references missing transactions; rebuilding it");
        let mut mempool = Self {
            txs: Vec::new(),
            state: tip_state.clone(),
            db,
        };
        for tx in txs {
            mempool.admit(tx);
        }
        mempool.save()?;
        Ok(mempool)
    }

    /// Offer a validated transaction; `false` if it does not fit the pool state
    pub fn on_transaction_arrival(&mut self, tx: Transaction) -> Result<bool, StorageError> {
        let admitted = self.admit(tx);
        if admitted {
            self.save()?;
        }
        Ok(admitted)
    }

    fn admit(&mut self, tx: Transaction) -> bool {
        if tx.is_coinbase() {
            return false;
        }
        match self.state.apply(&tx) {
            Ok(()) => {
                debug!("Added transaction {} to mempool", tx.txid());
                self.txs.push(tx);
                true
            }
            Err(e) => {
                debug!("Transaction not added to mempool: {}", e);
                false
            }
        }
    }

    /// Rebuild the pool on top of the new best chain.
    ///
    /// Transactions of abandoned blocks come first, then the previously pooled
    /// ones; whatever no longer applies to the new tip state is dropped.
    pub fn reorg(&mut self, objects: &ObjectManager, forks: &Forks) -> Result<(), StorageError> {
        let mut candidates = Vec::new();
        for block in &forks.short {
            for txid in &block.block.txids {
                match objects.get(txid)? {
                    Some(Object::Transaction(tx)) if !tx.is_coinbase() => candidates.push(tx),
                    Some(_) => {}
                    None => warn!("Transaction {} of orphaned block {} is missing", txid, block.id),
                }
            }
        }
        let orphaned = candidates.len();
        candidates.append(&mut self.txs);

        let tip = forks.long.last().unwrap_or(&forks.lca);
        self.state = UTXOSet::clone(&tip.state_after);

        let offered = candidates.len();
        for tx in candidates {
            self.admit(tx);
        }
        info!(
            "Mempool reorganized onto {}: kept {} of {} transactions ({} from orphaned blocks)",
            tip.id,
            self.txs.len(),
            offered,
            orphaned
        );
        self.save()
    }

    fn save(&self) -> Result<(), StorageError> {
        self.db.put_mempool(&self.txids(), &self.state)
    }

    /// Pooled transaction ids in order
    pub fn txids(&self) -> Vec<Hash> {
        self.txs.iter().map(Transaction::txid).collect()
    }

    /// Chain tip state with every pooled transaction applied
    pub fn state(&self) -> &UTXOSet {
        &self.state
    }

    pub fn contains(&self, txid: &Hash) -> bool {
        self.txs.iter().any(|tx| tx.txid() == *txid)
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }
}
