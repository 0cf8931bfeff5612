//! UTXO set implementation
//!
//! Snapshot of spendable outpoints. Snapshots are plain values: callers clone
//! before applying speculatively, so a failed application never disturbs the
//! state it started from.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::crypto::Hash;
use crate::validation::{Outpoint, Transaction};

/// UTXO application errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UtxoError {
    #[error("Transaction {txid} spends {outpoint}, which is unknown or already spent")]
    DoubleSpendOrUnknown { txid: Hash, outpoint: Outpoint },
    #[error("Transaction {txid} spends {outpoint} more than once")]
    ConflictingInternalSpend { txid: Hash, outpoint: Outpoint },
}

/// Set of all unspent transaction outputs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<String>", try_from = "Vec<String>")]
pub struct UTXOSet {
    outpoints: HashSet<Outpoint>,
}

impl UTXOSet {
    /// Create a new empty UTXO set
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if an outpoint is spendable
    pub fn contains(&self, outpoint: &Outpoint) -> bool {
        self.outpoints.contains(outpoint)
    }

    /// Add an outpoint
    pub fn insert(&mut self, outpoint: Outpoint) {
        self.outpoints.insert(outpoint);
    }

    /// Apply a transaction: spent outpoints are removed, one outpoint per
    /// output is added. Every input is checked before anything changes.
    pub fn apply(&mut self, tx: &Transaction) -> Result<(), UtxoError> {
        let txid = tx.txid();
        let mut seen = HashSet::new();
        for input in tx.inputs() {
            let outpoint = input.outpoint;
            if !self.outpoints.contains(&outpoint) {
                return Err(UtxoError::DoubleSpendOrUnknown {
                    txid,
                    outpoint,
                });
            }
            if !seen.insert(outpoint) {
                return Err(UtxoError::ConflictingInternalSpend {
                    txid,
                    outpoint,
                });
            }
        }

        for outpoint in seen {
            self.outpoints.remove(&outpoint);
        }
        for index in 0..tx.outputs.len() {
            self.outpoints.insert(Outpoint::new(txid, index as u64));
        }
        Ok(())
    }

    /// Apply transactions in order, stopping at the first failure.
    ///
    /// Callers that need all-or-nothing semantics apply to a clone.
    pub fn apply_multiple<'a, I>(&mut self, txs: I) -> Result<(), UtxoError>
    where
        I: IntoIterator<Item = &'a Transaction>,
    {
        for tx in txs {
            self.apply(tx)?;
        }
        Ok(())
    }

    /// Outpoints in a stable order
    pub fn sorted(&self) -> Vec<Outpoint> {
        let mut outpoints: Vec<Outpoint> = self.outpoints.iter().copied().collect();
        outpoints.sort();
        outpoints
    }

    /// Get total number of UTXOs
    pub fn len(&self) -> usize {
        self.outpoints.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.outpoints.is_empty()
    }
}

impl From<UTXOSet> for Vec<String> {
    fn from(set: UTXOSet) -> Self {
        set.sorted().iter().map(Outpoint::to_string).collect()
    }
}

impl TryFrom<Vec<String>> for UTXOSet {
    type Error = String;

    fn try_from(outpoints: Vec<String>) -> Result<Self, Self::Error> {
        outpoints
            .iter()
            .map(|s| s.parse::<Outpoint>())
            .collect::<Result<HashSet<_>, _>>()
            .map(|outpoints| UTXOSet { outpoints })
    }
}

impl FromIterator<Outpoint> for UTXOSet {
    fn from_iter<I: IntoIterator<Item = Outpoint>>(iter: I) -> Self {
        UTXOSet {
            outpoints: iter.into_iter().collect(),
        }
    }
}
