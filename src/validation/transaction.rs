//! Transaction structure and validation
//!
//! UTXO-based transactions with Ed25519 signatures. A coinbase carries a
//! `height` and no `inputs`; a spending transaction carries `inputs` and no
//! `height`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

use super::{nullable, present};
use crate::consensus::Object;
use crate::crypto::{canonical_string, hash_bytes, Hash, PrivateKey, PublicKey, Signature};
use crate::storage::{ObjectManager, StorageError};

/// Transaction validation errors
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Invalid coinbase transaction {0}: a coinbase must have at most one output")]
    CoinbaseTooManyOutputs(Hash),
    #[error("Coinbase transaction {txid} must be the first in its block, found at index {index}")]
    CoinbaseNotFirst { txid: Hash, index: usize },
    #[error("Transaction {txid} references unknown outpoint {outpoint}")]
    UnknownOutpoint { txid: Hash, outpoint: Outpoint },
    #[error("Transaction {txid} spends the coinbase of the block that contains it")]
    ImmatureCoinbaseSpend { txid: Hash },
    #[error("Signature validation failed for input {index} of transaction {txid}")]
    BadSignature { txid: Hash, index: usize },
    #[error(
        "Transaction {txid} does not respect the law of conservation: \
         inputs sum to {inputs}, outputs sum to {outputs}"
    )]
    ConservationViolation { txid: Hash, inputs: u64, outputs: u64 },
    #[error("Value overflow in transaction {0}")]
    ValueOverflow(Hash),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Reference to one output of a previously seen transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Outpoint {
    /// Hash of the transaction containing the output
    pub txid: Hash,
    /// Index of the output in that transaction
    pub index: u64,
}

impl Outpoint {
    pub fn new(txid: Hash, index: u64) -> Self {
        Self { txid, index }
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("txid".into(), self.txid.to_hex().into());
        map.insert("index".into(), self.index.into());
        Value::Object(map)
    }
}

impl fmt::Display for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

impl FromStr for Outpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (txid, index) = s
            .split_once(':')
            .ok_or_else(|| format!("malformed outpoint {s:?}"))?;
        let txid = Hash::from_hex(txid).map_err(|e| format!("malformed outpoint txid: {e}"))?;
        let index = index
            .parse()
            .map_err(|e| format!("malformed outpoint index: {e}"))?;
        Ok(Outpoint { txid, index })
    }
}

/// A transaction input spending a previous output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TxInput {
    pub outpoint: Outpoint,
    /// Signature proving ownership; `null` only while unsigned
    #[serde(deserialize_with = "nullable")]
    pub sig: Option<Signature>,
}

impl TxInput {
    pub fn unsigned(outpoint: Outpoint) -> Self {
        Self { outpoint, sig: None }
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("outpoint".into(), self.outpoint.to_value());
        map.insert(
            "sig".into(),
            self.sig.map_or(Value::Null, |sig| sig.to_hex().into()),
        );
        Value::Object(map)
    }
}

/// A transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TxOutput {
    /// Recipient public key
    pub pubkey: PublicKey,
    /// Amount in base units
    pub value: u64,
}

impl TxOutput {
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("pubkey".into(), self.pubkey.to_hex().into());
        map.insert("value".into(), self.value.into());
        Value::Object(map)
    }
}

/// A complete transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Transaction {
    /// Spent outputs; absent on a coinbase
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub inputs: Option<Vec<TxInput>>,
    pub outputs: Vec<TxOutput>,
    /// Height of the block minting this coinbase; absent on spending transactions
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub height: Option<u64>,
}

/// Position of a transaction inside the block being validated
#[derive(Debug, Clone, Copy)]
pub struct BlockContext {
    /// Index of the transaction in the block's `txids`
    pub index: usize,
    /// The block's own coinbase, if it has one
    pub coinbase: Option<Hash>,
}

impl Transaction {
    /// Create a new spending transaction
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        Self {
            inputs: Some(inputs),
            outputs,
            height: None,
        }
    }

    /// Create a coinbase transaction (mining reward)
    pub fn coinbase(height: u64, reward: u64, miner: PublicKey) -> Self {
        Self {
            inputs: None,
            outputs: vec![TxOutput {
                pubkey: miner,
                value: reward,
            }],
            height: Some(height),
        }
    }

    /// Check if this is a coinbase transaction
    pub fn is_coinbase(&self) -> bool {
        self.inputs.is_none()
    }

    /// Inputs of a spending transaction; empty for a coinbase
    pub fn inputs(&self) -> &[TxInput] {
        self.inputs.as_deref().unwrap_or(&[])
    }

    /// Structural checks beyond the serde schema
    pub fn check_format(&self) -> Result<(), String> {
        match (&self.inputs, self.height) {
            (Some(_), Some(_)) => Err("transaction carries both inputs and height".into()),
            (None, None) => Err("transaction carries neither inputs nor height".into()),
            (None, Some(_)) if self.outputs.len() > 1 => {
                Err("coinbase transaction has more than one output".into())
            }
            _ => Ok(()),
        }
    }

    /// JSON form of the transaction as a network object, `type` tag included.
    /// Holds only strings, integers and nulls.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("type".into(), "transaction".into());
        if let Some(inputs) = &self.inputs {
            map.insert("inputs".into(), inputs.iter().map(TxInput::to_value).collect());
        }
        map.insert(
            "outputs".into(),
            self.outputs.iter().map(TxOutput::to_value).collect(),
        );
        if let Some(height) = self.height {
            map.insert("height".into(), height.into());
        }
        Value::Object(map)
    }

    /// Canonical JSON of the transaction as a network object
    pub fn canonical_json(&self) -> String {
        canonical_string(&self.to_value())
    }

    /// Calculate transaction id
    pub fn txid(&self) -> Hash {
        hash_bytes(self.canonical_json().as_bytes())
    }

    /// The transaction with every input signature cleared
    pub fn unsigned(&self) -> Transaction {
        Transaction {
            inputs: self
                .inputs
                .as_ref()
                .map(|inputs| inputs.iter().map(|i| TxInput::unsigned(i.outpoint)).collect()),
            outputs: self.outputs.clone(),
            height: self.height,
        }
    }

    /// The message every input signs
    pub fn signing_message(&self) -> String {
        self.unsigned().canonical_json()
    }

    /// Sign every input; `keys[i]` signs input `i`
    pub fn sign(&mut self, keys: &[&PrivateKey]) {
        let message = self.signing_message();
        if let Some(inputs) = self.inputs.as_mut() {
            for (input, key) in inputs.iter_mut().zip(keys) {
                input.sig = Some(key.sign(message.as_bytes()));
            }
        }
    }

    /// Calculate total output value, `None` on overflow
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, o| acc.checked_add(o.value))
    }

    /// Validate the transaction against stored objects and return its fees.
    ///
    /// With a `context`, the transaction is checked as a member of a block:
    /// a coinbase must sit at index 0 and no input may spend the block's own
    /// coinbase.
    pub fn validate(
        &self,
        objects: &ObjectManager,
        context: Option<BlockContext>,
    ) -> Result<u64, TransactionError> {
        let txid = self.txid();
        debug!("Validating transaction {}", txid);

        let inputs = match &self.inputs {
            None => {
                if self.outputs.len() > 1 {
                    return Err(TransactionError::CoinbaseTooManyOutputs(txid));
                }
                if let Some(ctx) = context {
                    if ctx.index != 0 {
                        return Err(TransactionError::CoinbaseNotFirst {
                            txid,
                            index: ctx.index,
                        });
                    }
                }
                return Ok(0);
            }
            Some(inputs) => inputs,
        };

        let block_coinbase = context.and_then(|ctx| ctx.coinbase);
        let mut spent = Vec::with_capacity(inputs.len());
        for input in inputs {
            if block_coinbase == Some(input.outpoint.txid) {
                return Err(TransactionError::ImmatureCoinbaseSpend { txid });
            }
            spent.push(resolve_outpoint(objects, txid, &input.outpoint)?);
        }

        let message = self.signing_message();
        for (index, (input, output)) in inputs.iter().zip(&spent).enumerate() {
            let verified = input
                .sig
                .map(|sig| output.pubkey.verify(message.as_bytes(), &sig))
                .unwrap_or(false);
            if !verified {
                return Err(TransactionError::BadSignature { txid, index });
            }
        }

        let sum_inputs = spent
            .iter()
            .try_fold(0u64, |acc, o| acc.checked_add(o.value))
            .ok_or(TransactionError::ValueOverflow(txid))?;
        let sum_outputs = self
            .total_output_value()
            .ok_or(TransactionError::ValueOverflow(txid))?;
        debug!(
            "Transaction {} inputs sum to {}, outputs sum to {}",
            txid, sum_inputs, sum_outputs
        );
        if sum_inputs < sum_outputs {
            return Err(TransactionError::ConservationViolation {
                txid,
                inputs: sum_inputs,
                outputs: sum_outputs,
            });
        }

        let fees = sum_inputs - sum_outputs;
        debug!("Transaction {} is valid and pays fees {}", txid, fees);
        Ok(fees)
    }
}

/// Look up the output an outpoint refers to among stored transactions
fn resolve_outpoint(
    objects: &ObjectManager,
    spender: Hash,
    outpoint: &Outpoint,
) -> Result<TxOutput, TransactionError> {
    let unknown = || TransactionError::UnknownOutpoint {
        txid: spender,
        outpoint: *outpoint,
    };
    match objects.get(&outpoint.txid)? {
        Some(Object::Transaction(tx)) => usize::try_from(outpoint.index)
            .ok()
            .and_then(|i| tx.outputs.get(i))
            .cloned()
            .ok_or_else(unknown),
        _ => Err(unknown()),
    }
}
