//! Coinbase policy
//!
//! A coinbase may claim at most the fixed block reward plus the fees of the
//! other transactions in its block, and must name its block's height.

use thiserror::Error;

use crate::crypto::Hash;
use crate::validation::Transaction;

/// Coinbase policy violations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoinbasePolicyError {
    #[error(
        "Coinbase transaction {txid} does not respect macroeconomic policy: \
         output is {claimed}, while reward is {reward} and fees are {fees}"
    )]
    ExcessiveClaim {
        txid: Hash,
        claimed: u64,
        reward: u64,
        fees: u64,
    },
    #[error("Coinbase transaction {txid} indicates height {claimed}, while the block has height {height}")]
    HeightMismatch { txid: Hash, claimed: u64, height: u64 },
}

/// Value a coinbase claims; a coinbase without outputs claims nothing
pub fn coinbase_claim(coinbase: &Transaction) -> u64 {
    coinbase.outputs.first().map(|o| o.value).unwrap_or(0)
}

/// Check a block's coinbase against the reward schedule
pub fn check_coinbase(
    coinbase: &Transaction,
    height: u64,
    reward: u64,
    fees: u64,
) -> Result<(), CoinbasePolicyError> {
    let txid = coinbase.txid();
    let claimed = coinbase_claim(coinbase);
    // Saturating: a sum past u64::MAX already exceeds any representable claim
    if claimed > reward.saturating_add(fees) {
        return Err(CoinbasePolicyError::ExcessiveClaim {
            txid,
            claimed,
            reward,
            fees,
        });
    }
    let claimed_height = coinbase.height.unwrap_or_default();
    if claimed_height != height {
        return Err(CoinbasePolicyError::HeightMismatch {
            txid,
            claimed: claimed_height,
            height,
        });
    }
    Ok(())
}
