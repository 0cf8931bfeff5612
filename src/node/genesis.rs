//! Genesis block
//!
//! The first block is hard-coded; a block with no parent is valid only if it
//! is byte-for-byte this one.

use crate::consensus::Block;
use crate::crypto::Hash;

pub const GENESIS_CREATED: u64 = 1624219079;
pub const GENESIS_MINER: &str = "dionyziz";
pub const GENESIS_NONCE: &str =
    "0000000000000000000000000000000000000000000000000000002634878840";
pub const GENESIS_NOTE: &str =
    "The Economist 2021-06-20: Crypto-miners are probably to blame for the graphics-chip shortage";

/// Build the genesis block for a network with the given target
pub fn genesis_block(target: Hash) -> Block {
    Block {
        target,
        created: GENESIS_CREATED,
        miner: Some(GENESIS_MINER.to_string()),
        nonce: GENESIS_NONCE.to_string(),
        note: Some(GENESIS_NOTE.to_string()),
        previd: None,
        txids: Vec::new(),
    }
}
