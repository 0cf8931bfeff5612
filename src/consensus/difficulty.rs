//! Proof-of-work target and consensus parameters
//!
//! The target is fixed; there is no difficulty adjustment.

use crate::constants::{BLOCK_REWARD, TARGET};
use crate::crypto::Hash;
use crate::node::genesis_block;

use super::Block;

/// Parameters every peer on a network must agree on
#[derive(Debug, Clone)]
pub struct ConsensusParams {
    /// Fixed proof-of-work target
    pub target: Hash,
    /// Maximum new coins a coinbase may claim besides fees
    pub block_reward: u64,
    /// The hard-coded first block
    pub genesis: Block,
}

impl ConsensusParams {
    /// The public network
    pub fn mainnet() -> Self {
        Self {
            target: TARGET,
            block_reward: BLOCK_REWARD,
            genesis: genesis_block(TARGET),
        }
    }

    /// Test network: identical rules, but every hash meets the target
    pub fn regtest() -> Self {
        let target = Hash::from_bytes([0xff; 32]);
        Self {
            target,
            block_reward: BLOCK_REWARD,
            genesis: genesis_block(target),
        }
    }

    pub fn genesis_id(&self) -> Hash {
        self.genesis.id()
    }
}

/// Check that `id`, read as a big-endian integer, does not exceed `target`
pub fn meets_target(id: &Hash, target: &Hash) -> bool {
    id.cmp_numeric(target).is_le()
}
