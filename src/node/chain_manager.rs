//! Best chain tracking
//!
//! The tip only moves to strictly higher blocks. The mempool is reconciled
//! with the new chain before the tip is published or persisted.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::Mempool;
use crate::consensus::{get_forks, load_valid_block, ChainError, ConsensusParams, Object, ValidBlock};
use crate::storage::{BlockInfo, ChainTip, ObjectManager, UTXOSet};

/// Tracks the current best tip
#[derive(Debug)]
pub struct ChainManager {
    tip: ValidBlock,
}

impl ChainManager {
    /// Restore the persisted tip, or start at genesis
    pub fn load(objects: &ObjectManager, params: &ConsensusParams) -> Result<Self, ChainError> {
        if let Some(tip) = objects.db().get_chain_tip()? {
            match load_valid_block(objects, &tip.blockid)? {
                Some(block) => {
                    info!("Loaded chain tip {} at height {}", block.id, block.height);
                    return Ok(Self { tip: block });
                }
                None => warn!("Persisted chain tip {} is unknown; restarting from genesis", tip.blockid),
            }
        }

        let genesis = Self::init_genesis(objects, params)?;
        info!("Initialized chain at genesis {}", genesis.id);
        let manager = Self { tip: genesis };
        manager.persist(objects)?;
        Ok(manager)
    }

    /// Store the genesis block and its (empty) resulting state
    fn init_genesis(objects: &ObjectManager, params: &ConsensusParams) -> Result<ValidBlock, ChainError> {
        let block = params.genesis.clone();
        let id = objects.put(&Object::Block(block.clone()))?;
        let info = BlockInfo {
            height: 0,
            state_after: UTXOSet::new(),
        };
        objects.db().put_block_info(&id, &info)?;
        Ok(ValidBlock {
            block,
            id,
            height: 0,
            state_after: Arc::new(info.state_after),
        })
    }

    /// Consider a newly validated block; returns whether the tip moved
    pub fn on_valid_block_arrival(
        &mut self,
        objects: &ObjectManager,
        block: &ValidBlock,
        mempool: &mut Mempool,
    ) -> Result<bool, ChainError> {
        if block.height <= self.tip.height {
            debug!(
                "Block {} at height {} does not extend the tip at height {}",
                block.id, block.height, self.tip.height
            );
            return Ok(false);
        }

        let forks = get_forks(objects, &self.tip, block)?;
        if !forks.short.is_empty() {
            info!(
                "Reorg: abandoning {} blocks after {} for {} blocks ending at {}",
                forks.short.len(),
                forks.lca.id,
                forks.long.len(),
                block.id
            );
        }
        mempool.reorg(objects, &forks)?;

        self.tip = block.clone();
        self.persist(objects)?;
        info!("New chain tip {} at height {}", block.id, block.height);
        Ok(true)
    }

    fn persist(&self, objects: &ObjectManager) -> Result<(), ChainError> {
        objects.db().put_chain_tip(&ChainTip {
            blockid: self.tip.id,
            height: self.tip.height,
        })?;
        Ok(())
    }

    pub fn tip(&self) -> &ValidBlock {
        &self.tip
    }

    pub fn height(&self) -> u64 {
        self.tip.height
    }
}
