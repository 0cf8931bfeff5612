//! Node - chain state owner and object validation driver
//!
//! `Node` is shared by every connection. Chain tip and mempool live behind a
//! single async mutex, so all mutation of them is serialized; block state is
//! computed on private copies and only committed under that lock.

mod chain_manager;
mod genesis;
mod mempool;

pub use chain_manager::*;
pub use genesis::*;
pub use mempool::*;

use futures::future::{try_join_all, BoxFuture, FutureExt};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::consensus::{
    await_outcome, check_coinbase, load_valid_block, meets_target, Block, ChainError,
    ConsensusParams, Flight, FlightGuard, InFlightValidations, Object, ValidBlock,
    ValidationError,
};
use crate::crypto::Hash;
use crate::p2p::{Message, Peer};
use crate::storage::{BlockInfo, KeyValueStore, ObjectManager, StorageError, UTXOSet};
use crate::validation::{BlockContext, Transaction};

/// Capacity of the gossip channel shared by all connections
const GOSSIP_CAPACITY: usize = 1024;

/// Mutable chain state, owned by the node and guarded as a whole
#[derive(Debug)]
pub struct NodeState {
    pub chain: ChainManager,
    pub mempool: Mempool,
}

/// A full node
pub struct Node {
    params: ConsensusParams,
    objects: ObjectManager,
    validations: Arc<InFlightValidations>,
    state: Mutex<NodeState>,
    gossip: broadcast::Sender<Message>,
}

impl Node {
    /// Open a node on top of a key-value store
    pub fn open(params: ConsensusParams, store: Arc<dyn KeyValueStore>) -> Result<Arc<Self>, ChainError> {
        Self::with_objects(params, ObjectManager::new(store))
    }

    pub fn with_objects(params: ConsensusParams, objects: ObjectManager) -> Result<Arc<Self>, ChainError> {
        let chain = ChainManager::load(&objects, &params)?;
        let mempool = Mempool::load(&objects, &chain.tip().state_after)?;
        let (gossip, _) = broadcast::channel(GOSSIP_CAPACITY);

        Ok(Arc::new(Self {
            params,
            objects,
            validations: Arc::new(InFlightValidations::new()),
            state: Mutex::new(NodeState { chain, mempool }),
            gossip,
        }))
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    pub fn objects(&self) -> &ObjectManager {
        &self.objects
    }

    /// Exclusive access to chain tip and mempool
    pub async fn state(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().await
    }

    /// Messages to broadcast to every connected peer
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.gossip.subscribe()
    }

    pub async fn chain_tip(&self) -> (Hash, u64) {
        let state = self.state.lock().await;
        (state.chain.tip().id, state.chain.height())
    }

    pub async fn mempool_txids(&self) -> Vec<Hash> {
        self.state.lock().await.mempool.txids()
    }

    pub fn is_validating(&self, id: &Hash) -> bool {
        self.validations.is_pending(id)
    }

    /// Handle an object received from a peer; returns whether it was new.
    ///
    /// New objects are stored before validation so that pending retrievals
    /// see them, and gossiped only once they validate.
    pub async fn on_object(
        self: &Arc<Self>,
        object: Object,
        peer: Arc<dyn Peer>,
    ) -> Result<bool, ValidationError> {
        let id = object.id();
        let known = self.objects.exists(&id)?;
        if known {
            debug!("Object {} is already known", id);
        } else {
            info!("New {} {} downloaded", object.kind(), id);
            self.objects.put(&object)?;
        }

        self.validate_object(object, peer).await?;

        if !known {
            // No subscribers just means no connections
            let _ = self.gossip.send(Message::IHaveObject { objectid: id });
        }
        Ok(!known)
    }

    /// Validate an object according to its type
    pub async fn validate_object(
        self: &Arc<Self>,
        object: Object,
        peer: Arc<dyn Peer>,
    ) -> Result<(), ValidationError> {
        match object {
            Object::Transaction(tx) => self.validate_transaction(tx).await,
            Object::Block(block) => self.validate_block(block, peer).await.map(|_| ()),
        }
    }

    /// Validate a standalone transaction and offer it to the mempool
    pub async fn validate_transaction(&self, tx: Transaction) -> Result<(), ValidationError> {
        let txid = tx.txid();
        debug!("Validating transaction {}", txid);
        tx.validate(&self.objects, None)?;

        if !tx.is_coinbase() {
            let mut state = self.state.lock().await;
            if !state.mempool.on_transaction_arrival(tx)? {
                debug!("Transaction {} is valid but does not fit the mempool", txid);
            }
        }
        Ok(())
    }

    /// Validate a block, its ancestors first.
    ///
    /// Concurrent calls for one block share a single validation. On success
    /// the block's height and resulting state are cached and the chain
    /// manager is notified.
    pub fn validate_block(
        self: &Arc<Self>,
        block: Block,
        peer: Arc<dyn Peer>,
    ) -> BoxFuture<'static, Result<ValidBlock, ValidationError>> {
        let node = Arc::clone(self);
        async move {
            let id = block.id();
            debug!("Validating block {}", id);

            let flight = node
                .validations
                .join(id, || node.objects.db().block_info_exists(&id))?;
            match flight {
                Flight::Cached => {
                    let valid = node.cached_block(&id)?;
                    // The tip lags a cached block if an earlier commit was interrupted
                    node.offer_to_chain(&valid).await?;
                    Ok(valid)
                }
                Flight::Follower(outcome) => {
                    debug!("Block {} is already pending validation. Waiting.", id);
                    if await_outcome(outcome).await {
                        node.cached_block(&id)
                    } else {
                        Err(ValidationError::PropagatedFailure(id))
                    }
                }
                Flight::Leader(guard) => {
                    // Dropping the guard on any error resolves followers with failure
                    let valid = node.check_block(&block, id, &peer).await?;
                    node.commit_block(valid, guard).await
                }
            }
        }
        .boxed()
    }

    fn cached_block(&self, id: &Hash) -> Result<ValidBlock, ValidationError> {
        load_valid_block(&self.objects, id)?
            .ok_or_else(|| ValidationError::Internal(format!("valid block {id} has no cached state")))
    }

    /// Run every consensus check and compute the block's resulting state
    async fn check_block(
        self: &Arc<Self>,
        block: &Block,
        id: Hash,
        peer: &Arc<dyn Peer>,
    ) -> Result<ValidBlock, ValidationError> {
        if block.target != self.params.target {
            return Err(ValidationError::BadTarget {
                id,
                target: block.target,
            });
        }
        debug!("Block target for {} is valid", id);
        if !meets_target(&id, &self.params.target) {
            return Err(ValidationError::InsufficientWork(id));
        }
        debug!("Block proof-of-work for {} is valid", id);

        let (height, state_before) = match block.previd {
            None => {
                if block.canonical_json() != self.params.genesis.canonical_json() {
                    return Err(ValidationError::InvalidGenesis(id));
                }
                debug!("Block {} is the genesis block", id);
                (0, Arc::new(UTXOSet::new()))
            }
            Some(previd) => {
                let parent = self.validate_parent(id, previd, peer).await?;
                if parent.block.created >= block.created {
                    return Err(ValidationError::TimestampNotIncreasing {
                        id,
                        parent_created: parent.block.created,
                        created: block.created,
                    });
                }
                let now = unix_now();
                if block.created > now {
                    return Err(ValidationError::TimestampInFuture {
                        id,
                        created: block.created,
                        now,
                    });
                }
                (parent.height + 1, parent.state_after)
            }
        };
        debug!("Block {} has valid ancestry and height {}", id, height);

        let txs = self.fetch_transactions(block, id, peer).await?;
        let coinbase = txs.first().filter(|tx| tx.is_coinbase());
        let context = |index| BlockContext {
            index,
            coinbase: coinbase.map(Transaction::txid),
        };

        let mut fees: u64 = 0;
        for (index, tx) in txs.iter().enumerate() {
            let tx_fees = tx.validate(&self.objects, Some(context(index)))?;
            fees = fees
                .checked_add(tx_fees)
                .ok_or(ValidationError::ValueOverflow(id))?;
        }

        let mut state_after = UTXOSet::clone(&state_before);
        state_after.apply_multiple(&txs)?;
        debug!("UTXO state of block {} calculated", id);

        if let Some(coinbase) = coinbase {
            check_coinbase(coinbase, height, self.params.block_reward, fees)?;
        }

        Ok(ValidBlock {
            block: block.clone(),
            id,
            height,
            state_after: Arc::new(state_after),
        })
    }

    /// Get the parent locally or from the peer, validating it if needed
    async fn validate_parent(
        self: &Arc<Self>,
        id: Hash,
        previd: Hash,
        peer: &Arc<dyn Peer>,
    ) -> Result<ValidBlock, ValidationError> {
        if let Some(parent) = load_valid_block(&self.objects, &previd)? {
            debug!("Parent block {} of block {} is already cached", previd, id);
            return Ok(parent);
        }

        debug!("Retrieving parent block of {} ({})", id, previd);
        let parent = match self.objects.retrieve(&previd, peer.as_ref()).await {
            Ok(Object::Block(parent)) => parent,
            Ok(Object::Transaction(_)) => {
                return Err(ValidationError::InvalidParentType { id, parent: previd });
            }
            Err(e) => {
                return Err(ValidationError::ParentRejected {
                    id,
                    reason: e.to_string(),
                });
            }
        };

        debug!("Awaiting validation of the parent block {} of block {}", previd, id);
        // Separate task: long unknown ancestries must not nest futures
        match tokio::spawn(self.validate_block(parent, Arc::clone(peer))).await {
            Ok(Ok(parent)) => Ok(parent),
            Ok(Err(e)) => Err(ValidationError::ParentRejected {
                id,
                reason: e.to_string(),
            }),
            Err(e) => Err(ValidationError::Internal(e.to_string())),
        }
    }

    async fn fetch_transactions(
        &self,
        block: &Block,
        id: Hash,
        peer: &Arc<dyn Peer>,
    ) -> Result<Vec<Transaction>, ValidationError> {
        let retrievals = block
            .txids
            .iter()
            .map(|txid| self.objects.retrieve(txid, peer.as_ref()));
        let objects = try_join_all(retrievals).await.map_err(|e| {
            ValidationError::MissingTransactionDependency {
                id,
                reason: e.to_string(),
            }
        })?;
        debug!("We have all {} transactions of block {}", block.txids.len(), id);

        objects
            .into_iter()
            .zip(&block.txids)
            .map(|(object, txid)| match object {
                Object::Transaction(tx) => Ok(tx),
                Object::Block(_) => Err(ValidationError::NotATransaction {
                    block: id,
                    txid: *txid,
                }),
            })
            .collect()
    }

    /// Cache the block's results, release followers, then update the chain
    async fn commit_block(
        &self,
        valid: ValidBlock,
        guard: FlightGuard,
    ) -> Result<ValidBlock, ValidationError> {
        let mut state = self.state.lock().await;
        self.objects.db().put_block_info(
            &valid.id,
            &BlockInfo {
                height: valid.height,
                state_after: UTXOSet::clone(&valid.state_after),
            },
        )?;
        guard.succeed();
        drop(guard);
        info!("Block {} is valid at height {}", valid.id, valid.height);

        let NodeState { chain, mempool } = &mut *state;
        chain.on_valid_block_arrival(&self.objects, &valid, mempool)?;
        Ok(valid)
    }

    /// Let the chain manager consider an already cached block; no-op unless it
    /// is higher than the current tip
    async fn offer_to_chain(&self, valid: &ValidBlock) -> Result<(), ValidationError> {
        let mut state = self.state.lock().await;
        let NodeState { chain, mempool } = &mut *state;
        chain.on_valid_block_arrival(&self.objects, valid, mempool)?;
        Ok(())
    }

    /// A peer announced its chain tip
    pub fn on_chain_tip_announced(&self, blockid: Hash, peer: &dyn Peer) -> Result<(), StorageError> {
        if !self.objects.exists(&blockid)? {
            debug!("Chain tip {} is unknown; requesting it", blockid);
            peer.send_get_object(blockid);
        }
        Ok(())
    }

    /// A peer announced its mempool; fetch what we do not know in the background
    pub fn on_mempool_announced(self: &Arc<Self>, txids: Vec<Hash>, peer: Arc<dyn Peer>) {
        for txid in txids {
            let node = Arc::clone(self);
            let peer = Arc::clone(&peer);
            tokio::spawn(async move {
                if let Err(e) = node.objects.retrieve(&txid, peer.as_ref()).await {
                    debug!("Mempool transaction {} not retrieved: {}", txid, e);
                }
            });
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("objects", &self.objects)
            .field("validations", &self.validations.len())
            .finish_non_exhaustive()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
