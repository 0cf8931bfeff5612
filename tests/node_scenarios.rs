//! End-to-end node behaviour on the test network
//!
//! Blocks are built against the all-ones regtest target, so every nonce
//! satisfies proof of work.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use tidal_core::consensus::{get_forks, Block, ConsensusParams, Object, ValidBlock, ValidationError};
use tidal_core::constants::BLOCK_REWARD;
use tidal_core::crypto::{Hash, PrivateKey};
use tidal_core::node::Node;
use tidal_core::p2p::{Message, Peer};
use tidal_core::storage::{BlockInfo, MemoryStore, ObjectManager, SledStore, UTXOSet};
use tidal_core::validation::{Outpoint, Transaction, TransactionError, TxInput, TxOutput};

const GENESIS_CREATED: u64 = 1_624_219_079;

/// Records requests; objects it knows are delivered back asynchronously,
/// like a remote node answering `getobject`.
#[derive(Default)]
struct MockPeer {
    sent: Mutex<Vec<Message>>,
    known: Mutex<HashMap<Hash, Object>>,
    deliveries: Mutex<Option<mpsc::UnboundedSender<Object>>>,
}

impl MockPeer {
    fn get_object_requests(&self) -> Vec<Hash> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| match m {
                Message::GetObject { objectid } => Some(*objectid),
                _ => None,
            })
            .collect()
    }

    fn offer(&self, object: Object) {
        self.known.lock().unwrap().insert(object.id(), object);
    }
}

impl Peer for MockPeer {
    fn addr(&self) -> String {
        "192.0.2.1:18018".into()
    }

    fn send(&self, message: Message) {
        if let Message::GetObject { objectid } = &message {
            let object = self.known.lock().unwrap().get(objectid).cloned();
            if let (Some(object), Some(tx)) = (object, self.deliveries.lock().unwrap().as_ref()) {
                let _ = tx.send(object);
            }
        }
        self.sent.lock().unwrap().push(message);
    }
}

/// A peer whose known objects reach `node` the way a session would hand them over
fn serving_peer(node: &Arc<Node>) -> Arc<MockPeer> {
    let peer = Arc::new(MockPeer::default());
    let (tx, mut rx) = mpsc::unbounded_channel::<Object>();
    *peer.deliveries.lock().unwrap() = Some(tx);

    let (node, remote) = (Arc::clone(node), Arc::clone(&peer));
    tokio::spawn(async move {
        while let Some(object) = rx.recv().await {
            let (node, remote) = (Arc::clone(&node), Arc::clone(&remote));
            tokio::spawn(async move {
                let _ = node.on_object(object, remote).await;
            });
        }
    });
    peer
}

fn regtest_node() -> Arc<Node> {
    Node::open(ConsensusParams::regtest(), Arc::new(MemoryStore::new())).unwrap()
}

fn block(parent: &Block, created: u64, txs: &[&Transaction]) -> Block {
    Block {
        target: ConsensusParams::regtest().target,
        created,
        miner: Some("test".into()),
        nonce: format!("{created:x}"),
        note: None,
        previd: Some(parent.id()),
        txids: txs.iter().map(|tx| tx.txid()).collect(),
    }
}

fn store_txs(node: &Node, txs: &[&Transaction]) {
    for tx in txs {
        node.objects().put(&Object::Transaction((*tx).clone())).unwrap();
    }
}

/// Validate a block whose transactions are already stored
async fn accept(node: &Arc<Node>, block: Block, peer: &Arc<MockPeer>) -> Result<ValidBlock, ValidationError> {
    node.objects().put(&Object::Block(block.clone())).unwrap();
    node.validate_block(block, peer.clone()).await
}

fn spend(from: &Transaction, owner: &PrivateKey, value: u64) -> Transaction {
    let mut tx = Transaction::new(
        vec![TxInput::unsigned(Outpoint::new(from.txid(), 0))],
        vec![TxOutput {
            pubkey: owner.public_key(),
            value,
        }],
    );
    tx.sign(&[owner]);
    tx
}

#[tokio::test]
async fn genesis_is_valid_at_height_zero() {
    let node = regtest_node();
    let peer = Arc::new(MockPeer::default());
    let genesis = node.params().genesis.clone();

    let valid = node.validate_block(genesis.clone(), peer.clone()).await.unwrap();
    assert_eq!(valid.height, 0);
    assert!(valid.state_after.is_empty());
    assert_eq!(node.chain_tip().await, (genesis.id(), 0));

    let mut impostor = genesis;
    impostor.note = Some("Another beginning".into());
    let result = node.validate_block(impostor, peer).await;
    assert!(matches!(result, Err(ValidationError::InvalidGenesis(_))));
}

#[tokio::test]
async fn spending_coinbase_of_same_block_is_rejected() {
    let node = regtest_node();
    let peer = Arc::new(MockPeer::default());
    let miner = PrivateKey::generate();
    let genesis = node.params().genesis.clone();

    let coinbase = Transaction::coinbase(1, BLOCK_REWARD, miner.public_key());
    let immature = spend(&coinbase, &miner, 10);
    store_txs(&node, &[&coinbase, &immature]);

    let result = accept(&node, block(&genesis, GENESIS_CREATED + 1, &[&coinbase, &immature]), &peer).await;
    assert!(matches!(
        result,
        Err(ValidationError::Transaction(TransactionError::ImmatureCoinbaseSpend { .. }))
    ));
    assert_eq!(node.chain_tip().await.1, 0);
}

#[tokio::test]
async fn forks_split_at_common_ancestor() {
    let node = regtest_node();
    let peer = Arc::new(MockPeer::default());

    let mut tip = node.params().genesis.clone();
    for height in 1..=3 {
        tip = block(&tip, GENESIS_CREATED + height, &[]);
        accept(&node, tip.clone(), &peer).await.unwrap();
    }
    let ancestor = tip.clone();

    let mut b1 = ancestor.clone();
    for step in 1..=2 {
        b1 = block(&b1, GENESIS_CREATED + 100 + step, &[]);
        accept(&node, b1.clone(), &peer).await.unwrap();
    }
    let mut b2 = ancestor.clone();
    for step in 1..=3 {
        b2 = block(&b2, GENESIS_CREATED + 200 + step, &[]);
        accept(&node, b2.clone(), &peer).await.unwrap();
    }

    let v1 = node.validate_block(b1.clone(), peer.clone()).await.unwrap();
    let v2 = node.validate_block(b2.clone(), peer.clone()).await.unwrap();
    assert_eq!((v1.height, v2.height), (5, 6));

    let forks = get_forks(node.objects(), &v1, &v2).unwrap();
    assert_eq!(forks.lca.id, ancestor.id());
    assert_eq!(forks.short.len(), 2);
    assert_eq!(forks.long.len(), 3);
    assert_eq!(forks.short.last().unwrap().id, b1.id());
    assert_eq!(forks.long.last().unwrap().id, b2.id());
    assert_eq!(forks.long[0].height, 4);

    assert_eq!(node.chain_tip().await, (b2.id(), 6));
}

/// Chain genesis - B1 (coinbase to `owner`) - B2, with `x` pooled
async fn pooled_spend_setup(
    node: &Arc<Node>,
    peer: &Arc<MockPeer>,
    owner: &PrivateKey,
) -> (Block, Transaction, Transaction) {
    let genesis = node.params().genesis.clone();
    let coinbase = Transaction::coinbase(1, BLOCK_REWARD, owner.public_key());
    store_txs(node, &[&coinbase]);
    let b1 = block(&genesis, GENESIS_CREATED + 1, &[&coinbase]);
    accept(node, b1.clone(), peer).await.unwrap();

    let x = spend(&coinbase, owner, BLOCK_REWARD - 1);
    node.validate_transaction(x.clone()).await.unwrap();
    assert_eq!(node.mempool_txids().await, vec![x.txid()]);

    let t1 = block(&b1, GENESIS_CREATED + 2, &[]);
    accept(node, t1.clone(), peer).await.unwrap();
    assert_eq!(node.mempool_txids().await, vec![x.txid()]);
    (b1, coinbase, x)
}

#[tokio::test]
async fn reorg_keeps_transactions_still_spendable() {
    let node = regtest_node();
    let peer = Arc::new(MockPeer::default());
    let owner = PrivateKey::generate();
    let (b1, _, x) = pooled_spend_setup(&node, &peer, &owner).await;

    let s2 = block(&b1, GENESIS_CREATED + 10, &[]);
    accept(&node, s2.clone(), &peer).await.unwrap();
    let t2 = block(&s2, GENESIS_CREATED + 11, &[]);
    accept(&node, t2.clone(), &peer).await.unwrap();

    assert_eq!(node.chain_tip().await, (t2.id(), 3));
    assert_eq!(node.mempool_txids().await, vec![x.txid()]);
}

#[tokio::test]
async fn reorg_drops_transactions_spent_on_new_chain() {
    let node = regtest_node();
    let peer = Arc::new(MockPeer::default());
    let owner = PrivateKey::generate();
    let (b1, coinbase, x) = pooled_spend_setup(&node, &peer, &owner).await;

    let rival = spend(&coinbase, &owner, BLOCK_REWARD - 2);
    store_txs(&node, &[&rival]);
    let s2 = block(&b1, GENESIS_CREATED + 10, &[&rival]);
    accept(&node, s2.clone(), &peer).await.unwrap();
    let t2 = block(&s2, GENESIS_CREATED + 11, &[]);
    accept(&node, t2.clone(), &peer).await.unwrap();

    assert_eq!(node.chain_tip().await, (t2.id(), 3));
    let state = node.state().await;
    assert!(!state.mempool.contains(&x.txid()));
    assert!(state.mempool.state().contains(&Outpoint::new(rival.txid(), 0)));
}

#[tokio::test]
async fn overspending_transaction_never_reaches_mempool() {
    let node = regtest_node();
    let peer = Arc::new(MockPeer::default());
    let owner = PrivateKey::generate();
    let genesis = node.params().genesis.clone();

    let coinbase = Transaction::coinbase(1, 100, owner.public_key());
    store_txs(&node, &[&coinbase]);
    accept(&node, block(&genesis, GENESIS_CREATED + 1, &[&coinbase]), &peer)
        .await
        .unwrap();

    let overspend = spend(&coinbase, &owner, 101);
    let result = node.on_object(Object::Transaction(overspend), peer.clone()).await;
    assert!(matches!(
        result,
        Err(ValidationError::Transaction(TransactionError::ConservationViolation {
            inputs: 100,
            outputs: 101,
            ..
        }))
    ));
    assert!(node.mempool_txids().await.is_empty());
}

#[tokio::test]
async fn concurrent_retrievals_share_one_request() {
    let objects = Arc::new(ObjectManager::new(Arc::new(MemoryStore::new())));
    let peer = Arc::new(MockPeer::default());
    let tx = Transaction::coinbase(7, 5, PrivateKey::generate().public_key());
    let id = tx.txid();

    let first = {
        let (objects, peer) = (objects.clone(), peer.clone());
        tokio::spawn(async move { objects.retrieve(&id, peer.as_ref()).await })
    };
    let second = {
        let (objects, peer) = (objects.clone(), peer.clone());
        tokio::spawn(async move { objects.retrieve(&id, peer.as_ref()).await })
    };
    while objects.pending_retrievals() == 0 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(peer.get_object_requests(), vec![id]);
    objects.put(&Object::Transaction(tx.clone())).unwrap();

    assert_eq!(first.await.unwrap().unwrap().id(), id);
    assert_eq!(second.await.unwrap().unwrap().id(), id);
    assert_eq!(peer.get_object_requests().len(), 1);
    assert_eq!(objects.pending_retrievals(), 0);
}

#[tokio::test]
async fn timestamps_must_strictly_increase() {
    let node = regtest_node();
    let peer = Arc::new(MockPeer::default());
    let genesis = node.params().genesis.clone();

    let same_second = block(&genesis, GENESIS_CREATED, &[]);
    assert!(matches!(
        accept(&node, same_second, &peer).await,
        Err(ValidationError::TimestampNotIncreasing { .. })
    ));

    let next_second = block(&genesis, GENESIS_CREATED + 1, &[]);
    assert_eq!(accept(&node, next_second, &peer).await.unwrap().height, 1);
}

#[tokio::test]
async fn future_timestamp_is_rejected() {
    let node = regtest_node();
    let peer = Arc::new(MockPeer::default());
    let genesis = node.params().genesis.clone();
    let far_future = 4_000_000_000;

    assert!(matches!(
        accept(&node, block(&genesis, far_future, &[]), &peer).await,
        Err(ValidationError::TimestampInFuture { .. })
    ));
}

#[tokio::test]
async fn concurrent_validation_is_idempotent() {
    let node = regtest_node();
    let peer = Arc::new(MockPeer::default());
    let miner = PrivateKey::generate();
    let genesis = node.params().genesis.clone();

    let coinbase = Transaction::coinbase(1, BLOCK_REWARD, miner.public_key());
    store_txs(&node, &[&coinbase]);
    let b1 = block(&genesis, GENESIS_CREATED + 1, &[&coinbase]);
    node.objects().put(&Object::Block(b1.clone())).unwrap();

    let (a, b) = tokio::join!(
        node.validate_block(b1.clone(), peer.clone()),
        node.validate_block(b1.clone(), peer.clone())
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.state_after, b.state_after);
    assert_eq!(a.state_after.len(), 1);

    let again = node.validate_block(b1.clone(), peer).await.unwrap();
    assert_eq!(again.state_after, a.state_after);
    assert_eq!(node.chain_tip().await, (b1.id(), 1));
    assert!(!node.is_validating(&b1.id()));
}

#[tokio::test]
async fn unknown_ancestors_are_fetched_from_peer() {
    let node = regtest_node();
    let peer = serving_peer(&node);
    let miner = PrivateKey::generate();
    let genesis = node.params().genesis.clone();

    let coinbase = Transaction::coinbase(1, BLOCK_REWARD, miner.public_key());
    let b1 = block(&genesis, GENESIS_CREATED + 1, &[&coinbase]);
    let payment = spend(&coinbase, &miner, BLOCK_REWARD);
    let b2 = block(&b1, GENESIS_CREATED + 2, &[&payment]);
    for object in [
        Object::Transaction(coinbase.clone()),
        Object::Transaction(payment.clone()),
        Object::Block(b1.clone()),
    ] {
        peer.offer(object);
    }

    let new = node.on_object(Object::Block(b2.clone()), peer.clone()).await.unwrap();
    assert!(new);
    assert_eq!(node.chain_tip().await, (b2.id(), 2));

    let requests = peer.get_object_requests();
    assert!(requests.contains(&b1.id()));
    assert!(requests.contains(&payment.txid()));
    let state = node.state().await;
    assert!(state.chain.tip().state_after.contains(&Outpoint::new(payment.txid(), 0)));
}

#[tokio::test]
async fn missing_parent_fails_after_timeout() {
    let objects = ObjectManager::with_timeout(Arc::new(MemoryStore::new()), Duration::from_millis(50));
    let node = Node::with_objects(ConsensusParams::regtest(), objects).unwrap();
    let peer = Arc::new(MockPeer::default());

    let orphan = Block {
        previd: Some(tidal_core::crypto::hash_bytes(b"nowhere")),
        ..block(&node.params().genesis, GENESIS_CREATED + 1, &[])
    };
    let result = node.on_object(Object::Block(orphan.clone()), peer.clone()).await;

    assert!(matches!(result, Err(ValidationError::ParentRejected { .. })));
    assert_eq!(node.chain_tip().await.1, 0);
    assert_eq!(node.objects().pending_retrievals(), 0);
    // Stored for inspection but never cached as valid
    assert!(node.objects().exists(&orphan.id()).unwrap());
    assert!(node.objects().db().get_block_info(&orphan.id()).unwrap().is_none());
}

#[tokio::test]
async fn new_valid_objects_are_gossiped() {
    let node = regtest_node();
    let peer = Arc::new(MockPeer::default());
    let mut gossip = node.subscribe();
    let genesis = node.params().genesis.clone();

    let b1 = block(&genesis, GENESIS_CREATED + 1, &[]);
    assert!(node.on_object(Object::Block(b1.clone()), peer.clone()).await.unwrap());
    assert!(!node.on_object(Object::Block(b1.clone()), peer).await.unwrap());

    assert_eq!(gossip.recv().await.unwrap(), Message::IHaveObject { objectid: b1.id() });
    assert!(gossip.try_recv().is_err());
}

#[tokio::test]
async fn reorg_state_matches_direct_replay() {
    let miner = PrivateKey::generate();
    let genesis = ConsensusParams::regtest().genesis;

    // Build the winning chain: three blocks, each paying the miner
    let mut chain = Vec::new();
    let mut txs = Vec::new();
    let mut parent = genesis.clone();
    for height in 1..=3u64 {
        let coinbase = Transaction::coinbase(height, BLOCK_REWARD, miner.public_key());
        let next = block(&parent, GENESIS_CREATED + 500 + height, &[&coinbase]);
        txs.push(coinbase);
        chain.push(next.clone());
        parent = next;
    }

    // Node one sees a shorter rival first, then reorgs
    let reorged = regtest_node();
    let peer = Arc::new(MockPeer::default());
    let rival_cb = Transaction::coinbase(1, BLOCK_REWARD, PrivateKey::generate().public_key());
    store_txs(&reorged, &[&rival_cb]);
    let rival = block(&genesis, GENESIS_CREATED + 1, &[&rival_cb]);
    accept(&reorged, rival.clone(), &peer).await.unwrap();
    assert_eq!(reorged.chain_tip().await.0, rival.id());

    let direct = regtest_node();
    for node in [&reorged, &direct] {
        store_txs(node, &txs.iter().collect::<Vec<_>>());
        for b in &chain {
            accept(node, b.clone(), &peer).await.unwrap();
        }
    }

    let tip = chain.last().unwrap().id();
    assert_eq!(reorged.chain_tip().await, (tip, 3));
    assert_eq!(direct.chain_tip().await, (tip, 3));
    let reorged_state = reorged.state().await;
    let direct_state = direct.state().await;
    assert_eq!(reorged_state.chain.tip().state_after, direct_state.chain.tip().state_after);
    assert_eq!(reorged_state.mempool.state(), direct_state.mempool.state());
}

#[tokio::test]
async fn chain_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let miner = PrivateKey::generate();
    let coinbase = Transaction::coinbase(1, BLOCK_REWARD, miner.public_key());
    let b1;
    {
        let node = Node::open(ConsensusParams::regtest(), Arc::new(SledStore::open(dir.path()).unwrap())).unwrap();
        let peer = Arc::new(MockPeer::default());
        store_txs(&node, &[&coinbase]);
        b1 = block(&node.params().genesis, GENESIS_CREATED + 1, &[&coinbase]);
        accept(&node, b1.clone(), &peer).await.unwrap();
    }

    let node = Node::open(ConsensusParams::regtest(), Arc::new(SledStore::open(dir.path()).unwrap())).unwrap();
    assert_eq!(node.chain_tip().await, (b1.id(), 1));
    let state = node.state().await;
    assert!(state.mempool.state().contains(&Outpoint::new(coinbase.txid(), 0)));
}

#[tokio::test]
async fn cached_block_above_tip_becomes_tip() {
    let node = regtest_node();
    let peer = Arc::new(MockPeer::default());
    let genesis = node.params().genesis.clone();

    // Validation results saved, but the tip update never happened
    let b1 = block(&genesis, GENESIS_CREATED + 1, &[]);
    node.objects().put(&Object::Block(b1.clone())).unwrap();
    node.objects()
        .db()
        .put_block_info(
            &b1.id(),
            &BlockInfo {
                height: 1,
                state_after: UTXOSet::new(),
            },
        )
        .unwrap();
    assert_eq!(node.chain_tip().await, (genesis.id(), 0));

    node.on_object(Object::Block(b1.clone()), peer.clone()).await.unwrap();
    assert_eq!(node.chain_tip().await, (b1.id(), 1));
    assert!(peer.get_object_requests().is_empty());

    // Seen again below the tip: nothing changes
    let b2 = block(&b1, GENESIS_CREATED + 2, &[]);
    accept(&node, b2.clone(), &peer).await.unwrap();
    node.validate_block(b1, peer.clone()).await.unwrap();
    assert_eq!(node.chain_tip().await, (b2.id(), 2));
}

#[tokio::test]
async fn block_with_foreign_target_is_rejected() {
    let node = regtest_node();
    let peer = Arc::new(MockPeer::default());
    let genesis = node.params().genesis.clone();

    let mut b1 = block(&genesis, GENESIS_CREATED + 1, &[]);
    b1.target = ConsensusParams::mainnet().target;
    let result = accept(&node, b1.clone(), &peer).await;

    assert!(matches!(result, Err(ValidationError::BadTarget { id, .. }) if id == b1.id()));
    assert!(node.objects().db().get_block_info(&b1.id()).unwrap().is_none());
}

#[tokio::test]
async fn mainnet_block_without_work_is_rejected() {
    let params = ConsensusParams::mainnet();
    let node = Node::open(params.clone(), Arc::new(MemoryStore::new())).unwrap();
    let peer = Arc::new(MockPeer::default());

    let b1 = Block {
        target: params.target,
        created: GENESIS_CREATED + 1,
        miner: None,
        nonce: "00".into(),
        note: None,
        previd: Some(params.genesis.id()),
        txids: vec![],
    };
    let result = accept(&node, b1.clone(), &peer).await;

    assert!(matches!(result, Err(ValidationError::InsufficientWork(id)) if id == b1.id()));
    assert_eq!(node.chain_tip().await, (params.genesis.id(), 0));
}

#[tokio::test]
async fn coinbase_claiming_too_much_is_rejected() {
    let node = regtest_node();
    let peer = Arc::new(MockPeer::default());
    let miner = PrivateKey::generate();
    let genesis = node.params().genesis.clone();

    let greedy = Transaction::coinbase(1, BLOCK_REWARD + 1, miner.public_key());
    store_txs(&node, &[&greedy]);
    let result = accept(&node, block(&genesis, GENESIS_CREATED + 1, &[&greedy]), &peer).await;

    assert!(matches!(
        result,
        Err(ValidationError::CoinbaseViolatesPolicy { claimed, fees: 0, .. }) if claimed == BLOCK_REWARD + 1
    ));
    assert_eq!(node.chain_tip().await.1, 0);
}

#[tokio::test]
async fn coinbase_with_wrong_height_is_rejected() {
    let node = regtest_node();
    let peer = Arc::new(MockPeer::default());
    let miner = PrivateKey::generate();
    let genesis = node.params().genesis.clone();

    let coinbase = Transaction::coinbase(2, BLOCK_REWARD, miner.public_key());
    store_txs(&node, &[&coinbase]);
    let result = accept(&node, block(&genesis, GENESIS_CREATED + 1, &[&coinbase]), &peer).await;

    assert!(matches!(
        result,
        Err(ValidationError::CoinbaseHeightMismatch { claimed: 2, height: 1, .. })
    ));
}

#[tokio::test]
async fn block_spending_one_output_twice_is_rejected() {
    let node = regtest_node();
    let peer = Arc::new(MockPeer::default());
    let owner = PrivateKey::generate();
    let genesis = node.params().genesis.clone();

    let coinbase = Transaction::coinbase(1, BLOCK_REWARD, owner.public_key());
    store_txs(&node, &[&coinbase]);
    let b1 = block(&genesis, GENESIS_CREATED + 1, &[&coinbase]);
    accept(&node, b1.clone(), &peer).await.unwrap();

    let first = spend(&coinbase, &owner, 10);
    let second = spend(&coinbase, &owner, 20);
    store_txs(&node, &[&first, &second]);
    let b2 = block(&b1, GENESIS_CREATED + 2, &[&first, &second]);
    let result = accept(&node, b2.clone(), &peer).await;

    assert!(matches!(result, Err(ValidationError::Utxo(_))));
    assert_eq!(node.chain_tip().await, (b1.id(), 1));
    assert!(node.objects().db().get_block_info(&b2.id()).unwrap().is_none());
}

#[tokio::test]
async fn undelivered_transaction_fails_block() {
    let node = Node::with_objects(
        ConsensusParams::regtest(),
        ObjectManager::with_timeout(Arc::new(MemoryStore::new()), Duration::from_millis(50)),
    )
    .unwrap();
    let peer = Arc::new(MockPeer::default());
    let genesis = node.params().genesis.clone();

    let missing = Transaction::coinbase(1, BLOCK_REWARD, PrivateKey::generate().public_key());
    let b1 = block(&genesis, GENESIS_CREATED + 1, &[&missing]);
    let result = accept(&node, b1.clone(), &peer).await;

    assert!(matches!(
        result,
        Err(ValidationError::MissingTransactionDependency { id, .. }) if id == b1.id()
    ));
    assert_eq!(peer.get_object_requests(), vec![missing.txid()]);
    assert_eq!(node.chain_tip().await.1, 0);
}

#[tokio::test]
async fn parent_that_is_a_transaction_is_rejected() {
    let node = regtest_node();
    let peer = Arc::new(MockPeer::default());
    let genesis = node.params().genesis.clone();

    let tx = Transaction::coinbase(1, BLOCK_REWARD, PrivateKey::generate().public_key());
    store_txs(&node, &[&tx]);
    let mut orphan = block(&genesis, GENESIS_CREATED + 1, &[]);
    orphan.previd = Some(tx.txid());
    let result = accept(&node, orphan.clone(), &peer).await;

    assert!(matches!(
        result,
        Err(ValidationError::InvalidParentType { id, parent }) if id == orphan.id() && parent == tx.txid()
    ));
}
