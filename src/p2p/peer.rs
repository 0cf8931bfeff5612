//! Peer sessions
//!
//! A `PeerSession` interprets the messages of one connection: it enforces the
//! handshake, answers queries from node state and hands objects to the node.
//! Outbound traffic goes through the `Peer` trait so sessions can run over
//! any transport.

use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{is_compatible_version, Message, ProtocolError};
use crate::constants::MAX_PEERS_PER_MESSAGE;
use crate::crypto::Hash;
use crate::node::Node;

/// Outbound side of a connection
pub trait Peer: Send + Sync {
    /// Remote address, for logs
    fn addr(&self) -> String;

    /// Queue a message. Called with store locks held: must neither block
    /// nor call back into the node.
    fn send(&self, message: Message);

    fn send_get_object(&self, id: Hash) {
        self.send(Message::GetObject { objectid: id });
    }
}

/// What this node tells peers about itself
#[derive(Debug, Clone, Default)]
pub struct PeerContext {
    /// Agent string sent in `hello`
    pub agent: String,
    /// Addresses shared in answer to `getpeers`
    pub known_peers: Vec<String>,
}

/// Message handling for one connection
pub struct PeerSession {
    node: Arc<Node>,
    peer: Arc<dyn Peer>,
    context: Arc<PeerContext>,
    handshake_completed: bool,
    tasks: JoinSet<()>,
}

impl PeerSession {
    pub fn new(node: Arc<Node>, peer: Arc<dyn Peer>, context: Arc<PeerContext>) -> Self {
        Self {
            node,
            peer,
            context,
            handshake_completed: false,
            tasks: JoinSet::new(),
        }
    }

    pub fn peer(&self) -> &Arc<dyn Peer> {
        &self.peer
    }

    pub fn handshake_completed(&self) -> bool {
        self.handshake_completed
    }

    /// Greet the remote party and ask for its state
    pub fn on_connect(&self) {
        self.peer.send(Message::hello(&self.context.agent));
        self.peer.send(Message::GetPeers);
        self.peer.send(Message::GetChainTip);
        self.peer.send(Message::GetMempool);
    }

    /// Handle one received line. An error is fatal: it has been reported to
    /// the peer and the connection must be closed.
    pub async fn on_line(&mut self, line: &str) -> Result<(), ProtocolError> {
        debug!(peer = %self.peer.addr(), "Message arrival: {}", line);
        let result = match Message::parse(line) {
            Ok(message) => self.on_message(message).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!(peer = %self.peer.addr(), "Peer error: {}", e);
            self.peer.send(Message::error(e));
        }
        result
    }

    pub async fn on_message(&mut self, message: Message) -> Result<(), ProtocolError> {
        if !self.handshake_completed {
            return match message {
                Message::Hello { version, agent } => self.on_hello(&version, &agent),
                other => Err(ProtocolError::HandshakeMissing(other.command())),
            };
        }

        match message {
            Message::Hello { .. } => return Err(ProtocolError::DuplicateHello),
            Message::GetPeers => {
                debug!(peer = %self.peer.addr(), "Remote party is requesting peers. Sharing.");
                self.peer.send(Message::Peers {
                    peers: self.context.known_peers.clone(),
                });
            }
            Message::Peers { peers } => self.on_peers(&peers),
            Message::IHaveObject { objectid } => self.on_ihaveobject(objectid),
            Message::GetObject { objectid } => self.on_getobject(objectid),
            Message::Object { object } => {
                let (node, peer) = (Arc::clone(&self.node), Arc::clone(&self.peer));
                // Validation may wait on this same connection for dependencies
                self.tasks.spawn(async move {
                    if let Err(e) = node.on_object(object, Arc::clone(&peer)).await {
                        warn!(peer = %peer.addr(), "Received invalid object: {}", e);
                        peer.send(Message::error(format!("Received invalid object: {e}")));
                    }
                });
            }
            Message::GetChainTip => {
                let (blockid, _) = self.node.chain_tip().await;
                self.peer.send(Message::ChainTip { blockid });
            }
            Message::ChainTip { blockid } => {
                if let Err(e) = self.node.on_chain_tip_announced(blockid, self.peer.as_ref()) {
                    warn!("Could not look up announced chain tip {}: {}", blockid, e);
                }
            }
            Message::GetMempool => {
                let txids = self.node.mempool_txids().await;
                self.peer.send(Message::Mempool { txids });
            }
            Message::Mempool { txids } => {
                self.node.on_mempool_announced(txids, Arc::clone(&self.peer));
            }
            Message::Error { error } => {
                warn!(peer = %self.peer.addr(), "Peer reported error: {}", error);
            }
        }
        Ok(())
    }

    fn on_hello(&mut self, version: &str, agent: &str) -> Result<(), ProtocolError> {
        if !is_compatible_version(version) {
            return Err(ProtocolError::IncompatibleVersion(version.to_string()));
        }
        info!(
            peer = %self.peer.addr(),
            "Handshake completed. Remote peer running {} at protocol version {}", agent, version
        );
        self.handshake_completed = true;
        Ok(())
    }

    fn on_peers(&self, peers: &[String]) {
        for peer in peers.iter().take(MAX_PEERS_PER_MESSAGE) {
            info!(peer = %self.peer.addr(), "Remote party reports knowledge of peer {}", peer);
        }
        if peers.len() > MAX_PEERS_PER_MESSAGE {
            info!(
                peer = %self.peer.addr(),
                "Remote party reported {} peers, but we processed only {} of them",
                peers.len(),
                MAX_PEERS_PER_MESSAGE
            );
        }
    }

    fn on_ihaveobject(&self, objectid: Hash) {
        match self.node.objects().exists(&objectid) {
            Ok(true) => {}
            Ok(false) => {
                debug!("Object {} discovered", objectid);
                self.peer.send_get_object(objectid);
            }
            Err(e) => warn!("Could not look up object {}: {}", objectid, e),
        }
    }

    fn on_getobject(&self, objectid: Hash) {
        match self.node.objects().get(&objectid) {
            Ok(Some(object)) => self.peer.send(Message::Object { object }),
            Ok(None) => {
                debug!(peer = %self.peer.addr(), "We don't have the requested object {}", objectid);
                self.peer
                    .send(Message::error(format!("Unknown object with id {objectid}")));
            }
            Err(e) => warn!("Could not load object {}: {}", objectid, e),
        }
    }

    /// Wait for one finished object task; `None` if there are none running
    pub async fn join_next(&mut self) -> Option<()> {
        self.tasks.join_next().await.map(|_| ())
    }

    pub fn has_tasks(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Wait until every object handed to the node has been processed
    pub async fn settle(&mut self) {
        while self.tasks.join_next().await.is_some() {}
    }

    /// Let running object tasks finish on their own after the session ends
    pub fn detach(mut self) {
        self.tasks.detach_all();
    }
}
