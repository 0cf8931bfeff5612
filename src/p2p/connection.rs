//! TCP transport
//!
//! Newline-delimited canonical JSON over TCP. Each connection gets a reader
//! loop driving a `PeerSession` and a writer task draining its outbound queue.

use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

use super::{Message, Peer, PeerContext, PeerSession, ProtocolError, MAX_MESSAGE_SIZE};
use crate::node::Node;

/// Peer handle backed by a connection's outbound queue
#[derive(Debug)]
pub struct ChannelPeer {
    addr: SocketAddr,
    outbound: mpsc::UnboundedSender<Message>,
}

impl ChannelPeer {
    pub fn new(addr: SocketAddr) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (outbound, receiver) = mpsc::unbounded_channel();
        (Self { addr, outbound }, receiver)
    }
}

impl Peer for ChannelPeer {
    fn addr(&self) -> String {
        self.addr.to_string()
    }

    fn send(&self, message: Message) {
        if self.outbound.send(message).is_err() {
            debug!(peer = %self.addr, "Dropping message for closed connection");
        }
    }
}

/// Accept inbound connections forever
pub async fn listen(node: Arc<Node>, addr: SocketAddr, context: Arc<PeerContext>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening for peers on {}", addr);

    loop {
        let (stream, remote) = listener.accept().await?;
        info!("New connection from {}", remote);
        let (node, context) = (Arc::clone(&node), Arc::clone(&context));
        tokio::spawn(async move {
            if let Err(e) = run_connection(node, stream, remote, context).await {
                warn!(peer = %remote, "Connection closed: {}", e);
            }
        });
    }
}

/// Dial a peer and serve the connection until it closes
pub async fn connect(node: Arc<Node>, addr: &str, context: Arc<PeerContext>) -> Result<(), ProtocolError> {
    let stream = TcpStream::connect(addr).await?;
    let remote = stream.peer_addr()?;
    info!("Connected to peer {}", remote);
    run_connection(node, stream, remote, context).await
}

/// Serve one established connection
pub async fn run_connection(
    node: Arc<Node>,
    stream: TcpStream,
    remote: SocketAddr,
    context: Arc<PeerContext>,
) -> Result<(), ProtocolError> {
    let (reader, writer) = stream.into_split();
    let (peer, outbound) = ChannelPeer::new(remote);
    let peer: Arc<dyn Peer> = Arc::new(peer);
    let (shutdown, shutdown_rx) = oneshot::channel();
    let writer_task = tokio::spawn(write_loop(writer, outbound, shutdown_rx, remote));

    let mut session = PeerSession::new(Arc::clone(&node), Arc::clone(&peer), context);
    let mut gossip = node.subscribe();
    // Buffering stops at the size limit, newline or not
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_MESSAGE_SIZE));
    session.on_connect();

    let result = loop {
        tokio::select! {
            line = lines.next() => match line {
                Some(Ok(line)) if line.trim().is_empty() => {}
                Some(Ok(line)) => {
                    if let Err(e) = session.on_line(&line).await {
                        break Err(e);
                    }
                }
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    let e = ProtocolError::MessageTooLarge;
                    warn!(peer = %remote, "Peer error: {}", e);
                    peer.send(Message::error(&e));
                    break Err(e);
                }
                Some(Err(LinesCodecError::Io(e))) => break Err(e.into()),
                None => break Ok(()),
            },
            message = gossip.recv() => match message {
                Ok(message) => peer.send(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(peer = %remote, "Gossip lagged; skipped {} messages", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break Ok(()),
            },
            Some(()) = session.join_next(), if session.has_tasks() => {}
        }
    };

    session.detach();
    // Flush what is queued (including a final error) before closing
    let _ = shutdown.send(());
    if let Err(e) = writer_task.await {
        warn!(peer = %remote, "Writer task failed: {}", e);
    }
    info!(peer = %remote, "Disconnected");
    result
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    mut shutdown: oneshot::Receiver<()>,
    remote: SocketAddr,
) {
    loop {
        let message = tokio::select! {
            message = outbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
            _ = &mut shutdown => {
                outbound.close();
                while let Ok(message) = outbound.try_recv() {
                    if write_message(&mut writer, &message).await.is_err() {
                        break;
                    }
                }
                break;
            }
        };
        if let Err(e) = write_message(&mut writer, &message).await {
            warn!(peer = %remote, "Failed to send {}: {}", message.command(), e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn write_message(writer: &mut OwnedWriteHalf, message: &Message) -> std::io::Result<()> {
    let mut line = message
        .to_line()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await
}
