//! A single remote peer: connection state machine plus the socket tasks
//! feeding the node's event loop.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use vireo_primitives::Network;

use crate::message::{self, Message, VersionMessage};
use crate::Error;

pub type PeerId = u64;

/// Connection lifecycle. Only `Connected` peers take part in inventory
/// and block requests; `Closing` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    Handshaking,
    Connected,
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// What the per-peer socket tasks report back to the node.
#[derive(Debug)]
pub enum PeerInput {
    Message { peer: PeerId, message: Message },
    Failed { peer: PeerId, error: Error },
    Disconnected { peer: PeerId },
}

const OUTBOUND_BUFFER: usize = 64;
const READ_CHUNK: usize = 64 * 1024;

/// Node-side handle to one peer.
///
/// The socket is owned by two background tasks; the handle carries the
/// state machine and the outbound queue.
pub struct Peer {
    pub id: PeerId,
    pub addr: SocketAddr,
    pub direction: Direction,
    pub state: PeerState,
    pub version: Option<VersionMessage>,
    pub verack: bool,
    pub last_seen: Instant,
    outbound: mpsc::Sender<Message>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Peer {
    /// Take ownership of an established socket and start its reader and
    /// writer tasks. Inputs flow into `inbox` until the peer dies.
    pub fn spawn(
        id: PeerId,
        stream: TcpStream,
        addr: SocketAddr,
        direction: Direction,
        network: Network,
        inbox: mpsc::Sender<PeerInput>,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);

        let reader = tokio::spawn(read_loop(id, read_half, network, inbox.clone()));
        let writer = tokio::spawn(write_loop(id, write_half, network, outbound_rx, inbox));

        Self {
            id,
            addr,
            direction,
            state: PeerState::Handshaking,
            version: None,
            verack: false,
            last_seen: Instant::now(),
            outbound: outbound_tx,
            reader,
            writer,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == PeerState::Connected
    }

    /// Queue a message for the writer task. A slow peer whose buffer is
    /// full loses the message rather than stalling the event loop.
    pub fn send(&self, message: Message) {
        trace!(peer = self.id, command = message.command(), "queueing");

        if let Err(err) = self.outbound.try_send(message) {
            warn!(peer = self.id, %err, "dropping outbound message");
        }
    }

    /// Tear the connection down; the handle must be discarded after.
    pub fn close(&mut self) {
        self.state = PeerState::Closing;
        self.reader.abort();
        self.writer.abort();
    }
}

async fn read_loop(
    id: PeerId,
    mut socket: tokio::net::tcp::OwnedReadHalf,
    network: Network,
    inbox: mpsc::Sender<PeerInput>,
) {
    let mut buffer: Vec<u8> = Vec::with_capacity(READ_CHUNK);
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        match socket.read(&mut chunk).await {
            Ok(0) => {
                debug!(peer = id, "socket closed by remote");
                let _ = inbox.send(PeerInput::Disconnected { peer: id }).await;
                return;
            }
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);

                loop {
                    match message::try_frame(&mut buffer, network) {
                        Ok(Some(frame)) => {
                            match Message::decode(&frame.command, &frame.payload) {
                                Ok(Some(message)) => {
                                    if inbox
                                        .send(PeerInput::Message { peer: id, message })
                                        .await
                                        .is_err()
                                    {
                                        return;
                                    }
                                }
                                Ok(None) => {
                                    debug!(peer = id, command = %frame.command, "skipping unknown command");
                                }
                                Err(err) => {
                                    let _ = inbox
                                        .send(PeerInput::Failed {
                                            peer: id,
                                            error: err.into(),
                                        })
                                        .await;
                                    return;
                                }
                            }
                        }
                        Ok(None) => break,
                        Err(err) => {
                            let _ = inbox.send(PeerInput::Failed { peer: id, error: err }).await;
                            return;
                        }
                    }
                }
            }
            Err(err) => {
                debug!(peer = id, %err, "socket read failed");
                let _ = inbox
                    .send(PeerInput::Failed {
                        peer: id,
                        error: err.into(),
                    })
                    .await;
                return;
            }
        }
    }
}

async fn write_loop(
    id: PeerId,
    mut socket: tokio::net::tcp::OwnedWriteHalf,
    network: Network,
    mut outbound: mpsc::Receiver<Message>,
    inbox: mpsc::Sender<PeerInput>,
) {
    while let Some(message) = outbound.recv().await {
        trace!(peer = id, command = message.command(), "writing");

        if let Err(err) = socket.write_all(&message.to_wire(network)).await {
            debug!(peer = id, %err, "socket write failed");
            let _ = inbox
                .send(PeerInput::Failed {
                    peer: id,
                    error: err.into(),
                })
                .await;
            return;
        }
    }
}
