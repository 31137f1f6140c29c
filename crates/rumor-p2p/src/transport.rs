//! TCP transport between peers.
//!
//! Each link carries `u32` length-prefixed JSON [`PeerMessage`] frames. One
//! task per link multiplexes outbound sends, inbound frames and the link's
//! cancellation, and reports what happens as [`TransportEvent`]s on a single
//! channel. A link's `Connected` event always precedes its messages.

use crate::config::StrategyConfig;
use crate::connection::{Direction, PeerSender};
use crate::error::{P2pError, P2pResult};
use crate::message::PeerMessage;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use rumor_admission::ConnectionId;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Largest accepted frame.
pub const MAX_FRAME_LENGTH: usize = 1024 * 1024;

/// A boxed future that is Send.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Something that happened on a peer link.
#[derive(Debug)]
pub enum TransportEvent {
    /// A link was opened.
    Connected {
        /// Link identity.
        id: ConnectionId,
        /// Which side dialed.
        direction: Direction,
        /// Handle for sending on the link.
        sender: PeerSender,
    },
    /// A message arrived.
    Message {
        /// Link the message arrived on.
        from: ConnectionId,
        /// The decoded message.
        message: PeerMessage,
    },
    /// A link was closed.
    Disconnected {
        /// Link identity.
        id: ConnectionId,
    },
}

/// Peer transport as seen by the gossip strategy.
pub trait Transport: Send + Sync {
    /// Returns the listening address.
    fn local_addr(&self) -> SocketAddr;

    /// Opens a link to `addr`.
    fn dial<'a>(&'a self, addr: SocketAddr) -> BoxFuture<'a, P2pResult<ConnectionId>>;

    /// Stops accepting, closes every link and waits for their tasks.
    fn close<'a>(&'a self) -> BoxFuture<'a, ()>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn local_addr(&self) -> SocketAddr {
        (**self).local_addr()
    }

    fn dial<'a>(&'a self, addr: SocketAddr) -> BoxFuture<'a, P2pResult<ConnectionId>> {
        (**self).dial(addr)
    }

    fn close<'a>(&'a self) -> BoxFuture<'a, ()> {
        (**self).close()
    }
}

/// Builds the frame codec used on peer links.
#[must_use]
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_type::<u32>()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

#[derive(Clone)]
struct Links {
    events: mpsc::Sender<TransportEvent>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    channel_buffer: usize,
}

impl Links {
    async fn emit(&self, event: TransportEvent) -> bool {
        tokio::select! {
            sent = self.events.send(event) => sent.is_ok(),
            () = self.shutdown.cancelled() => false,
        }
    }

    async fn open(&self, stream: TcpStream, id: ConnectionId, direction: Direction) {
        let (tx, rx) = mpsc::channel(self.channel_buffer.max(1));
        let closer = self.shutdown.child_token();
        let sender = PeerSender::new(id.clone(), tx, closer.clone());

        let connected = TransportEvent::Connected {
            id: id.clone(),
            direction,
            sender,
        };
        if !self.emit(connected).await {
            return;
        }

        let links = self.clone();
        self.tracker
            .spawn(async move { links.run(stream, id, rx, closer).await });
    }

    async fn run(
        self,
        stream: TcpStream,
        id: ConnectionId,
        mut outbound: mpsc::Receiver<PeerMessage>,
        closer: CancellationToken,
    ) {
        let mut framed = Framed::new(stream, frame_codec());

        loop {
            tokio::select! {
                () = closer.cancelled() => break,
                message = outbound.recv() => {
                    let Some(message) = message else { break };
                    let bytes = match message.to_bytes() {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            warn!(peer = %id, error = %e, "Failed to encode message");
                            continue;
                        }
                    };
                    if let Err(e) = framed.send(Bytes::from(bytes)).await {
                        debug!(peer = %id, error = %e, "Write failed");
                        break;
                    }
                }
                frame = framed.next() => match frame {
                    Some(Ok(frame)) => match PeerMessage::from_bytes(&frame) {
                        Ok(message) => {
                            let event = TransportEvent::Message { from: id.clone(), message };
                            if !self.emit(event).await {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(peer = %id, error = %e, "Skipping malformed frame");
                        }
                    },
                    Some(Err(e)) => {
                        debug!(peer = %id, error = %e, "Framing error");
                        break;
                    }
                    None => break,
                },
            }
        }

        closer.cancel();
        debug!(peer = %id, "Link closed");
        self.emit(TransportEvent::Disconnected { id }).await;
    }
}

/// TCP implementation of [`Transport`].
pub struct PeerTransport {
    local_addr: SocketAddr,
    links: Links,
    connect_timeout: Duration,
}

impl PeerTransport {
    /// Binds a listener and starts accepting links.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(
        addr: SocketAddr,
        config: &StrategyConfig,
    ) -> P2pResult<(Self, mpsc::Receiver<TransportEvent>)> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (events, events_rx) = mpsc::channel(config.channel_buffer.max(1));

        let links = Links {
            events,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            channel_buffer: config.channel_buffer,
        };

        info!(addr = %local_addr, "Peer transport listening");

        let acceptor = links.clone();
        links.tracker.spawn(async move {
            loop {
                tokio::select! {
                    () = acceptor.shutdown.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer_addr)) => {
                            debug!(peer = %peer_addr, "Accepted peer link");
                            acceptor
                                .open(stream, ConnectionId::from(peer_addr), Direction::Inbound)
                                .await;
                        }
                        Err(e) => warn!(error = %e, "Failed to accept peer link"),
                    },
                }
            }
        });

        Ok((
            Self {
                local_addr,
                links,
                connect_timeout: config.connect_timeout,
            },
            events_rx,
        ))
    }

    /// Returns the listening address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Dials a peer. The link identity is the dialed address.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails or times out.
    pub async fn dial(&self, addr: SocketAddr) -> P2pResult<ConnectionId> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| P2pError::Connection(format!("timed out dialing {addr}")))??;
        let id = ConnectionId::from(addr);
        info!(peer = %id, "Dialed peer");
        self.links.open(stream, id.clone(), Direction::Outbound).await;
        Ok(id)
    }

    /// Stops accepting, closes every link and waits for their tasks.
    pub async fn close(&self) {
        self.links.shutdown.cancel();
        self.links.tracker.close();
        self.links.tracker.wait().await;
        info!(addr = %self.local_addr, "Peer transport closed");
    }
}

impl Transport for PeerTransport {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn dial<'a>(&'a self, addr: SocketAddr) -> BoxFuture<'a, P2pResult<ConnectionId>> {
        Box::pin(Self::dial(self, addr))
    }

    fn close<'a>(&'a self) -> BoxFuture<'a, ()> {
        Box::pin(Self::close(self))
    }
}
