//! TCP server for local modules.
//!
//! One task per module connection decodes frames into [`FromModule`]
//! messages and writes queued [`ToModule`] messages back. A frame whose body
//! does not parse is logged and skipped; a framing error ends the connection.

use crate::api::codec::ApiCodec;
use crate::api::message::{ApiMessage, FromModule, ToModule};
use crate::error::{NodeError, NodeResult, WireError};
use futures::{SinkExt, StreamExt};
use rumor_admission::ConnectionId;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Handle for queueing messages to one module.
#[derive(Debug, Clone)]
pub struct ModuleSender {
    id: ConnectionId,
    tx: mpsc::Sender<ToModule>,
}

impl ModuleSender {
    /// Creates a sender together with the receiving end of its queue.
    #[must_use]
    pub fn channel(
        id: impl Into<ConnectionId>,
        buffer: usize,
    ) -> (Self, mpsc::Receiver<ToModule>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { id: id.into(), tx }, rx)
    }

    /// Returns the module identity.
    #[must_use]
    pub const fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Queues a message without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Wire`] if the message cannot be framed,
    /// [`NodeError::ChannelFull`] if the queue is full and
    /// [`NodeError::ChannelClosed`] if the module is gone.
    pub fn try_send(&self, message: ToModule) -> NodeResult<()> {
        message.frame_size()?;
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => NodeError::ChannelFull(self.id.clone()),
            TrySendError::Closed(_) => NodeError::ChannelClosed("module connection"),
        })
    }
}

/// Something that happened on a module connection.
#[derive(Debug)]
pub enum ModuleEvent {
    /// A module connected.
    Connected {
        /// Module identity.
        id: ConnectionId,
        /// Handle for sending to the module.
        sender: ModuleSender,
    },
    /// A module sent a message.
    Message {
        /// Module identity.
        id: ConnectionId,
        /// The message.
        message: FromModule,
    },
    /// A module went away.
    Disconnected {
        /// Module identity.
        id: ConnectionId,
    },
}

#[derive(Clone)]
struct Sessions {
    events: mpsc::Sender<ModuleEvent>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    buffer: usize,
}

impl Sessions {
    async fn emit(&self, event: ModuleEvent) -> bool {
        tokio::select! {
            sent = self.events.send(event) => sent.is_ok(),
            () = self.shutdown.cancelled() => false,
        }
    }

    async fn run(self, stream: TcpStream, id: ConnectionId) {
        let (sender, mut outbound) = ModuleSender::channel(id.clone(), self.buffer);
        if !self
            .emit(ModuleEvent::Connected {
                id: id.clone(),
                sender,
            })
            .await
        {
            return;
        }

        let mut framed = Framed::new(stream, ApiCodec);
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                message = outbound.recv() => {
                    let Some(message) = message else { break };
                    match framed.send(ApiMessage::from(message)).await {
                        Ok(()) => {}
                        Err(e @ WireError::MessageTooLarge(_)) => {
                            warn!(module = %id, error = %e, "Skipping unencodable message");
                        }
                        Err(e) => {
                            debug!(module = %id, error = %e, "Write failed");
                            break;
                        }
                    }
                }
                frame = framed.next() => match frame {
                    Some(Ok(frame)) => {
                        let parsed = ApiMessage::parse(&frame).and_then(FromModule::try_from);
                        match parsed {
                            Ok(message) => {
                                let event = ModuleEvent::Message { id: id.clone(), message };
                                if !self.emit(event).await {
                                    break;
                                }
                            }
                            Err(e) => warn!(module = %id, error = %e, "Skipping bad frame"),
                        }
                    }
                    Some(Err(e)) => {
                        warn!(module = %id, error = %e, "Framing error, closing module connection");
                        break;
                    }
                    None => break,
                },
            }
        }

        debug!(module = %id, "Module connection closed");
        self.emit(ModuleEvent::Disconnected { id }).await;
    }
}

/// Listener for local module connections.
pub struct ApiServer {
    local_addr: SocketAddr,
    sessions: Sessions,
}

impl ApiServer {
    /// Binds the listener and starts accepting modules.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(
        addr: SocketAddr,
        buffer: usize,
    ) -> NodeResult<(Self, mpsc::Receiver<ModuleEvent>)> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (events, events_rx) = mpsc::channel(buffer.max(1));

        let sessions = Sessions {
            events,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            buffer,
        };

        info!(addr = %local_addr, "Module API listening");

        let acceptor = sessions.clone();
        sessions.tracker.spawn(async move {
            loop {
                tokio::select! {
                    () = acceptor.shutdown.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer_addr)) => {
                            debug!(module = %peer_addr, "Module connected");
                            let session = acceptor.clone();
                            acceptor
                                .tracker
                                .spawn(session.run(stream, ConnectionId::from(peer_addr)));
                        }
                        Err(e) => warn!(error = %e, "Failed to accept module connection"),
                    },
                }
            }
        });

        Ok((
            Self {
                local_addr,
                sessions,
            },
            events_rx,
        ))
    }

    /// Returns the listening address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting, closes every module connection and waits for them.
    pub async fn close(&self) {
        self.sessions.shutdown.cancel();
        self.sessions.tracker.close();
        self.sessions.tracker.wait().await;
        info!(addr = %self.local_addr, "Module API closed");
    }
}
