//! Integration test support for rumor nodes.
//!
//! Helpers shared by the tests in `tests/`: a node config tuned for loopback
//! runs, a polling wait, and a module client speaking the module API.

#![forbid(unsafe_code)]

use futures::{SinkExt, StreamExt};
use rumor_node::{ApiCodec, ApiMessage, GossipConfig, NetworkConfig, NodeConfig, WireError};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

/// Node config with ephemeral ports, cheap proofs and fast rounds.
#[must_use]
pub fn local_config(neighbors: Vec<SocketAddr>) -> NodeConfig {
    NodeConfig {
        gossip: GossipConfig {
            gossip_timer: 0.05,
            difficulty: 4,
            pow_workers: 2,
            ..GossipConfig::default()
        },
        network: NetworkConfig {
            api_address: SocketAddr::from(([127, 0, 0, 1], 0)),
            p2p_address: SocketAddr::from(([127, 0, 0, 1], 0)),
            neighbors,
            connect_timeout: 2,
        },
    }
}

/// Polls `condition` every 20ms until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// A notification as seen by a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    /// Local id to quote in the validation.
    pub message_id: u16,
    /// Gossip type.
    pub data_type: u16,
    /// Payload.
    pub payload: Vec<u8>,
}

/// A local module connected to a node's API.
pub struct ModuleClient {
    framed: Framed<TcpStream, ApiCodec>,
}

impl ModuleClient {
    /// Connects to a node's module API.
    pub async fn connect(addr: SocketAddr) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            framed: Framed::new(stream, ApiCodec),
        })
    }

    /// Subscribes to a gossip type.
    pub async fn notify(&mut self, data_type: u16) -> Result<(), WireError> {
        self.framed.send(ApiMessage::Notify { data_type }).await
    }

    /// Announces data to the network.
    pub async fn announce(&mut self, ttl: u8, data_type: u16, payload: &[u8]) -> Result<(), WireError> {
        self.framed
            .send(ApiMessage::Announce {
                ttl,
                data_type,
                payload: payload.to_vec(),
            })
            .await
    }

    /// Sends a verdict on a notification.
    pub async fn validate(&mut self, message_id: u16, valid: bool) -> Result<(), WireError> {
        self.framed
            .send(ApiMessage::Validation { message_id, valid })
            .await
    }

    /// Waits up to `timeout` for the next notification.
    pub async fn next_notification(&mut self, timeout: Duration) -> Option<Received> {
        let frame = tokio::time::timeout(timeout, self.framed.next())
            .await
            .ok()??
            .ok()?;
        match ApiMessage::parse(&frame).ok()? {
            ApiMessage::Notification {
                message_id,
                data_type,
                payload,
            } => Some(Received {
                message_id,
                data_type,
                payload,
            }),
            _ => None,
        }
    }
}
