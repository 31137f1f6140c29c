//! Messages exchanged between peers.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a gossip message.
///
/// Used for deduplication across the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId {
    bytes: [u8; 16],
}

impl MessageId {
    /// Creates a new random message ID.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bytes: Uuid::new_v4().into_bytes(),
        }
    }

    /// Creates a message ID from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self { bytes }
    }

    /// Returns the raw bytes of the message ID.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.bytes
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(&self.bytes).into_string())
    }
}

/// A gossip payload travelling between peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipPush {
    /// Network-wide identity of the message.
    pub message_id: MessageId,
    /// Remaining hop budget at the receiver.
    pub ttl: u8,
    /// Application-defined gossip type.
    pub data_type: u16,
    /// Opaque application payload.
    pub payload: Vec<u8>,
}

/// Messages exchanged between peers in the gossip network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerMessage {
    /// A gossip payload.
    Push(GossipPush),

    /// Admission challenge sent by the accepting side.
    Challenge {
        /// Sealed cookie to be solved.
        cookie: Vec<u8>,
    },

    /// Answer to a challenge.
    Proof {
        /// The sealed cookie exactly as received.
        cookie: Vec<u8>,
        /// Nonce satisfying the difficulty.
        nonce: u64,
    },
}

impl PeerMessage {
    /// Creates a push message.
    #[must_use]
    pub const fn push(message_id: MessageId, ttl: u8, data_type: u16, payload: Vec<u8>) -> Self {
        Self::Push(GossipPush {
            message_id,
            ttl,
            data_type,
            payload,
        })
    }

    /// Returns the message type as a string (for logging/debugging).
    #[must_use]
    pub const fn message_type(&self) -> &'static str {
        match self {
            Self::Push(_) => "Push",
            Self::Challenge { .. } => "Challenge",
            Self::Proof { .. } => "Proof",
        }
    }

    /// Serializes the message to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserializes a message from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
