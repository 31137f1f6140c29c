//! Error types for rumor-node.

use rumor_admission::ConnectionId;
use rumor_p2p::P2pError;
use thiserror::Error;

/// Errors raised while framing or parsing module API messages.
#[derive(Debug, Error)]
pub enum WireError {
    /// The frame type is unknown or not allowed in this direction.
    #[error("wrong message type: {0}")]
    WrongMessageType(u16),

    /// The body is shorter than its fixed fields.
    #[error("not enough data: need {needed} bytes, have {available}")]
    NotEnoughData {
        /// Bytes required by the message layout.
        needed: usize,
        /// Bytes present.
        available: usize,
    },

    /// The size header is smaller than the header itself.
    #[error("declared frame size {0} is smaller than the header")]
    BufferTooSmall(u16),

    /// The message does not fit in a `u16` sized frame.
    #[error("message of {0} bytes exceeds the frame limit")]
    MessageTooLarge(usize),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for wire operations.
pub type WireResult<T> = Result<T, WireError>;

/// Errors that can occur in node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// A module registered the same gossip type twice.
    #[error("module {module} is already registered for type {data_type}")]
    DuplicateRegistration {
        /// The module.
        module: ConnectionId,
        /// The gossip type.
        data_type: u16,
    },

    /// No local module is interested in this gossip type.
    #[error("no module registered for type {0}")]
    TypeNotRegistered(u16),

    /// The module is not registered for any type.
    #[error("module not found: {0}")]
    ModuleNotFound(ConnectionId),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Module API wire error.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Peer layer error.
    #[error("p2p error: {0}")]
    P2p(#[from] P2pError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A module's outbound queue is full.
    #[error("send queue full for module {0}")]
    ChannelFull(ConnectionId),

    /// An internal channel was closed.
    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),
}

/// Result type alias for node operations.
pub type NodeResult<T> = Result<T, NodeError>;
