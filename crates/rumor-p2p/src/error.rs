//! Error types for rumor-p2p.

use rumor_admission::{AdmissionError, ConnectionId};
use thiserror::Error;

/// Errors that can occur in P2P operations.
#[derive(Debug, Error)]
pub enum P2pError {
    /// No connection with this identity is tracked.
    #[error("connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    /// A submitted proof does not satisfy the difficulty.
    #[error("insufficient proof of work")]
    InsufficientWork,

    /// A challenge cookie exceeds the size a proof can carry.
    #[error("cookie of {len} bytes exceeds {max}")]
    CookieTooLarge {
        /// Received length.
        len: usize,
        /// Largest accepted length.
        max: usize,
    },

    /// Cookie verification failed.
    #[error("admission failed: {0}")]
    Admission(#[from] AdmissionError),

    /// The peer's outbound queue is full.
    #[error("send queue full for {0}")]
    ChannelFull(ConnectionId),

    /// The peer's link has gone away.
    #[error("channel closed for {0}")]
    ChannelClosed(ConnectionId),

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection failed.
    #[error("connection failed: {0}")]
    Connection(String),
}

/// Result type alias for P2P operations.
pub type P2pResult<T> = Result<T, P2pError>;
