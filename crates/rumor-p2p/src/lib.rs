//! # rumor-p2p
//!
//! Peer-to-peer layer of the rumor gossip node.
//!
//! This crate provides:
//!
//! - A cookie and proof-of-work admission handshake for new peer links
//! - A three-state registry of peer connections
//! - A periodic, degree-bounded push dissemination strategy
//! - A TCP transport carrying length-prefixed JSON frames
//!
//! ## Core Types
//!
//! - [`ConnectionManager`]: Tracks links through ToBeProved, InProgress and Valid
//! - [`GossipStrategy`]: The event loop that admits peers and relays messages
//! - [`Admission`]: Issues challenges and verifies proofs
//! - [`PeerTransport`]: TCP implementation of [`Transport`]
//! - [`PeerMessage`]: Messages exchanged between peers

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod message;
pub mod strategy;
pub mod transport;

pub use cache::{NotificationTable, PendingCache, PendingMessage, SeenCache};
pub use config::StrategyConfig;
pub use connection::{
    ConnectionCounts, ConnectionManager, ConnectionState, Direction, GossipConnection, PeerSender,
};
pub use error::{P2pError, P2pResult};
pub use handshake::{Admission, CookieProof, MAX_COOKIE_LEN, ProofSolver, check_cookie_len};
pub use message::{GossipPush, MessageId, PeerMessage};
pub use strategy::{FromStrategy, GossipStrategy, RoundSummary, ToStrategy, disseminate};
pub use transport::{BoxFuture, PeerTransport, Transport, TransportEvent, frame_codec};
