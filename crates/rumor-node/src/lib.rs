//! # rumor-node
//!
//! The gossip node: local module API, type registry, router and the wiring
//! that connects them to the peer layer in `rumor-p2p`.
//!
//! Modules connect over TCP, subscribe to gossip types with `Notify`,
//! publish with `Announce` and judge received data with `Validation`. The
//! [`Router`] forwards announcements and verdicts to the strategy and fans
//! notifications out to every subscribed module.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod config;
pub mod error;
pub mod node;
pub mod registry;
pub mod router;

pub use api::{ApiCodec, ApiMessage, ApiServer, FromModule, ModuleEvent, ModuleSender, ToModule};
pub use config::{GossipConfig, NetworkConfig, NodeConfig};
pub use error::{NodeError, NodeResult, WireError, WireResult};
pub use node::GossipNode;
pub use registry::{RegisteredModule, TypeRegistry};
pub use router::Router;
