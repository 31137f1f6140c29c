//! Local module API: message layout, framing and the TCP server.

pub mod codec;
pub mod message;
pub mod server;

pub use codec::ApiCodec;
pub use message::{
    ApiFrame, ApiMessage, FromModule, GOSSIP_ANNOUNCE, GOSSIP_NOTIFICATION, GOSSIP_NOTIFY,
    GOSSIP_VALIDATION, HEADER_SIZE, ToModule,
};
pub use server::{ApiServer, ModuleEvent, ModuleSender};
