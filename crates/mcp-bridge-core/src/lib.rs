//! Core building blocks for the MCP extension bridge.
//!
//! This crate provides the pieces shared by the relay and the client
//! transport:
//! - Wire envelopes (`BridgeMessage`, `BridgeResponse`, `PageMessage`)
//! - Identifier types (`ClientId`, `TabId`, `EventId`)
//! - Typed port pairs modeling extension message channels
//! - `EventStore` - monotonic event history for stream resumption

pub mod event_store;
pub mod ids;
pub mod message;
pub mod port;

pub use event_store::{EventStore, StoredEvent};
pub use ids::{ClientId, EventId, TabId};
pub use message::{BridgeMessage, BridgeResponse, Envelope, PageMessage, is_jsonrpc_message};
pub use port::{
    ContentPeer, ContentPort, PortError, PortSender, UiPeer, UiPort, content_port_pair,
    ui_port_pair,
};
