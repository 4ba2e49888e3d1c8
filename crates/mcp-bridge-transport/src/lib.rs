//! Reconnecting client transport for the MCP extension bridge.
//!
//! Provides:
//! - `ChannelBridge` - thin seam over one message channel
//! - `ExtensionClientTransport` - handshake, reconnection and stream
//!   resumption behind a conventional connect/send/close contract
//! - `PageServer` - in-page provider double for demos and tests

pub mod backoff;
pub mod bridge;
pub mod client;
pub mod page_server;

pub use backoff::ReconnectionOptions;
pub use bridge::{ChannelBridge, ConnectOptions};
pub use client::{
    ExtensionClientTransport, SessionInfo, TransportError, TransportEvent, TransportOptions,
};
pub use page_server::PageServer;
