//! Background port relay for the MCP extension bridge.
//!
//! The relay is the only component with visibility into all open channels:
//! one UI port and one content port per tab. It pins each logical client to
//! a destination tab at first connect and forwards opaque messages both
//! ways. It holds no session state, never retries and never surfaces a
//! typed error to its peers; every undeliverable message is logged and
//! dropped, and the client transport's own timeout is the failure signal.

pub mod relay;
pub mod state;

pub use relay::{Relay, RelayHandle};
