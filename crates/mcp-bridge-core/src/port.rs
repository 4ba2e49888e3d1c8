//! Typed port pairs modeling extension message channels.
//!
//! A port is one bidirectional channel between two sandboxes. Each
//! constructor returns both halves: the near half for the connecting side
//! and the peer half for the relay. Sends are fire-and-forget; dropping
//! either half disconnects the port and the survivor observes closure
//! through its receiver. Messages on a single port arrive in send order.

use tokio::sync::mpsc;

use crate::ids::TabId;
use crate::message::{BridgeMessage, BridgeResponse};

/// Port send error.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("port closed")]
    Closed,
}

/// Metadata describing the sender of a content-side port connection.
///
/// The relay derives the owning tab from this; a connection without one
/// cannot be routed safely and is ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortSender {
    pub tab: Option<TabId>,
}

impl PortSender {
    /// Sender metadata for a known tab.
    #[must_use]
    pub const fn from_tab(tab: TabId) -> Self {
        Self { tab: Some(tab) }
    }
}

/// UI-side half: posts bridge commands, receives routed responses.
pub struct UiPort {
    tx: mpsc::UnboundedSender<BridgeMessage>,
    rx: mpsc::UnboundedReceiver<BridgeResponse>,
}

impl UiPort {
    /// Post a command towards the relay.
    ///
    /// # Errors
    /// Returns [`PortError::Closed`] if the relay end is gone.
    pub fn post(&self, msg: BridgeMessage) -> Result<(), PortError> {
        self.tx.send(msg).map_err(|_| PortError::Closed)
    }

    /// Receive the next routed response; `None` once the port is closed.
    pub async fn recv(&mut self) -> Option<BridgeResponse> {
        self.rx.recv().await
    }

    /// Receive without waiting.
    pub fn try_recv(&mut self) -> Option<BridgeResponse> {
        self.rx.try_recv().ok()
    }
}

/// Relay-side half of a UI port.
pub struct UiPeer {
    /// Sender for responses routed back to the UI.
    pub response_tx: mpsc::UnboundedSender<BridgeResponse>,
    /// Receiver for bridge commands from the UI.
    pub command_rx: mpsc::UnboundedReceiver<BridgeMessage>,
}

/// Content-side half: receives forwarded commands, posts responses.
pub struct ContentPort {
    tx: mpsc::UnboundedSender<BridgeResponse>,
    rx: mpsc::UnboundedReceiver<BridgeMessage>,
}

impl ContentPort {
    /// Post a response towards the relay.
    ///
    /// # Errors
    /// Returns [`PortError::Closed`] if the relay end is gone.
    pub fn post(&self, msg: BridgeResponse) -> Result<(), PortError> {
        self.tx.send(msg).map_err(|_| PortError::Closed)
    }

    /// Receive the next forwarded command; `None` once the port is closed.
    pub async fn recv(&mut self) -> Option<BridgeMessage> {
        self.rx.recv().await
    }
}

/// Relay-side half of a content port.
pub struct ContentPeer {
    /// Sender metadata the port was connected with.
    pub sender: PortSender,
    /// Sender for commands forwarded to the content side.
    pub command_tx: mpsc::UnboundedSender<BridgeMessage>,
    /// Receiver for responses from the content side.
    pub response_rx: mpsc::UnboundedReceiver<BridgeResponse>,
}

/// Create a UI port pair.
#[must_use]
pub fn ui_port_pair() -> (UiPort, UiPeer) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (response_tx, response_rx) = mpsc::unbounded_channel();

    let port = UiPort {
        tx: command_tx,
        rx: response_rx,
    };
    let peer = UiPeer {
        response_tx,
        command_rx,
    };

    (port, peer)
}

/// Create a content port pair carrying the given sender metadata.
#[must_use]
pub fn content_port_pair(sender: PortSender) -> (ContentPort, ContentPeer) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (response_tx, response_rx) = mpsc::unbounded_channel();

    let port = ContentPort {
        tx: response_tx,
        rx: command_rx,
    };
    let peer = ContentPeer {
        sender,
        command_tx,
        response_rx,
    };

    (port, peer)
}
