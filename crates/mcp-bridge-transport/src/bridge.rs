//! Channel bridge: the seam between the transport and the messaging
//! primitive underneath it.

use async_trait::async_trait;
use mcp_bridge_core::{BridgeMessage, BridgeResponse, ClientId, EventId, PortError, UiPort};
use serde_json::Value;

/// Options attached to a connect command.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectOptions {
    /// Resume the event stream after this id.
    pub resume_from: Option<EventId>,
}

/// Thin abstraction over one bidirectional message channel.
///
/// Exists purely so the reconnecting transport is not coupled to the
/// concrete channel technology. Implementations perform no buffering, no
/// retry and no protocol interpretation. `recv` must be cancel-safe: the
/// transport polls it from a select loop.
#[async_trait]
pub trait ChannelBridge: Send {
    /// Issue a connect command for `client_id`.
    ///
    /// # Errors
    /// Returns [`PortError::Closed`] if the channel is gone.
    fn connect(
        &self,
        client_id: &ClientId,
        options: Option<ConnectOptions>,
    ) -> Result<(), PortError>;

    /// Ship an opaque protocol message for `client_id`.
    ///
    /// # Errors
    /// Returns [`PortError::Closed`] if the channel is gone.
    fn send(&self, client_id: &ClientId, message: Value) -> Result<(), PortError>;

    /// Receive the next routed response; `None` once the channel closes.
    async fn recv(&mut self) -> Option<BridgeResponse>;
}

#[async_trait]
impl ChannelBridge for UiPort {
    fn connect(
        &self,
        client_id: &ClientId,
        options: Option<ConnectOptions>,
    ) -> Result<(), PortError> {
        self.post(BridgeMessage::Connect {
            client_id: client_id.clone(),
            resume_from: options.and_then(|o| o.resume_from),
        })
    }

    fn send(&self, client_id: &ClientId, message: Value) -> Result<(), PortError> {
        self.post(BridgeMessage::Send {
            client_id: client_id.clone(),
            payload: message,
        })
    }

    async fn recv(&mut self) -> Option<BridgeResponse> {
        Self::recv(self).await
    }
}
