//! Relay coordinator task and its connection handle.

use mcp_bridge_core::{
    BridgeMessage, BridgeResponse, ContentPort, PortSender, TabId, UiPort, content_port_pair,
    ui_port_pair,
};
use tokio::sync::mpsc;

use crate::state::RelayState;

/// Events driving the coordinator. Port forwarder tasks translate raw port
/// traffic into these so every table mutation happens on one task.
enum RelayEvent {
    UiConnected {
        response_tx: mpsc::UnboundedSender<BridgeResponse>,
    },
    UiCommand(BridgeMessage),
    ContentConnected {
        tab: TabId,
        command_tx: mpsc::UnboundedSender<BridgeMessage>,
    },
    ContentResponse {
        tab: TabId,
        response: BridgeResponse,
    },
    ContentDisconnected {
        tab: TabId,
    },
    Shutdown,
}

/// The background relay.
pub struct Relay;

impl Relay {
    /// Spawn a relay coordinator and return a handle for connecting ports.
    ///
    /// The coordinator owns all routing state in memory; nothing survives
    /// it. It stops on [`RelayHandle::shutdown`] or once every handle and
    /// connected port is gone.
    #[must_use]
    pub fn spawn() -> RelayHandle {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(coordinator(event_rx));
        RelayHandle { event_tx }
    }
}

/// Handle used by sandboxes to connect their port to the relay.
#[derive(Clone)]
pub struct RelayHandle {
    event_tx: mpsc::UnboundedSender<RelayEvent>,
}

impl RelayHandle {
    /// Connect the extension UI surface.
    ///
    /// The returned port becomes the relay's singleton UI channel; any
    /// previously connected UI port is implicitly invalidated. Existing
    /// client pins survive a UI reconnect.
    #[must_use]
    pub fn connect_ui(&self) -> UiPort {
        let (port, peer) = ui_port_pair();

        let _ = self.event_tx.send(RelayEvent::UiConnected {
            response_tx: peer.response_tx,
        });

        let event_tx = self.event_tx.clone();
        let mut command_rx = peer.command_rx;
        tokio::spawn(async move {
            while let Some(msg) = command_rx.recv().await {
                if event_tx.send(RelayEvent::UiCommand(msg)).is_err() {
                    break;
                }
            }
        });

        port
    }

    /// Connect a per-tab content relay.
    ///
    /// Returns `None` when the sender metadata carries no tab id; such a
    /// connection cannot be routed safely and is ignored.
    #[must_use]
    pub fn connect_content(&self, sender: PortSender) -> Option<ContentPort> {
        let Some(tab) = sender.tab else {
            tracing::warn!("content port connected without a tab id; ignoring");
            return None;
        };

        let (port, peer) = content_port_pair(sender);

        let _ = self.event_tx.send(RelayEvent::ContentConnected {
            tab,
            command_tx: peer.command_tx,
        });

        let event_tx = self.event_tx.clone();
        let mut response_rx = peer.response_rx;
        tokio::spawn(async move {
            while let Some(response) = response_rx.recv().await {
                if event_tx
                    .send(RelayEvent::ContentResponse { tab, response })
                    .is_err()
                {
                    return;
                }
            }
            let _ = event_tx.send(RelayEvent::ContentDisconnected { tab });
        });

        Some(port)
    }

    /// Stop the coordinator. In-flight sessions do not survive this.
    pub fn shutdown(&self) {
        let _ = self.event_tx.send(RelayEvent::Shutdown);
    }
}

async fn coordinator(mut event_rx: mpsc::UnboundedReceiver<RelayEvent>) {
    tracing::info!("relay coordinator started");
    let mut state = RelayState::new();

    while let Some(event) = event_rx.recv().await {
        match event {
            RelayEvent::UiConnected { response_tx } => {
                tracing::debug!("UI port connected");
                state.set_ui_port(response_tx);
            }
            RelayEvent::UiCommand(msg) => handle_ui_command(&mut state, msg),
            RelayEvent::ContentConnected { tab, command_tx } => {
                tracing::debug!(tab, "content port connected");
                state.register_content(tab, command_tx);
            }
            RelayEvent::ContentResponse { tab, response } => {
                handle_content_response(&state, tab, response);
            }
            RelayEvent::ContentDisconnected { tab } => {
                let purged = state.remove_content(tab);
                tracing::debug!(tab, purged = purged.len(), "content port disconnected");
            }
            RelayEvent::Shutdown => break,
        }
    }

    tracing::info!("relay coordinator stopped");
}

fn handle_ui_command(state: &mut RelayState, msg: BridgeMessage) {
    match &msg {
        BridgeMessage::Connect { client_id, .. } => {
            let Some(tab) = state.pin(client_id) else {
                // No NACK: the client's handshake timeout is the only
                // failure signal.
                tracing::warn!(client = %client_id, "no content port available; dropping connect");
                return;
            };
            tracing::debug!(client = %client_id, tab, "client pinned");
            forward_to_tab(state, tab, msg);
        }
        BridgeMessage::Send { client_id, .. } => {
            let Some(tab) = state.pinned_tab(client_id) else {
                tracing::warn!(client = %client_id, "send for unpinned client; dropping");
                return;
            };
            forward_to_tab(state, tab, msg);
        }
    }
}

fn forward_to_tab(state: &mut RelayState, tab: TabId, msg: BridgeMessage) {
    let client_id = msg.client_id().clone();
    let delivered = state
        .content_sender(tab)
        .is_some_and(|tx| tx.send(msg).is_ok());
    if !delivered {
        tracing::warn!(client = %client_id, tab, "content channel gone; dropping message");
        state.unpin(&client_id);
    }
}

fn handle_content_response(state: &RelayState, tab: TabId, response: BridgeResponse) {
    if !state.accepts_response(&response.client_id, tab) {
        tracing::warn!(
            client = %response.client_id,
            tab,
            "stale response from unpinned tab; dropping"
        );
        return;
    }

    let delivered = state
        .ui_sender()
        .is_some_and(|tx| tx.send(response).is_ok());
    if !delivered {
        tracing::warn!(tab, "no live UI port; dropping response");
    }
}

#[cfg(test)]
mod tests {
    use mcp_bridge_core::{ClientId, Envelope, PageMessage};
    use serde_json::json;

    use super::*;

    fn connect(client: &ClientId) -> BridgeMessage {
        BridgeMessage::Connect {
            client_id: client.clone(),
            resume_from: None,
        }
    }

    fn send(client: &ClientId, n: u64) -> BridgeMessage {
        BridgeMessage::Send {
            client_id: client.clone(),
            payload: json!({ "jsonrpc": "2.0", "method": "ping", "id": n }),
        }
    }

    fn response(client: &ClientId) -> BridgeResponse {
        BridgeResponse {
            client_id: client.clone(),
            msg: PageMessage::Envelope(Envelope::McpEvent {
                event_id: mcp_bridge_core::EventId(1),
                message: json!({ "jsonrpc": "2.0", "method": "note" }),
            }),
        }
    }

    #[tokio::test]
    async fn routes_connect_and_send_to_pinned_tab() {
        let relay = Relay::spawn();
        let ui = relay.connect_ui();
        let mut tab1 = relay.connect_content(PortSender::from_tab(1)).unwrap();
        let _tab2 = relay.connect_content(PortSender::from_tab(2)).unwrap();

        let client = ClientId::from("c1");
        ui.post(connect(&client)).unwrap();
        ui.post(send(&client, 1)).unwrap();

        assert!(matches!(
            tab1.recv().await.unwrap(),
            BridgeMessage::Connect { .. }
        ));
        assert!(matches!(
            tab1.recv().await.unwrap(),
            BridgeMessage::Send { .. }
        ));
    }

    #[tokio::test]
    async fn stale_responses_are_not_forwarded() {
        let relay = Relay::spawn();
        let mut ui = relay.connect_ui();
        let mut tab1 = relay.connect_content(PortSender::from_tab(1)).unwrap();
        let tab2 = relay.connect_content(PortSender::from_tab(2)).unwrap();

        let client = ClientId::from("c1");
        ui.post(connect(&client)).unwrap();
        // Wait until the pin exists.
        let _ = tab1.recv().await.unwrap();

        // Pinned tab's response gets through; the other tab's does not.
        tab2.post(response(&client)).unwrap();
        tab1.post(response(&client)).unwrap();

        let delivered = ui.recv().await.unwrap();
        assert_eq!(delivered.client_id, client);
        assert!(ui.try_recv().is_none());
    }

    #[tokio::test]
    async fn send_after_tab_disconnect_is_dropped() {
        let relay = Relay::spawn();
        let mut ui = relay.connect_ui();
        let tab1 = relay.connect_content(PortSender::from_tab(1)).unwrap();

        let client = ClientId::from("c1");
        ui.post(connect(&client)).unwrap();

        drop(tab1);
        // Let the disconnect propagate before sending.
        tokio::task::yield_now().await;
        ui.post(send(&client, 1)).unwrap();

        // Nothing comes back and nothing panics; the relay logged and
        // dropped. The UI port itself stays usable.
        tokio::task::yield_now().await;
        assert!(ui.try_recv().is_none());
    }

    #[tokio::test]
    async fn ui_replacement_preserves_client_routes() {
        let relay = Relay::spawn();
        let ui1 = relay.connect_ui();
        let mut tab1 = relay.connect_content(PortSender::from_tab(1)).unwrap();

        let client = ClientId::from("c1");
        ui1.post(connect(&client)).unwrap();
        let _ = tab1.recv().await.unwrap();

        // New UI surface replaces the singleton port.
        let mut ui2 = relay.connect_ui();
        tokio::task::yield_now().await;

        ui2.post(send(&client, 1)).unwrap();
        assert!(matches!(
            tab1.recv().await.unwrap(),
            BridgeMessage::Send { .. }
        ));

        // Responses now land on the replacement port.
        tab1.post(response(&client)).unwrap();
        assert_eq!(ui2.recv().await.unwrap().client_id, client);
    }

    #[tokio::test]
    async fn content_port_without_tab_is_ignored() {
        let relay = Relay::spawn();
        assert!(relay.connect_content(PortSender::default()).is_none());
    }

    #[tokio::test]
    async fn connect_without_tabs_is_dropped() {
        let relay = Relay::spawn();
        let mut ui = relay.connect_ui();

        ui.post(connect(&ClientId::from("c1"))).unwrap();
        tokio::task::yield_now().await;

        // No handshake, no NACK; the client is left to time out.
        assert!(ui.try_recv().is_none());
    }
}
