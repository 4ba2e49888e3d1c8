//! In-page provider double.
//!
//! Plays the role of the tab-hosted MCP provider behind a content port:
//! answers connects with the handshake envelope, replays stored events for
//! resuming clients and fans live events out to every connected client.
//! Used by the end-to-end tests and the demo; it is not a protocol server.

use std::collections::HashSet;
use std::sync::Arc;

use mcp_bridge_core::{
    BridgeMessage, BridgeResponse, ClientId, ContentPort, Envelope, EventStore, PageMessage,
    StoredEvent,
};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Provider double serving one content port.
pub struct PageServer {
    store: Arc<EventStore>,
    session_id: String,
    instance_id: String,
    echo: bool,
}

impl Default for PageServer {
    fn default() -> Self {
        Self::new()
    }
}

impl PageServer {
    /// Create a provider with a fresh event store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: Arc::new(EventStore::new()),
            session_id: Uuid::new_v4().to_string(),
            instance_id: Uuid::new_v4().to_string(),
            echo: false,
        }
    }

    /// Enable echo replies: every inbound request is answered with a
    /// result wrapping the original payload.
    #[must_use]
    pub const fn with_echo(mut self) -> Self {
        self.echo = true;
        self
    }

    /// Handle to the store; appended events reach connected clients live
    /// and become replayable history.
    #[must_use]
    pub fn store(&self) -> Arc<EventStore> {
        Arc::clone(&self.store)
    }

    /// Serve the given content port until it closes.
    pub fn spawn(self, port: ContentPort) -> JoinHandle<()> {
        tokio::spawn(self.run(port))
    }

    async fn run(self, mut port: ContentPort) {
        let mut live = self.store.subscribe();
        let mut clients: HashSet<ClientId> = HashSet::new();

        loop {
            tokio::select! {
                cmd = port.recv() => {
                    let Some(cmd) = cmd else { break };
                    if self.handle_command(&port, &mut clients, cmd).is_err() {
                        break;
                    }
                }
                event = live.recv() => {
                    match event {
                        Ok(event) => {
                            if Self::fan_out(&port, &clients, &event).is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "event fanout lagging; dropped live events");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
        tracing::debug!("content port closed; provider stopping");
    }

    fn handle_command(
        &self,
        port: &ContentPort,
        clients: &mut HashSet<ClientId>,
        cmd: BridgeMessage,
    ) -> Result<(), mcp_bridge_core::PortError> {
        match cmd {
            BridgeMessage::Connect {
                client_id,
                resume_from,
            } => {
                port.post(BridgeResponse {
                    client_id: client_id.clone(),
                    msg: PageMessage::Envelope(Envelope::McpServerInfo {
                        server_session_id: self.session_id.clone(),
                        server_instance_id: self.instance_id.clone(),
                        has_event_store: true,
                        stream_id: Some(self.store.stream_id().to_string()),
                    }),
                })?;

                for stored in self.store.replay_after(resume_from) {
                    port.post(BridgeResponse {
                        client_id: client_id.clone(),
                        msg: PageMessage::Envelope(Envelope::McpReplayEvent {
                            event_id: stored.event_id,
                            message: stored.message,
                        }),
                    })?;
                }

                clients.insert(client_id);
            }
            BridgeMessage::Send { client_id, payload } => {
                if self.echo {
                    port.post(BridgeResponse {
                        client_id,
                        msg: PageMessage::Passthrough(echo_reply(&payload)),
                    })?;
                }
            }
        }
        Ok(())
    }

    fn fan_out(
        port: &ContentPort,
        clients: &HashSet<ClientId>,
        event: &StoredEvent,
    ) -> Result<(), mcp_bridge_core::PortError> {
        for client_id in clients {
            port.post(BridgeResponse {
                client_id: client_id.clone(),
                msg: PageMessage::Envelope(Envelope::McpEvent {
                    event_id: event.event_id,
                    message: event.message.clone(),
                }),
            })?;
        }
        Ok(())
    }
}

fn echo_reply(payload: &Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": payload.get("id").cloned().unwrap_or(Value::Null),
        "result": { "echo": payload },
    })
}

#[cfg(test)]
mod tests {
    use mcp_bridge_core::{EventId, PortSender, content_port_pair};
    use serde_json::json;

    use super::*;

    fn envelope(resp: BridgeResponse) -> Envelope {
        match resp.msg {
            PageMessage::Envelope(env) => env,
            PageMessage::Passthrough(other) => panic!("expected envelope, got {other}"),
        }
    }

    #[tokio::test]
    async fn connect_is_answered_with_server_info() {
        let server = PageServer::new();
        let stream = server.store().stream_id().to_string();
        let (port, mut peer) = content_port_pair(PortSender::from_tab(1));
        server.spawn(port);

        peer.command_tx
            .send(BridgeMessage::Connect {
                client_id: ClientId::from("c1"),
                resume_from: None,
            })
            .unwrap();

        match envelope(peer.response_rx.recv().await.unwrap()) {
            Envelope::McpServerInfo {
                has_event_store,
                stream_id,
                ..
            } => {
                assert!(has_event_store);
                assert_eq!(stream_id.as_deref(), Some(stream.as_str()));
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[tokio::test]
    async fn resuming_connect_replays_missed_events() {
        let server = PageServer::new();
        let store = server.store();
        let first = store.append(json!({ "jsonrpc": "2.0", "method": "a" }));
        store.append(json!({ "jsonrpc": "2.0", "method": "b" }));

        let (port, mut peer) = content_port_pair(PortSender::from_tab(1));
        server.spawn(port);

        peer.command_tx
            .send(BridgeMessage::Connect {
                client_id: ClientId::from("c1"),
                resume_from: Some(first),
            })
            .unwrap();

        // Handshake first, then exactly the one unseen event as a replay.
        assert!(matches!(
            envelope(peer.response_rx.recv().await.unwrap()),
            Envelope::McpServerInfo { .. }
        ));
        match envelope(peer.response_rx.recv().await.unwrap()) {
            Envelope::McpReplayEvent { event_id, message } => {
                assert!(event_id > first);
                assert_eq!(message["method"], "b");
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[tokio::test]
    async fn live_events_reach_connected_clients() {
        let server = PageServer::new();
        let store = server.store();
        let (port, mut peer) = content_port_pair(PortSender::from_tab(1));
        server.spawn(port);

        peer.command_tx
            .send(BridgeMessage::Connect {
                client_id: ClientId::from("c1"),
                resume_from: None,
            })
            .unwrap();
        assert!(matches!(
            envelope(peer.response_rx.recv().await.unwrap()),
            Envelope::McpServerInfo { .. }
        ));

        let id = store.append(json!({ "jsonrpc": "2.0", "method": "tick" }));
        match envelope(peer.response_rx.recv().await.unwrap()) {
            Envelope::McpEvent { event_id, message } => {
                assert_eq!(event_id, id);
                assert_eq!(message["method"], "tick");
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[tokio::test]
    async fn events_before_any_connect_go_nowhere_live() {
        let server = PageServer::new();
        let store = server.store();
        let (port, mut peer) = content_port_pair(PortSender::from_tab(1));
        server.spawn(port);

        store.append(json!({ "jsonrpc": "2.0", "method": "early" }));
        tokio::task::yield_now().await;
        assert!(peer.response_rx.try_recv().is_err());
        assert_eq!(store.last_event_id(), Some(EventId(1)));
    }

    #[tokio::test]
    async fn echo_answers_requests() {
        let server = PageServer::new().with_echo();
        let (port, mut peer) = content_port_pair(PortSender::from_tab(1));
        server.spawn(port);

        peer.command_tx
            .send(BridgeMessage::Send {
                client_id: ClientId::from("c1"),
                payload: json!({ "jsonrpc": "2.0", "id": 42, "method": "ping" }),
            })
            .unwrap();

        let resp = peer.response_rx.recv().await.unwrap();
        match resp.msg {
            PageMessage::Passthrough(value) => {
                assert_eq!(value["id"], 42);
                assert_eq!(value["result"]["echo"]["method"], "ping");
            }
            PageMessage::Envelope(other) => panic!("unexpected envelope: {other:?}"),
        }
    }
}
