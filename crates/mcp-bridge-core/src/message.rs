//! Wire envelopes carried between the UI surface, the relay and the
//! content side.
//!
//! Field and tag spellings match the extension wire format (camelCase
//! fields, kebab-case `type` tags), so a Rust peer interoperates with the
//! original JavaScript sides byte for byte.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ClientId, EventId};

/// Command sent from the client side towards the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum BridgeMessage {
    /// Open (or resume) a logical session for `client_id`.
    Connect {
        client_id: ClientId,
        /// Resumption token: replay events after this id.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resume_from: Option<EventId>,
    },
    /// Ship an opaque protocol message for an established session.
    Send { client_id: ClientId, payload: Value },
}

impl BridgeMessage {
    /// The logical client this command belongs to.
    #[must_use]
    pub const fn client_id(&self) -> &ClientId {
        match self {
            Self::Connect { client_id, .. } | Self::Send { client_id, .. } => client_id,
        }
    }
}

/// Response routed from the content side back to one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeResponse {
    pub client_id: ClientId,
    pub msg: PageMessage,
}

/// Message produced by the in-page provider side.
///
/// Either a tagged envelope or a bare protocol message passed through
/// without one. Untagged decoding tries the envelope first; JSON-RPC
/// messages carry no `type` field and so never collide with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PageMessage {
    Envelope(Envelope),
    Passthrough(Value),
}

/// Tagged provider envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Envelope {
    /// Handshake acknowledgment; the only message permitted before a
    /// connection counts as established.
    McpServerInfo {
        server_session_id: String,
        server_instance_id: String,
        #[serde(default)]
        has_event_store: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stream_id: Option<String>,
    },
    /// Live stream event.
    McpEvent { event_id: EventId, message: Value },
    /// Replayed stream event delivered during resumption.
    McpReplayEvent { event_id: EventId, message: Value },
}

/// Whether a raw value looks like a JSON-RPC message.
///
/// The transport only forwards passthrough values upward when they do;
/// anything else is unrecognized traffic and gets dropped.
#[must_use]
pub fn is_jsonrpc_message(value: &Value) -> bool {
    value.get("jsonrpc").and_then(Value::as_str) == Some("2.0")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn connect_wire_shape() {
        let msg = BridgeMessage::Connect {
            client_id: ClientId::from("c1"),
            resume_from: Some(EventId(7)),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            json!({ "cmd": "connect", "clientId": "c1", "resumeFrom": 7 })
        );

        // resumeFrom is omitted entirely on a fresh connect
        let fresh = BridgeMessage::Connect {
            client_id: ClientId::from("c1"),
            resume_from: None,
        };
        let json = serde_json::to_value(&fresh).unwrap();
        assert_eq!(json, json!({ "cmd": "connect", "clientId": "c1" }));
    }

    #[test]
    fn send_wire_shape() {
        let msg = BridgeMessage::Send {
            client_id: ClientId::from("c1"),
            payload: json!({ "jsonrpc": "2.0", "method": "ping", "id": 1 }),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""cmd":"send""#));

        let parsed: BridgeMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn server_info_tag_spelling() {
        let info = Envelope::McpServerInfo {
            server_session_id: "sess".into(),
            server_instance_id: "inst".into(),
            has_event_store: true,
            stream_id: Some("stream-1".into()),
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["type"], "mcp-server-info");
        assert_eq!(json["serverSessionId"], "sess");
        assert_eq!(json["hasEventStore"], true);
    }

    #[test]
    fn page_message_prefers_envelope_over_passthrough() {
        let raw = json!({ "type": "mcp-event", "eventId": 3, "message": { "jsonrpc": "2.0", "method": "m" } });
        let parsed: PageMessage = serde_json::from_value(raw).unwrap();
        assert!(matches!(
            parsed,
            PageMessage::Envelope(Envelope::McpEvent { event_id: EventId(3), .. })
        ));
    }

    #[test]
    fn bare_jsonrpc_is_passthrough() {
        let raw = json!({ "jsonrpc": "2.0", "id": 1, "result": {} });
        let parsed: PageMessage = serde_json::from_value(raw.clone()).unwrap();
        match parsed {
            PageMessage::Passthrough(v) => {
                assert!(is_jsonrpc_message(&v));
                assert_eq!(v, raw);
            }
            PageMessage::Envelope(_) => panic!("bare message parsed as envelope"),
        }
    }

    #[test]
    fn unknown_tag_falls_back_to_passthrough() {
        let raw = json!({ "type": "mcp-shrug", "data": 1 });
        let parsed: PageMessage = serde_json::from_value(raw).unwrap();
        assert!(matches!(parsed, PageMessage::Passthrough(_)));
        if let PageMessage::Passthrough(v) = parsed {
            assert!(!is_jsonrpc_message(&v));
        }
    }
}
