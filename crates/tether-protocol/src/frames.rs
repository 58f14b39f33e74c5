//! Frame envelopes for the duplex connection.
//!
//! Inbound text frames parse into [`ServerFrame`]; outbound requests
//! serialize from [`ClientFrame`]. Correlation between a request and its
//! response happens only through the echoed request `id`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tether_core::RequestId;

use crate::events::{AgentEvent, ChatEvent};

/// An inbound frame from the gateway.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// First frame after the socket opens: the server-assigned connection id.
    #[serde(rename = "hello", rename_all = "camelCase")]
    Hello {
        /// Opaque server-assigned session id for this connection.
        session_id: String,
    },
    /// A server-pushed event.
    #[serde(rename = "event")]
    Event(ServerEvent),
    /// A response to a client request.
    #[serde(rename = "response")]
    Response(ResponseFrame),
}

/// Server-pushed events, discriminated by the `event` field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ServerEvent {
    /// Authentication challenge; the client must answer with `connect`.
    #[serde(rename = "connect.challenge")]
    ConnectChallenge {
        /// Single-use nonce to bind into the device signature.
        nonce: String,
    },
    /// Coarse chat lifecycle event for one run.
    #[serde(rename = "chat")]
    Chat(ChatEvent),
    /// Fine-grained agent stream event for one run.
    #[serde(rename = "agent")]
    Agent(AgentEvent),
}

/// Response to a client request, correlated by `id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseFrame {
    /// Echoed request id.
    pub id: RequestId,
    /// Whether the request succeeded.
    pub ok: bool,
    /// Result payload (present when `ok == true`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Error payload (present when `ok == false`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

/// Structured error body inside a [`ResponseFrame`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g. `SESSION_NOT_FOUND`).
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// An outbound request frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "request", rename_all = "camelCase")]
pub struct ClientFrame {
    /// Client-chosen request id, echoed by the response.
    pub id: RequestId,
    /// Method name (e.g. `chat.send`).
    pub method: String,
    /// Optional parameters object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl ClientFrame {
    /// Build a request frame with serialized params.
    ///
    /// Returns `Err` only if `params` fails to serialize, which for the
    /// typed param structs in this crate cannot happen in practice.
    pub fn request<P: Serialize>(
        id: RequestId,
        method: impl Into<String>,
        params: &P,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id,
            method: method.into(),
            params: Some(serde_json::to_value(params)?),
        })
    }

    /// Build a request frame without params.
    #[must_use]
    pub fn bare(id: RequestId, method: impl Into<String>) -> Self {
        Self {
            id,
            method: method.into(),
            params: None,
        }
    }
}

impl ResponseFrame {
    /// Error code of a failed response, if present.
    #[must_use]
    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn hello_frame_parses() {
        let frame: ServerFrame =
            serde_json::from_str(r#"{"type":"hello","sessionId":"conn-9"}"#).unwrap();
        assert_matches!(frame, ServerFrame::Hello { session_id } if session_id == "conn-9");
    }

    #[test]
    fn challenge_event_parses() {
        let frame: ServerFrame = serde_json::from_str(
            r#"{"type":"event","event":"connect.challenge","nonce":"n-1"}"#,
        )
        .unwrap();
        assert_matches!(
            frame,
            ServerFrame::Event(ServerEvent::ConnectChallenge { nonce }) if nonce == "n-1"
        );
    }

    #[test]
    fn response_frame_parses_ok() {
        let frame: ServerFrame = serde_json::from_str(
            r#"{"type":"response","id":"req-1","ok":true,"payload":{"protocol":3}}"#,
        )
        .unwrap();
        let ServerFrame::Response(resp) = frame else {
            panic!("expected response");
        };
        assert!(resp.ok);
        assert_eq!(resp.payload.unwrap()["protocol"], 3);
        assert!(resp.error.is_none());
    }

    #[test]
    fn response_frame_parses_error() {
        let frame: ServerFrame = serde_json::from_str(
            r#"{"type":"response","id":"req-2","ok":false,"error":{"code":"DENIED","message":"no"}}"#,
        )
        .unwrap();
        let ServerFrame::Response(resp) = frame else {
            panic!("expected response");
        };
        assert!(!resp.ok);
        assert_eq!(resp.error_code(), Some("DENIED"));
    }

    #[test]
    fn unknown_frame_type_is_parse_error() {
        let result = serde_json::from_str::<ServerFrame>(r#"{"type":"mystery"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn client_frame_serializes_with_type_tag() {
        let frame = ClientFrame::request(
            RequestId::from("req-1"),
            "chat.send",
            &json!({"sessionKey": "main"}),
        )
        .unwrap();
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "request");
        assert_eq!(json["method"], "chat.send");
        assert_eq!(json["params"]["sessionKey"], "main");
    }

    #[test]
    fn bare_frame_omits_params() {
        let frame = ClientFrame::bare(RequestId::from("req-2"), "chat.abort");
        let json = serde_json::to_value(&frame).unwrap();
        assert!(json.get("params").is_none());
    }

    #[test]
    fn frame_roundtrip() {
        let frame = ClientFrame::bare(RequestId::from("req-3"), "chat.history");
        let text = serde_json::to_string(&frame).unwrap();
        let back: ClientFrame = serde_json::from_str(&text).unwrap();
        assert_eq!(back, frame);
    }
}
