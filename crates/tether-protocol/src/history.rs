//! Chat request parameters and canonical history payloads.
//!
//! History fetches return raw [`WireMessage`]s. Conversion into the typed
//! transcript model is lenient: a malformed message or content part is
//! skipped with a warning rather than failing the whole fetch, since any
//! loss is recovered by the next canonical merge.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use tether_core::messages::{ChatMessage, MessageContent, Role, StopReason};
use tether_core::{ContentPart, MessageId, SessionKey};

/// Parameters of `chat.send`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSendParams {
    /// Conversation to send into.
    pub session_key: SessionKey,
    /// User message text.
    pub message: String,
    /// Client-generated key letting the gateway deduplicate resends.
    pub idempotency_key: String,
}

/// Parameters of `chat.history`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistoryParams {
    /// Conversation to fetch.
    pub session_key: SessionKey,
}

/// Parameters of `chat.abort`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatAbortParams {
    /// Conversation whose active run should be aborted.
    pub session_key: SessionKey,
}

/// Payload of a `chat.history` response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryPayload {
    /// Canonical transcript, oldest first.
    pub messages: Vec<WireMessage>,
}

/// A raw transcript message as the gateway stores it.
///
/// Field shapes are looser than [`ChatMessage`]: `content` may be a plain
/// string or a block array, IDs and timestamps may be missing on old
/// transcripts.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    /// Message id, when the gateway assigned one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Role string (`user`, `assistant`, `system`, `toolResult`).
    pub role: String,
    /// Plain string or content-block array.
    #[serde(default)]
    pub content: Value,
    /// Epoch milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Legacy single-blob reasoning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Stop reason, when the run that produced this message ended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    /// Error flag for synthesized notices.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl WireMessage {
    /// Convert into the typed transcript model.
    ///
    /// Returns `None` for messages with an unknown role. Malformed content
    /// blocks inside an otherwise-valid message are skipped individually.
    #[must_use]
    pub fn into_message(self) -> Option<ChatMessage> {
        let role = match self.role.as_str() {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            "system" => Role::System,
            "toolResult" => Role::ToolResult,
            other => {
                warn!(role = other, "skipping history message with unknown role");
                return None;
            }
        };

        let content = match self.content {
            Value::String(text) => MessageContent::Text(text),
            Value::Array(blocks) => {
                let mut parts = Vec::with_capacity(blocks.len());
                for block in blocks {
                    match serde_json::from_value::<ContentPart>(block) {
                        Ok(part) => parts.push(part),
                        Err(e) => warn!(error = %e, "skipping malformed content block"),
                    }
                }
                MessageContent::Parts(parts)
            }
            Value::Null => MessageContent::Text(String::new()),
            other => {
                warn!(?other, "skipping history message with unusable content");
                return None;
            }
        };

        Some(ChatMessage {
            id: self.id.map_or_else(MessageId::new, MessageId::from_string),
            role,
            content,
            timestamp: self.timestamp.unwrap_or(0),
            reasoning: self.reasoning,
            stop_reason: self.stop_reason,
            is_error: self.is_error,
            run_duration_ms: None,
            thinking_duration_ms: None,
        })
    }
}

/// Convert a whole history payload, skipping unusable messages.
#[must_use]
pub fn messages_from_history(payload: HistoryPayload) -> Vec<ChatMessage> {
    payload
        .messages
        .into_iter()
        .filter_map(WireMessage::into_message)
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
