//! Transcript message types.
//!
//! A [`ChatMessage`] is one entry in a conversation transcript. While a run
//! is streaming, the message for that run is owned and mutated by the
//! assembler; once the run reaches a terminal state the transcript is
//! read-mostly until the next canonical history merge replaces it.

use serde::{Deserialize, Serialize};

use crate::content::ContentPart;
use crate::ids::MessageId;

/// Message author role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    /// End-user input.
    User,
    /// Agent output.
    Assistant,
    /// Client- or server-synthesized notice (e.g. a run error).
    System,
    /// Tool execution output echoed into the transcript.
    ToolResult,
}

/// Reasons why the model stopped generating.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of response.
    EndTurn,
    /// Model wants to use a tool; the run continues.
    ToolUse,
    /// Hit the max output token limit.
    MaxTokens,
    /// Hit a stop sequence.
    StopSequence,
    /// Model refused to answer (safety).
    Refusal,
    /// The run was aborted.
    Aborted,
}

impl StopReason {
    /// Returns `true` if this stop reason ends the run.
    ///
    /// `tool_use` does not: the assistant has paused to execute a tool and
    /// the run is still in flight from the transcript's point of view.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::ToolUse)
    }
}

/// Message content — either a plain string or ordered content parts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Simple text.
    Text(String),
    /// Structured content parts in emission order.
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Concatenated visible text of this content.
    #[must_use]
    pub fn visible_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(ContentPart::as_text)
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    /// Returns the content parts, or an empty slice for plain text.
    #[must_use]
    pub fn parts(&self) -> &[ContentPart] {
        match self {
            Self::Text(_) => &[],
            Self::Parts(parts) => parts,
        }
    }
}

/// One transcript entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Stable ID within a client session. Streamed assistant messages use
    /// their run ID so deltas can find them by identity.
    pub id: MessageId,
    /// Author role.
    pub role: Role,
    /// Message content.
    pub content: MessageContent,
    /// Creation time, epoch milliseconds.
    pub timestamp: i64,
    /// Legacy single-blob reasoning, for transcripts predating thinking parts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Why generation stopped, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    /// Marks a synthesized error notice.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    /// Wall-clock duration of the run that produced this message, ms.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_duration_ms: Option<u64>,
    /// Time spent in reasoning segments, ms.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_duration_ms: Option<u64>,
}

impl ChatMessage {
    /// Create a user message from plain text.
    #[must_use]
    pub fn user(id: MessageId, text: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id,
            role: Role::User,
            content: MessageContent::Text(text.into()),
            timestamp,
            reasoning: None,
            stop_reason: None,
            is_error: None,
            run_duration_ms: None,
            thinking_duration_ms: None,
        }
    }

    /// Create an empty assistant message ready for streamed parts.
    #[must_use]
    pub fn assistant_shell(id: MessageId, timestamp: i64) -> Self {
        Self {
            id,
            role: Role::Assistant,
            content: MessageContent::Parts(Vec::new()),
            timestamp,
            reasoning: None,
            stop_reason: None,
            is_error: None,
            run_duration_ms: None,
            thinking_duration_ms: None,
        }
    }

    /// Create a system-role error notice.
    #[must_use]
    pub fn system_error(id: MessageId, text: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id,
            role: Role::System,
            content: MessageContent::Text(text.into()),
            timestamp,
            reasoning: None,
            stop_reason: None,
            is_error: Some(true),
            run_duration_ms: None,
            thinking_duration_ms: None,
        }
    }

    /// Returns `true` if this is a user message.
    #[must_use]
    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    /// Returns `true` if this is an assistant message.
    #[must_use]
    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }

    /// Mutable access to the content part list, promoting plain text to a
    /// single text part first if needed.
    pub fn parts_mut(&mut self) -> &mut Vec<ContentPart> {
        if let MessageContent::Text(text) = &self.content {
            let existing = if text.is_empty() {
                Vec::new()
            } else {
                vec![ContentPart::text(text.clone())]
            };
            self.content = MessageContent::Parts(existing);
        }
        match &mut self.content {
            MessageContent::Parts(parts) => parts,
            MessageContent::Text(_) => unreachable!("content promoted above"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
