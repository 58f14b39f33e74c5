//! Content part types.
//!
//! A streamed assistant message is an ordered list of [`ContentPart`]s in
//! emission order: text, thinking, and tool calls interleave exactly as the
//! model produced them. The assembler relies on that ordering to decide
//! whether a delta extends the trailing segment or opens a new one.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a tool call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    /// The tool call has started and has no result yet.
    Running,
    /// The tool completed successfully.
    Success,
    /// The tool failed.
    Error,
}

impl ToolStatus {
    /// Returns `true` once the status can no longer change.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

/// One segment of an assistant message, in emission order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    /// Visible response text.
    #[serde(rename = "text")]
    Text {
        /// The text.
        text: String,
    },
    /// Extended reasoning text.
    #[serde(rename = "thinking")]
    Thinking {
        /// The thinking text.
        thinking: String,
    },
    /// A tool invocation and (eventually) its outcome.
    #[serde(rename = "tool_call", rename_all = "camelCase")]
    ToolCall {
        /// Tool name.
        name: String,
        /// Tool call ID, when the gateway supplies one.
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
        /// Arguments as an opaque provider-defined string.
        arguments: String,
        /// Current status.
        status: ToolStatus,
        /// Result content, set together with a terminal status.
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },
    /// Inline image attachment (base64-encoded).
    #[serde(rename = "image", rename_all = "camelCase")]
    Image {
        /// Base64-encoded image data.
        data: String,
        /// MIME type (e.g. `image/png`).
        mime_type: String,
    },
}

impl ContentPart {
    /// Create a text part.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create a thinking part.
    #[must_use]
    pub fn thinking(thinking: impl Into<String>) -> Self {
        Self::Thinking {
            thinking: thinking.into(),
        }
    }

    /// Create a running tool call part.
    #[must_use]
    pub fn tool_call(
        name: impl Into<String>,
        tool_call_id: Option<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self::ToolCall {
            name: name.into(),
            tool_call_id,
            arguments: arguments.into(),
            status: ToolStatus::Running,
            result: None,
        }
    }

    /// Returns `true` if this is a text part.
    #[must_use]
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text { .. })
    }

    /// Returns `true` if this is a thinking part.
    #[must_use]
    pub fn is_thinking(&self) -> bool {
        matches!(self, Self::Thinking { .. })
    }

    /// Returns `true` if this is a tool call part.
    #[must_use]
    pub fn is_tool_call(&self) -> bool {
        matches!(self, Self::ToolCall { .. })
    }

    /// Returns the text if this is a text part, `None` otherwise.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Resolve a running tool call in place.
    ///
    /// The transition is monotonic: a part whose status is already terminal
    /// is left untouched and `false` is returned. A tool call part is never
    /// re-created for the same tool call ID; the single transition here is
    /// the only mutation it ever sees.
    pub fn resolve_tool(&mut self, status: ToolStatus, tool_result: Option<String>) -> bool {
        let Self::ToolCall {
            status: current,
            result,
            ..
        } = self
        else {
            return false;
        };
        if current.is_terminal() || !status.is_terminal() {
            return false;
        }
        *current = status;
        *result = tool_result;
        true
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
