//! Chat and agent stream event payloads.
//!
//! Two event families cover one run:
//!
//! - [`ChatEvent`] — coarse run lifecycle (`delta`/`final`/`aborted`/`error`),
//!   optionally carrying a full message snapshot.
//! - [`AgentEvent`] — fine-grained stream fragments (content, reasoning,
//!   tool phases, lifecycle phases), ordered per conversation key by `seq`.
//!
//! Both carry the conversation key used by the router to demultiplex the
//! main session from sub-agent sessions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tether_core::{RunId, SessionKey, ToolCallId};

use crate::history::WireMessage;

/// Coarse run state reported by `chat` events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatState {
    /// Incremental update; the run is streaming.
    Delta,
    /// The run completed normally.
    Final,
    /// The run was aborted.
    Aborted,
    /// The run failed.
    Error,
}

impl ChatState {
    /// Returns `true` for states that end the run.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Delta)
    }
}

/// Coarse chat lifecycle event for one run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    /// Run this event belongs to.
    pub run_id: RunId,
    /// Conversation key this event belongs to.
    pub session_key: SessionKey,
    /// Run state carried by this event.
    pub state: ChatState,
    /// Optional message snapshot (e.g. the empty assistant shell on the
    /// first delta).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<WireMessage>,
    /// Server-supplied error text for `state: error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Lifecycle phase carried by `stream: lifecycle` events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecyclePhase {
    /// The run (or a sub-agent session's run) started producing output.
    Start,
    /// The run ended.
    End,
    /// The run failed.
    Error,
}

/// Data for `stream: lifecycle` events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleData {
    /// Which phase this event marks.
    pub phase: LifecyclePhase,
    /// Error text for `phase: error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Tool phase carried by `stream: tool` events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolPhase {
    /// The tool call started executing.
    Start,
    /// The tool call finished and carries a result.
    Result,
}

/// Data for `stream: tool` events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolData {
    /// Which phase this event marks.
    pub phase: ToolPhase,
    /// Tool name.
    pub name: String,
    /// Tool call id, when the gateway assigns one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<ToolCallId>,
    /// Arguments as an opaque provider-defined string (`phase: start`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    /// Result content (`phase: result`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Whether the tool execution errored (`phase: result`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

/// Stream discriminator + data for agent events.
///
/// Adjacently tagged: the wire carries `"stream": "<kind>"` and the
/// kind-specific fields under `"data"`. Unknown stream kinds parse into
/// [`AgentStream::Unknown`] so a newer gateway never kills the dispatch
/// loop; the router skips them with a warning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stream", content = "data", rename_all = "lowercase")]
pub enum AgentStream {
    /// Run lifecycle phase marker.
    Lifecycle(LifecycleData),
    /// Visible text fragment.
    Content {
        /// Text fragment.
        delta: String,
    },
    /// Reasoning text fragment.
    Reasoning {
        /// Reasoning fragment.
        delta: String,
    },
    /// Tool call phase.
    Tool(ToolData),
    /// Full assistant message snapshot.
    Assistant {
        /// Raw message payload.
        message: Value,
    },
    /// Stream-level error.
    Error {
        /// Error text.
        message: String,
    },
    /// A stream kind this client version does not know.
    #[serde(other)]
    Unknown,
}

/// Fine-grained agent stream event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEvent {
    /// Run this event belongs to.
    pub run_id: RunId,
    /// Conversation key this event belongs to.
    pub session_key: SessionKey,
    /// Stream kind and payload.
    #[serde(flatten)]
    pub stream: AgentStream,
    /// Per-key sequence number assigned by the gateway.
    pub seq: u64,
    /// Server timestamp, epoch milliseconds.
    pub ts: i64,
}

impl AgentEvent {
    /// Returns `true` if this event means the run is actively producing
    /// output (used to feed the silence watchdog).
    #[must_use]
    pub fn is_meaningful(&self) -> bool {
        !matches!(self.stream, AgentStream::Unknown)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
