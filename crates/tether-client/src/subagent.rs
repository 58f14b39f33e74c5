//! Sub-agent session registry.
//!
//! Events whose conversation key differs from the main one land here.
//! Instead of a full transcript, each sub-agent session keeps a compact
//! activity log: consecutive text/reasoning fragments coalesce into one
//! entry when they arrive within a short gap window, and tool phases
//! push/mutate entries the same way the assembler treats content parts.
//!
//! Linking a session back to the spawn tool call that created it is
//! best-effort FIFO: spawn tool calls register in observation order, and
//! the first lifecycle-start from an unlinked key claims the oldest
//! pending spawn. An explicit link (from a spawn result that names its
//! child key) always wins over the heuristic.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use tether_core::messages::{ChatMessage, StopReason};
use tether_core::{ContentPart, SessionKey, ToolCallId, ToolStatus};
use tether_protocol::{AgentStream, LifecyclePhase, ToolPhase};

/// Sub-agent session status. Monotonic, except that `Error` may be set at
/// any time and is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubagentStatus {
    /// Producing events.
    Active,
    /// Finished normally.
    Done,
    /// Failed.
    Error,
}

/// One entry in a sub-agent activity log.
#[derive(Clone, Debug, PartialEq)]
pub enum SubagentEntry {
    /// Coalesced visible text.
    Text {
        /// Accumulated text.
        text: String,
        /// Last update, epoch ms (drives coalescing).
        updated_at_ms: i64,
    },
    /// Coalesced reasoning text.
    Reasoning {
        /// Accumulated reasoning.
        text: String,
        /// Last update, epoch ms (drives coalescing).
        updated_at_ms: i64,
    },
    /// One tool call.
    Tool {
        /// Tool name.
        name: String,
        /// Tool call id, when known.
        tool_call_id: Option<String>,
        /// Status, transitioning exactly like a content part's.
        status: ToolStatus,
        /// Result content.
        result: Option<String>,
    },
}

/// Activity log for one sub-agent conversation key.
#[derive(Clone, Debug, PartialEq)]
pub struct SubagentSession {
    /// Ordered activity entries.
    pub entries: Vec<SubagentEntry>,
    /// Session status.
    pub status: SubagentStatus,
}

impl SubagentSession {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            status: SubagentStatus::Active,
        }
    }
}

/// Store of all sub-agent sessions for the current main run.
#[derive(Debug, Default)]
pub struct SubagentRegistry {
    sessions: HashMap<SessionKey, SubagentSession>,
    links: HashMap<ToolCallId, SessionKey>,
    pending_spawns: VecDeque<ToolCallId>,
    version: u64,
    coalesce_gap_ms: i64,
}

impl SubagentRegistry {
    /// Create a registry with the given coalesce gap window.
    #[must_use]
    pub fn new(coalesce_gap_ms: i64) -> Self {
        Self {
            coalesce_gap_ms,
            ..Self::default()
        }
    }

    /// Monotonic counter incremented on every mutation, so a polling
    /// observer can detect changes without deep comparison.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    fn bump(&mut self) {
        self.version += 1;
    }

    /// Record a spawn tool call observed starting in the main transcript.
    ///
    /// The id joins a FIFO queue of spawns awaiting their child sessions.
    pub fn register_spawn(&mut self, tool_call_id: ToolCallId) {
        self.pending_spawns.push_back(tool_call_id);
        self.bump();
    }

    /// Install an explicit link from a spawn result that names its child.
    ///
    /// Removes the id from the pending queue so the FIFO heuristic cannot
    /// hand its slot to a different key later.
    pub fn link(&mut self, tool_call_id: ToolCallId, key: SessionKey) {
        self.pending_spawns.retain(|id| *id != tool_call_id);
        let _ = self.links.insert(tool_call_id, key);
        self.bump();
    }

    /// Whether `key` is already linked to some spawn tool call.
    #[must_use]
    pub fn is_linked(&self, key: &SessionKey) -> bool {
        self.links.values().any(|k| k == key)
    }

    /// Ingest one agent event for a non-main conversation key.
    pub fn ingest_event(&mut self, key: &SessionKey, stream: &AgentStream, now_ms: i64) {
        match stream {
            AgentStream::Lifecycle(data) => match data.phase {
                LifecyclePhase::Start => {
                    self.ensure_session(key);
                    self.auto_link(key);
                }
                LifecyclePhase::End => self.set_status(key, SubagentStatus::Done),
                LifecyclePhase::Error => self.set_status(key, SubagentStatus::Error),
            },
            AgentStream::Content { delta } => self.coalesce_text(key, delta, now_ms),
            AgentStream::Reasoning { delta } => self.coalesce_reasoning(key, delta, now_ms),
            AgentStream::Tool(data) => match data.phase {
                ToolPhase::Start => {
                    let session = self.ensure_session(key);
                    session.entries.push(SubagentEntry::Tool {
                        name: data.name.clone(),
                        tool_call_id: data
                            .tool_call_id
                            .as_ref()
                            .map(|id| id.as_str().to_owned()),
                        status: ToolStatus::Running,
                        result: None,
                    });
                    self.bump();
                }
                ToolPhase::Result => self.resolve_tool(key, data),
            },
            AgentStream::Error { .. } => self.set_status(key, SubagentStatus::Error),
            AgentStream::Assistant { .. } | AgentStream::Unknown => {}
        }
    }

    /// Import history for a session discovered retroactively.
    ///
    /// Only populates an empty session, so re-fetching the same history is
    /// idempotent. Status derives from whether any message carries a
    /// terminal stop reason.
    pub fn load_from_history(&mut self, key: &SessionKey, messages: &[ChatMessage]) {
        let session = self.ensure_session(key);
        if !session.entries.is_empty() {
            debug!(key = %key, "sub-agent session already populated, skipping import");
            return;
        }

        let mut entries = Vec::new();
        let mut done = false;
        for msg in messages {
            if !msg.is_assistant() {
                continue;
            }
            if msg.stop_reason.is_some_and(StopReason::is_terminal) {
                done = true;
            }
            if let Some(reasoning) = &msg.reasoning {
                entries.push(SubagentEntry::Reasoning {
                    text: reasoning.clone(),
                    updated_at_ms: msg.timestamp,
                });
            }
            match &msg.content {
                tether_core::MessageContent::Text(text) if !text.is_empty() => {
                    entries.push(SubagentEntry::Text {
                        text: text.clone(),
                        updated_at_ms: msg.timestamp,
                    });
                }
                tether_core::MessageContent::Text(_) => {}
                tether_core::MessageContent::Parts(parts) => {
                    for part in parts {
                        match part {
                            ContentPart::Text { text } => entries.push(SubagentEntry::Text {
                                text: text.clone(),
                                updated_at_ms: msg.timestamp,
                            }),
                            ContentPart::Thinking { thinking } => {
                                entries.push(SubagentEntry::Reasoning {
                                    text: thinking.clone(),
                                    updated_at_ms: msg.timestamp,
                                });
                            }
                            ContentPart::ToolCall {
                                name,
                                tool_call_id,
                                status,
                                result,
                                ..
                            } => entries.push(SubagentEntry::Tool {
                                name: name.clone(),
                                tool_call_id: tool_call_id.clone(),
                                status: *status,
                                result: result.clone(),
                            }),
                            ContentPart::Image { .. } => {}
                        }
                    }
                }
            }
        }

        session.entries = entries;
        if done {
            session.status = SubagentStatus::Done;
        }
        self.bump();
    }

    /// Activity entries for the session spawned by `tool_call_id`.
    #[must_use]
    pub fn entries_for_tool_call(&self, tool_call_id: &ToolCallId) -> Option<&[SubagentEntry]> {
        let key = self.links.get(tool_call_id)?;
        self.sessions.get(key).map(|s| s.entries.as_slice())
    }

    /// The session for a conversation key.
    #[must_use]
    pub fn session(&self, key: &SessionKey) -> Option<&SubagentSession> {
        self.sessions.get(key)
    }

    /// The conversation key linked to a spawn tool call.
    #[must_use]
    pub fn key_for_tool_call(&self, tool_call_id: &ToolCallId) -> Option<&SessionKey> {
        self.links.get(tool_call_id)
    }

    /// Drop everything. Called when the main run reaches any terminal
    /// state — sub-agent data does not persist across turns.
    pub fn clear(&mut self) {
        self.sessions.clear();
        self.links.clear();
        self.pending_spawns.clear();
        self.bump();
    }

    fn ensure_session(&mut self, key: &SessionKey) -> &mut SubagentSession {
        self.sessions
            .entry(key.clone())
            .or_insert_with(SubagentSession::new)
    }

    /// Bind the oldest pending spawn to `key`, unless already linked.
    fn auto_link(&mut self, key: &SessionKey) {
        if self.is_linked(key) {
            return;
        }
        if let Some(spawn_id) = self.pending_spawns.pop_front() {
            debug!(key = %key, spawn = %spawn_id, "auto-linked sub-agent session");
            let _ = self.links.insert(spawn_id, key.clone());
            self.bump();
        }
    }

    fn set_status(&mut self, key: &SessionKey, status: SubagentStatus) {
        let session = self.ensure_session(key);
        // Error is terminal; Done never downgrades an Error.
        if session.status != SubagentStatus::Error {
            session.status = status;
            self.bump();
        }
    }

    fn coalesce_text(&mut self, key: &SessionKey, delta: &str, now_ms: i64) {
        let gap = self.coalesce_gap_ms;
        let session = self.ensure_session(key);
        match session.entries.last_mut() {
            Some(SubagentEntry::Text {
                text,
                updated_at_ms,
            }) if now_ms - *updated_at_ms <= gap => {
                text.push_str(delta);
                *updated_at_ms = now_ms;
            }
            _ => session.entries.push(SubagentEntry::Text {
                text: delta.to_owned(),
                updated_at_ms: now_ms,
            }),
        }
        self.bump();
    }

    fn coalesce_reasoning(&mut self, key: &SessionKey, delta: &str, now_ms: i64) {
        let gap = self.coalesce_gap_ms;
        let session = self.ensure_session(key);
        match session.entries.last_mut() {
            Some(SubagentEntry::Reasoning {
                text,
                updated_at_ms,
            }) if now_ms - *updated_at_ms <= gap => {
                text.push_str(delta);
                *updated_at_ms = now_ms;
            }
            _ => session.entries.push(SubagentEntry::Reasoning {
                text: delta.to_owned(),
                updated_at_ms: now_ms,
            }),
        }
        self.bump();
    }

    fn resolve_tool(&mut self, key: &SessionKey, data: &tether_protocol::ToolData) {
        let status = if data.is_error == Some(true) {
            ToolStatus::Error
        } else {
            ToolStatus::Success
        };
        let session = self.ensure_session(key);
        let target = match &data.tool_call_id {
            Some(wanted) => session.entries.iter_mut().rev().find(|e| {
                matches!(
                    e,
                    SubagentEntry::Tool { tool_call_id: Some(id), status, .. }
                        if id == wanted.as_str() && !status.is_terminal()
                )
            }),
            None => session.entries.iter_mut().rev().find(|e| {
                matches!(
                    e,
                    SubagentEntry::Tool { name, result: None, status, .. }
                        if *name == data.name && !status.is_terminal()
                )
            }),
        };
        if let Some(SubagentEntry::Tool {
            status: entry_status,
            result,
            ..
        }) = target
        {
            *entry_status = status;
            *result = data.result.clone();
            self.bump();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::messages::StopReason;
    use tether_core::MessageId;
    use tether_protocol::{LifecycleData, ToolData};

    const GAP: i64 = 2_000;

    fn registry() -> SubagentRegistry {
        SubagentRegistry::new(GAP)
    }

    fn key(s: &str) -> SessionKey {
        SessionKey::from(s)
    }

    fn lifecycle(phase: LifecyclePhase) -> AgentStream {
        AgentStream::Lifecycle(LifecycleData {
            phase,
            error_message: None,
        })
    }

    fn content(delta: &str) -> AgentStream {
        AgentStream::Content {
            delta: delta.into(),
        }
    }

    fn reasoning(delta: &str) -> AgentStream {
        AgentStream::Reasoning {
            delta: delta.into(),
        }
    }

    fn tool_start(name: &str, id: Option<&str>) -> AgentStream {
        AgentStream::Tool(ToolData {
            phase: ToolPhase::Start,
            name: name.into(),
            tool_call_id: id.map(ToolCallId::from),
            arguments: None,
            result: None,
            is_error: None,
        })
    }

    fn tool_result(name: &str, id: Option<&str>, result: &str, is_error: bool) -> AgentStream {
        AgentStream::Tool(ToolData {
            phase: ToolPhase::Result,
            name: name.into(),
            tool_call_id: id.map(ToolCallId::from),
            arguments: None,
            result: Some(result.into()),
            is_error: Some(is_error),
        })
    }

    #[test]
    fn lifecycle_start_creates_session() {
        let mut reg = registry();
        reg.ingest_event(&key("sub-1"), &lifecycle(LifecyclePhase::Start), 0);
        let session = reg.session(&key("sub-1")).unwrap();
        assert_eq!(session.status, SubagentStatus::Active);
        assert!(session.entries.is_empty());
    }

    #[test]
    fn auto_link_is_fifo() {
        let mut reg = registry();
        reg.register_spawn(ToolCallId::from("A"));
        reg.register_spawn(ToolCallId::from("B"));
        reg.register_spawn(ToolCallId::from("C"));

        reg.ingest_event(&key("X"), &lifecycle(LifecyclePhase::Start), 0);
        reg.ingest_event(&key("Y"), &lifecycle(LifecyclePhase::Start), 0);
        reg.ingest_event(&key("Z"), &lifecycle(LifecyclePhase::Start), 0);

        assert_eq!(reg.key_for_tool_call(&ToolCallId::from("A")), Some(&key("X")));
        assert_eq!(reg.key_for_tool_call(&ToolCallId::from("B")), Some(&key("Y")));
        assert_eq!(reg.key_for_tool_call(&ToolCallId::from("C")), Some(&key("Z")));
    }

    #[test]
    fn repeated_lifecycle_start_links_once() {
        let mut reg = registry();
        reg.register_spawn(ToolCallId::from("A"));
        reg.register_spawn(ToolCallId::from("B"));

        reg.ingest_event(&key("X"), &lifecycle(LifecyclePhase::Start), 0);
        // A sub-agent runs multiple turns; its later starts must not eat B.
        reg.ingest_event(&key("X"), &lifecycle(LifecyclePhase::Start), 10);

        assert_eq!(reg.key_for_tool_call(&ToolCallId::from("A")), Some(&key("X")));
        assert!(reg.key_for_tool_call(&ToolCallId::from("B")).is_none());
    }

    #[test]
    fn explicit_link_beats_fifo() {
        let mut reg = registry();
        reg.register_spawn(ToolCallId::from("A"));
        reg.register_spawn(ToolCallId::from("B"));

        // The spawn result for B named its child before any event arrived.
        reg.link(ToolCallId::from("B"), key("Y"));
        reg.ingest_event(&key("Y"), &lifecycle(LifecyclePhase::Start), 0);
        reg.ingest_event(&key("X"), &lifecycle(LifecyclePhase::Start), 0);

        assert_eq!(reg.key_for_tool_call(&ToolCallId::from("B")), Some(&key("Y")));
        assert_eq!(reg.key_for_tool_call(&ToolCallId::from("A")), Some(&key("X")));
    }

    #[test]
    fn text_coalesces_within_gap() {
        let mut reg = registry();
        reg.ingest_event(&key("s"), &content("Hel"), 1_000);
        reg.ingest_event(&key("s"), &content("lo"), 1_500);
        let session = reg.session(&key("s")).unwrap();
        assert_eq!(session.entries.len(), 1);
        assert_eq!(
            session.entries[0],
            SubagentEntry::Text {
                text: "Hello".into(),
                updated_at_ms: 1_500,
            }
        );
    }

    #[test]
    fn text_beyond_gap_starts_new_entry() {
        let mut reg = registry();
        reg.ingest_event(&key("s"), &content("first"), 1_000);
        reg.ingest_event(&key("s"), &content("second"), 1_000 + GAP + 1);
        assert_eq!(reg.session(&key("s")).unwrap().entries.len(), 2);
    }

    #[test]
    fn gap_measures_from_last_update() {
        let mut reg = registry();
        reg.ingest_event(&key("s"), &content("a"), 0);
        reg.ingest_event(&key("s"), &content("b"), 1_900);
        reg.ingest_event(&key("s"), &content("c"), 3_500);
        // Each fragment landed within GAP of the previous update.
        assert_eq!(reg.session(&key("s")).unwrap().entries.len(), 1);
    }

    #[test]
    fn reasoning_does_not_coalesce_into_text() {
        let mut reg = registry();
        reg.ingest_event(&key("s"), &content("visible"), 0);
        reg.ingest_event(&key("s"), &reasoning("hidden"), 100);
        let session = reg.session(&key("s")).unwrap();
        assert_eq!(session.entries.len(), 2);
        assert!(matches!(session.entries[1], SubagentEntry::Reasoning { .. }));
    }

    #[test]
    fn tool_entry_breaks_coalescing() {
        let mut reg = registry();
        reg.ingest_event(&key("s"), &content("before"), 0);
        reg.ingest_event(&key("s"), &tool_start("grep", None), 50);
        reg.ingest_event(&key("s"), &content("after"), 100);
        let session = reg.session(&key("s")).unwrap();
        assert_eq!(session.entries.len(), 3);
    }

    #[test]
    fn tool_result_mutates_entry() {
        let mut reg = registry();
        reg.ingest_event(&key("s"), &tool_start("grep", Some("tc-1")), 0);
        reg.ingest_event(&key("s"), &tool_result("grep", Some("tc-1"), "3 matches", false), 10);
        let session = reg.session(&key("s")).unwrap();
        assert_eq!(session.entries.len(), 1);
        let SubagentEntry::Tool { status, result, .. } = &session.entries[0] else {
            panic!("expected tool entry");
        };
        assert_eq!(*status, ToolStatus::Success);
        assert_eq!(result.as_deref(), Some("3 matches"));
    }

    #[test]
    fn tool_status_is_monotonic() {
        let mut reg = registry();
        reg.ingest_event(&key("s"), &tool_start("grep", Some("tc-1")), 0);
        reg.ingest_event(&key("s"), &tool_result("grep", Some("tc-1"), "ok", false), 10);
        reg.ingest_event(&key("s"), &tool_result("grep", Some("tc-1"), "late", true), 20);
        let SubagentEntry::Tool { status, result, .. } =
            &reg.session(&key("s")).unwrap().entries[0]
        else {
            panic!("expected tool entry");
        };
        assert_eq!(*status, ToolStatus::Success);
        assert_eq!(result.as_deref(), Some("ok"));
    }

    #[test]
    fn lifecycle_end_marks_done() {
        let mut reg = registry();
        reg.ingest_event(&key("s"), &lifecycle(LifecyclePhase::Start), 0);
        reg.ingest_event(&key("s"), &lifecycle(LifecyclePhase::End), 10);
        assert_eq!(reg.session(&key("s")).unwrap().status, SubagentStatus::Done);
    }

    #[test]
    fn error_is_terminal() {
        let mut reg = registry();
        reg.ingest_event(&key("s"), &lifecycle(LifecyclePhase::Error), 0);
        reg.ingest_event(&key("s"), &lifecycle(LifecyclePhase::End), 10);
        assert_eq!(reg.session(&key("s")).unwrap().status, SubagentStatus::Error);
    }

    #[test]
    fn error_stream_sets_error_status() {
        let mut reg = registry();
        reg.ingest_event(
            &key("s"),
            &AgentStream::Error {
                message: "boom".into(),
            },
            0,
        );
        assert_eq!(reg.session(&key("s")).unwrap().status, SubagentStatus::Error);
    }

    #[test]
    fn entries_for_tool_call_reads_linked_session() {
        let mut reg = registry();
        reg.register_spawn(ToolCallId::from("A"));
        reg.ingest_event(&key("X"), &lifecycle(LifecyclePhase::Start), 0);
        reg.ingest_event(&key("X"), &content("working"), 10);
        let entries = reg.entries_for_tool_call(&ToolCallId::from("A")).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(reg.entries_for_tool_call(&ToolCallId::from("B")).is_none());
    }

    #[test]
    fn load_from_history_populates_empty_session() {
        let mut reg = registry();
        let mut msg = ChatMessage::assistant_shell(MessageId::from("m1"), 100);
        msg.parts_mut().push(ContentPart::thinking("planning"));
        msg.parts_mut().push(ContentPart::text("found it"));
        msg.stop_reason = Some(StopReason::EndTurn);

        reg.load_from_history(&key("X"), &[msg]);
        let session = reg.session(&key("X")).unwrap();
        assert_eq!(session.entries.len(), 2);
        assert_eq!(session.status, SubagentStatus::Done);
    }

    #[test]
    fn load_from_history_is_idempotent() {
        let mut reg = registry();
        let mut msg = ChatMessage::assistant_shell(MessageId::from("m1"), 100);
        msg.parts_mut().push(ContentPart::text("once"));
        reg.load_from_history(&key("X"), std::slice::from_ref(&msg));
        reg.load_from_history(&key("X"), &[msg]);
        assert_eq!(reg.session(&key("X")).unwrap().entries.len(), 1);
    }

    #[test]
    fn load_from_history_never_clobbers_live_session() {
        let mut reg = registry();
        reg.ingest_event(&key("X"), &content("live"), 0);
        let msg = ChatMessage::assistant_shell(MessageId::from("m1"), 100);
        reg.load_from_history(&key("X"), &[msg]);
        let session = reg.session(&key("X")).unwrap();
        assert_eq!(session.entries.len(), 1);
        assert!(matches!(&session.entries[0], SubagentEntry::Text { text, .. } if text == "live"));
    }

    #[test]
    fn load_from_history_without_terminal_stop_is_active() {
        let mut reg = registry();
        let mut msg = ChatMessage::assistant_shell(MessageId::from("m1"), 100);
        msg.parts_mut().push(ContentPart::text("..."));
        msg.stop_reason = Some(StopReason::ToolUse);
        reg.load_from_history(&key("X"), &[msg]);
        assert_eq!(reg.session(&key("X")).unwrap().status, SubagentStatus::Active);
    }

    #[test]
    fn clear_drops_everything() {
        let mut reg = registry();
        reg.register_spawn(ToolCallId::from("A"));
        reg.ingest_event(&key("X"), &lifecycle(LifecyclePhase::Start), 0);
        reg.clear();
        assert!(reg.session(&key("X")).is_none());
        assert!(reg.key_for_tool_call(&ToolCallId::from("A")).is_none());

        // A fresh start event after clear finds no pending spawn to claim.
        reg.ingest_event(&key("Y"), &lifecycle(LifecyclePhase::Start), 0);
        assert!(!reg.is_linked(&key("Y")));
    }

    #[test]
    fn version_increments_on_mutation() {
        let mut reg = registry();
        let v0 = reg.version();
        reg.register_spawn(ToolCallId::from("A"));
        let v1 = reg.version();
        assert!(v1 > v0);
        reg.ingest_event(&key("X"), &content("x"), 0);
        assert!(reg.version() > v1);
    }

    #[test]
    fn unknown_and_assistant_streams_are_ignored() {
        let mut reg = registry();
        let v0 = reg.version();
        reg.ingest_event(&key("X"), &AgentStream::Unknown, 0);
        reg.ingest_event(
            &key("X"),
            &AgentStream::Assistant {
                message: serde_json::json!({}),
            },
            0,
        );
        assert_eq!(reg.version(), v0);
        assert!(reg.session(&key("X")).is_none());
    }
}
