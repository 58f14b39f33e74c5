//! Transcript assembly from streamed delta fragments.
//!
//! The assembler owns the main conversation's ordered message list while a
//! run is streaming. Its one non-obvious job is the trailing-segment rule:
//! a text or thinking delta extends the last part of its own kind only if
//! that part sits *after* the last tool call; otherwise the delta opens a
//! new part. That is what lets a message render as
//! `[text, tool_call, text]` instead of all text collapsing into one blob
//! regardless of interleaved tool calls.

use tracing::{debug, warn};

use tether_core::constants::OPTIMISTIC_ID_PREFIX;
use tether_core::messages::{ChatMessage, MessageContent, StopReason};
use tether_core::{ContentPart, MessageId, RunId, ToolStatus};
use tether_protocol::ToolData;

/// Which kind of accumulating segment a delta belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SegmentKind {
    Text,
    Thinking,
}

/// Terminal attributes attached to an assembled message when its run ends.
#[derive(Clone, Copy, Debug, Default)]
pub struct RunOutcome {
    /// Stop reason to record, if any.
    pub stop_reason: Option<StopReason>,
    /// Wall-clock run duration, ms.
    pub run_duration_ms: Option<u64>,
    /// Total reasoning time, ms.
    pub thinking_duration_ms: Option<u64>,
}

/// Ordered transcript of the main conversation.
#[derive(Debug, Default)]
pub struct TranscriptAssembler {
    messages: Vec<ChatMessage>,
    version: u64,
}

impl TranscriptAssembler {
    /// Create an empty transcript.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only view of the transcript.
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Monotonic counter incremented on every mutation.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    fn bump(&mut self) {
        self.version += 1;
    }

    /// Append an optimistic user message, returning its client-generated id.
    ///
    /// The id prefix marks the message for reconciliation against the next
    /// canonical history fetch.
    pub fn push_user(&mut self, text: impl Into<String>, now_ms: i64) -> MessageId {
        let id = MessageId::from_string(format!(
            "{OPTIMISTIC_ID_PREFIX}{}",
            uuid::Uuid::now_v7()
        ));
        self.messages
            .push(ChatMessage::user(id.clone(), text, now_ms));
        self.bump();
        id
    }

    /// Append a system-role error notice.
    pub fn push_system_error(&mut self, text: impl Into<String>, now_ms: i64) {
        self.messages
            .push(ChatMessage::system_error(MessageId::new(), text, now_ms));
        self.bump();
    }

    /// Find the message being assembled for `run_id`, creating it lazily.
    fn ensure_message(&mut self, run_id: &RunId, now_ms: i64) -> &mut ChatMessage {
        let pos = self
            .messages
            .iter()
            .position(|m| m.id.as_str() == run_id.as_str());
        let idx = match pos {
            Some(idx) => idx,
            None => {
                debug!(run_id = %run_id, "creating assistant message for run");
                self.messages.push(ChatMessage::assistant_shell(
                    MessageId::from(run_id.as_str()),
                    now_ms,
                ));
                self.messages.len() - 1
            }
        };
        &mut self.messages[idx]
    }

    /// Adopt a server message snapshot for a run.
    ///
    /// Only fills an empty local message; streamed parts already applied
    /// locally always win over a coarse snapshot.
    pub fn apply_snapshot(&mut self, run_id: &RunId, snapshot: ChatMessage, now_ms: i64) {
        let msg = self.ensure_message(run_id, now_ms);
        let local_empty = match &msg.content {
            MessageContent::Text(text) => text.is_empty(),
            MessageContent::Parts(parts) => parts.is_empty(),
        };
        if local_empty {
            msg.content = snapshot.content;
            msg.reasoning = snapshot.reasoning;
        }
        self.bump();
    }

    /// Apply a tool `start` phase: always appends a new running part.
    pub fn apply_tool_start(&mut self, run_id: &RunId, data: &ToolData, now_ms: i64) {
        let msg = self.ensure_message(run_id, now_ms);
        msg.parts_mut().push(ContentPart::tool_call(
            data.name.clone(),
            data.tool_call_id.as_ref().map(|id| id.as_str().to_owned()),
            data.arguments.clone().unwrap_or_default(),
        ));
        self.bump();
    }

    /// Apply a tool `result` phase: mutates the matching part in place.
    ///
    /// The match is by tool call id when the event carries one, otherwise
    /// the most recent result-less part with the same name. A result that
    /// matches nothing is dropped — it belongs to a part this client never
    /// saw start, and history merge will repair the gap.
    pub fn apply_tool_result(&mut self, run_id: &RunId, data: &ToolData, now_ms: i64) {
        let status = if data.is_error == Some(true) {
            ToolStatus::Error
        } else {
            ToolStatus::Success
        };
        let msg = self.ensure_message(run_id, now_ms);
        let parts = msg.parts_mut();

        let target = match &data.tool_call_id {
            Some(wanted) => parts.iter_mut().rev().find(|p| {
                matches!(
                    p,
                    ContentPart::ToolCall { tool_call_id: Some(id), status, .. }
                        if id == wanted.as_str() && !status.is_terminal()
                )
            }),
            None => parts.iter_mut().rev().find(|p| {
                matches!(
                    p,
                    ContentPart::ToolCall { name, result: None, status, .. }
                        if *name == data.name && !status.is_terminal()
                )
            }),
        };

        match target {
            Some(part) => {
                let _ = part.resolve_tool(status, data.result.clone());
                self.bump();
            }
            None => warn!(name = data.name, "tool result matched no running call"),
        }
    }

    /// Apply a visible-text delta.
    pub fn apply_text_delta(&mut self, run_id: &RunId, delta: &str, now_ms: i64) {
        self.apply_delta(run_id, SegmentKind::Text, delta, now_ms);
    }

    /// Apply a reasoning delta.
    pub fn apply_thinking_delta(&mut self, run_id: &RunId, delta: &str, now_ms: i64) {
        self.apply_delta(run_id, SegmentKind::Thinking, delta, now_ms);
    }

    fn apply_delta(&mut self, run_id: &RunId, kind: SegmentKind, delta: &str, now_ms: i64) {
        let msg = self.ensure_message(run_id, now_ms);
        let parts = msg.parts_mut();

        let last_tool = parts.iter().rposition(ContentPart::is_tool_call);
        let last_same = parts.iter().rposition(|p| match kind {
            SegmentKind::Text => p.is_text(),
            SegmentKind::Thinking => p.is_thinking(),
        });

        // The trailing same-kind part is "open" only if nothing tool-shaped
        // landed after it.
        let open = match (last_same, last_tool) {
            (Some(same), Some(tool)) => (same > tool).then_some(same),
            (Some(same), None) => Some(same),
            (None, _) => None,
        };

        match open {
            Some(idx) => match &mut parts[idx] {
                ContentPart::Text { text } => text.push_str(delta),
                ContentPart::Thinking { thinking } => thinking.push_str(delta),
                _ => unreachable!("index found by kind predicate"),
            },
            None => {
                let part = match kind {
                    SegmentKind::Text => ContentPart::text(delta),
                    SegmentKind::Thinking => ContentPart::thinking(delta),
                };
                parts.push(part);
            }
        }
        self.bump();
    }

    /// Attach terminal run attributes to the assembled message, if one was
    /// ever created for this run.
    pub fn attach_outcome(&mut self, run_id: &RunId, outcome: RunOutcome) {
        if let Some(msg) = self
            .messages
            .iter_mut()
            .find(|m| m.id.as_str() == run_id.as_str())
        {
            if outcome.stop_reason.is_some() {
                msg.stop_reason = outcome.stop_reason;
            }
            msg.run_duration_ms = outcome.run_duration_ms.or(msg.run_duration_ms);
            msg.thinking_duration_ms = outcome.thinking_duration_ms.or(msg.thinking_duration_ms);
            self.bump();
        }
    }

    /// Replace the transcript with canonical history.
    ///
    /// Optimistic user messages (client id prefix) not matched by text
    /// equality against any canonical user message are retained after the
    /// canonical set; the result is re-sorted by timestamp (stable, so
    /// canonical order is preserved among equal timestamps).
    pub fn merge_canonical(&mut self, canonical: Vec<ChatMessage>) {
        let retained: Vec<ChatMessage> = self
            .messages
            .drain(..)
            .filter(|m| {
                m.is_user()
                    && m.id.as_str().starts_with(OPTIMISTIC_ID_PREFIX)
                    && !canonical.iter().any(|c| {
                        c.is_user() && c.content.visible_text() == m.content.visible_text()
                    })
            })
            .collect();

        self.messages = canonical;
        self.messages.extend(retained);
        self.messages.sort_by_key(|m| m.timestamp);
        self.bump();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::ToolCallId;

    fn run() -> RunId {
        RunId::from("run-1")
    }

    fn tool_start(name: &str, id: Option<&str>) -> ToolData {
        ToolData {
            phase: tether_protocol::ToolPhase::Start,
            name: name.into(),
            tool_call_id: id.map(ToolCallId::from),
            arguments: Some("{}".into()),
            result: None,
            is_error: None,
        }
    }

    fn tool_result(name: &str, id: Option<&str>, result: &str, is_error: bool) -> ToolData {
        ToolData {
            phase: tether_protocol::ToolPhase::Result,
            name: name.into(),
            tool_call_id: id.map(ToolCallId::from),
            arguments: None,
            result: Some(result.into()),
            is_error: Some(is_error),
        }
    }

    fn parts(asm: &TranscriptAssembler) -> &[ContentPart] {
        asm.messages()[0].content.parts()
    }

    #[test]
    fn message_created_lazily_on_first_delta() {
        let mut asm = TranscriptAssembler::new();
        assert!(asm.messages().is_empty());
        asm.apply_text_delta(&run(), "Hel", 10);
        assert_eq!(asm.messages().len(), 1);
        assert_eq!(asm.messages()[0].id.as_str(), "run-1");
        assert_eq!(asm.messages()[0].timestamp, 10);
    }

    #[test]
    fn consecutive_text_deltas_merge() {
        let mut asm = TranscriptAssembler::new();
        asm.apply_text_delta(&run(), "Hel", 0);
        asm.apply_text_delta(&run(), "lo", 0);
        assert_eq!(parts(&asm), &[ContentPart::text("Hello")]);
    }

    #[test]
    fn text_after_tool_call_opens_new_segment() {
        let mut asm = TranscriptAssembler::new();
        asm.apply_text_delta(&run(), "Let me check. ", 0);
        asm.apply_tool_start(&run(), &tool_start("weather", None), 0);
        asm.apply_text_delta(&run(), "It is ", 0);
        asm.apply_text_delta(&run(), "72F.", 0);

        let parts = parts(&asm);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].as_text(), Some("Let me check. "));
        assert!(parts[1].is_tool_call());
        assert_eq!(parts[2].as_text(), Some("It is 72F."));
    }

    #[test]
    fn thinking_and_text_interleave_around_tools() {
        let mut asm = TranscriptAssembler::new();
        asm.apply_thinking_delta(&run(), "planning", 0);
        asm.apply_tool_start(&run(), &tool_start("search", None), 0);
        asm.apply_thinking_delta(&run(), "reviewing", 0);
        asm.apply_text_delta(&run(), "Answer.", 0);

        let parts = parts(&asm);
        assert_eq!(parts.len(), 4);
        assert!(parts[0].is_thinking());
        assert!(parts[1].is_tool_call());
        assert!(parts[2].is_thinking());
        assert!(parts[3].is_text());
    }

    #[test]
    fn thinking_does_not_merge_into_text() {
        let mut asm = TranscriptAssembler::new();
        asm.apply_text_delta(&run(), "visible", 0);
        asm.apply_thinking_delta(&run(), "hidden", 0);
        // The open text segment stays open for text even though a thinking
        // part landed after it — only tool calls close segments.
        asm.apply_text_delta(&run(), " more", 0);

        let parts = parts(&asm);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].as_text(), Some("visible more"));
        assert!(parts[1].is_thinking());
    }

    #[test]
    fn tool_start_always_appends() {
        let mut asm = TranscriptAssembler::new();
        asm.apply_tool_start(&run(), &tool_start("bash", Some("tc-1")), 0);
        asm.apply_tool_start(&run(), &tool_start("bash", Some("tc-2")), 0);
        assert_eq!(parts(&asm).len(), 2);
    }

    #[test]
    fn tool_result_mutates_in_place_by_id() {
        let mut asm = TranscriptAssembler::new();
        asm.apply_tool_start(&run(), &tool_start("bash", Some("tc-1")), 0);
        asm.apply_tool_start(&run(), &tool_start("bash", Some("tc-2")), 0);
        asm.apply_tool_result(&run(), &tool_result("bash", Some("tc-1"), "ok", false), 0);

        let parts = parts(&asm);
        assert_eq!(parts.len(), 2, "result must never append");
        let ContentPart::ToolCall { status, result, .. } = &parts[0] else {
            panic!("expected tool part");
        };
        assert_eq!(*status, ToolStatus::Success);
        assert_eq!(result.as_deref(), Some("ok"));
        let ContentPart::ToolCall { status, .. } = &parts[1] else {
            panic!("expected tool part");
        };
        assert_eq!(*status, ToolStatus::Running);
    }

    #[test]
    fn tool_result_matches_latest_same_name_without_id() {
        let mut asm = TranscriptAssembler::new();
        asm.apply_tool_start(&run(), &tool_start("weather", None), 0);
        asm.apply_tool_start(&run(), &tool_start("weather", None), 0);
        asm.apply_tool_result(&run(), &tool_result("weather", None, "72F", false), 0);

        let parts = parts(&asm);
        let ContentPart::ToolCall { status, .. } = &parts[0] else {
            panic!()
        };
        assert_eq!(*status, ToolStatus::Running, "older call untouched");
        let ContentPart::ToolCall { status, result, .. } = &parts[1] else {
            panic!()
        };
        assert_eq!(*status, ToolStatus::Success);
        assert_eq!(result.as_deref(), Some("72F"));
    }

    #[test]
    fn tool_error_result_sets_error_status() {
        let mut asm = TranscriptAssembler::new();
        asm.apply_tool_start(&run(), &tool_start("bash", None), 0);
        asm.apply_tool_result(&run(), &tool_result("bash", None, "exit 1", true), 0);
        let ContentPart::ToolCall { status, .. } = &parts(&asm)[0] else {
            panic!()
        };
        assert_eq!(*status, ToolStatus::Error);
    }

    #[test]
    fn orphan_tool_result_is_dropped() {
        let mut asm = TranscriptAssembler::new();
        asm.apply_text_delta(&run(), "hi", 0);
        asm.apply_tool_result(&run(), &tool_result("weather", None, "72F", false), 0);
        assert_eq!(parts(&asm).len(), 1);
    }

    #[test]
    fn duplicate_tool_result_is_ignored() {
        let mut asm = TranscriptAssembler::new();
        asm.apply_tool_start(&run(), &tool_start("weather", Some("tc-1")), 0);
        asm.apply_tool_result(&run(), &tool_result("weather", Some("tc-1"), "72F", false), 0);
        asm.apply_tool_result(&run(), &tool_result("weather", Some("tc-1"), "80F", true), 0);

        let ContentPart::ToolCall { status, result, .. } = &parts(&asm)[0] else {
            panic!()
        };
        assert_eq!(*status, ToolStatus::Success);
        assert_eq!(result.as_deref(), Some("72F"));
    }

    #[test]
    fn deltas_route_by_run_identity() {
        let mut asm = TranscriptAssembler::new();
        asm.apply_text_delta(&RunId::from("run-a"), "first", 0);
        asm.apply_text_delta(&RunId::from("run-b"), "second", 1);
        asm.apply_text_delta(&RunId::from("run-a"), " run", 0);

        assert_eq!(asm.messages().len(), 2);
        assert_eq!(asm.messages()[0].content.parts()[0].as_text(), Some("first run"));
    }

    #[test]
    fn snapshot_fills_only_empty_message() {
        let mut asm = TranscriptAssembler::new();
        let snapshot = ChatMessage {
            content: MessageContent::Text("from server".into()),
            ..ChatMessage::assistant_shell(MessageId::from("run-1"), 0)
        };
        asm.apply_snapshot(&run(), snapshot.clone(), 0);
        assert_eq!(asm.messages()[0].content.visible_text(), "from server");

        // Local streamed content is never clobbered by a later snapshot.
        let mut asm = TranscriptAssembler::new();
        asm.apply_text_delta(&run(), "local", 0);
        asm.apply_snapshot(&run(), snapshot, 0);
        assert_eq!(asm.messages()[0].content.visible_text(), "local");
    }

    #[test]
    fn attach_outcome_sets_duration_and_stop_reason() {
        let mut asm = TranscriptAssembler::new();
        asm.apply_text_delta(&run(), "done", 0);
        asm.attach_outcome(
            &run(),
            RunOutcome {
                stop_reason: Some(StopReason::EndTurn),
                run_duration_ms: Some(4_000),
                thinking_duration_ms: None,
            },
        );
        let msg = &asm.messages()[0];
        assert_eq!(msg.stop_reason, Some(StopReason::EndTurn));
        assert_eq!(msg.run_duration_ms, Some(4_000));
    }

    #[test]
    fn attach_outcome_without_message_is_noop() {
        let mut asm = TranscriptAssembler::new();
        asm.attach_outcome(&run(), RunOutcome::default());
        assert!(asm.messages().is_empty());
    }

    #[test]
    fn push_user_is_optimistic() {
        let mut asm = TranscriptAssembler::new();
        let id = asm.push_user("ping", 100);
        assert!(id.as_str().starts_with(OPTIMISTIC_ID_PREFIX));
        assert!(asm.messages()[0].is_user());
    }

    #[test]
    fn merge_removes_confirmed_optimistic_message() {
        let mut asm = TranscriptAssembler::new();
        let _ = asm.push_user("ping", 100);
        let canonical = vec![ChatMessage::user(MessageId::from("srv-1"), "ping", 100)];
        asm.merge_canonical(canonical);
        assert_eq!(asm.messages().len(), 1);
        assert_eq!(asm.messages()[0].id.as_str(), "srv-1");
    }

    #[test]
    fn merge_retains_unconfirmed_optimistic_message() {
        let mut asm = TranscriptAssembler::new();
        let _ = asm.push_user("ping", 100);
        let canonical = vec![ChatMessage::user(MessageId::from("srv-1"), "other", 50)];
        asm.merge_canonical(canonical);
        assert_eq!(asm.messages().len(), 2);
        assert!(asm.messages()[1].id.as_str().starts_with(OPTIMISTIC_ID_PREFIX));
    }

    #[test]
    fn merge_sorts_by_timestamp() {
        let mut asm = TranscriptAssembler::new();
        let _ = asm.push_user("late", 500);
        let canonical = vec![
            ChatMessage::user(MessageId::from("srv-1"), "first", 100),
            ChatMessage::user(MessageId::from("srv-2"), "second", 900),
        ];
        asm.merge_canonical(canonical);
        let texts: Vec<String> = asm
            .messages()
            .iter()
            .map(|m| m.content.visible_text())
            .collect();
        assert_eq!(texts, vec!["first", "late", "second"]);
    }

    #[test]
    fn merge_is_idempotent() {
        let canonical = vec![
            ChatMessage::user(MessageId::from("srv-1"), "hi", 100),
            ChatMessage::user(MessageId::from("srv-2"), "there", 200),
        ];
        let mut asm = TranscriptAssembler::new();
        asm.merge_canonical(canonical.clone());
        let first = asm.messages().to_vec();
        asm.merge_canonical(canonical);
        assert_eq!(asm.messages(), &first[..]);
    }

    #[test]
    fn merge_drops_streamed_assistant_messages() {
        // Canonical history wholesale-replaces everything non-optimistic,
        // including the locally assembled assistant message.
        let mut asm = TranscriptAssembler::new();
        asm.apply_text_delta(&run(), "partial", 10);
        asm.merge_canonical(vec![ChatMessage::user(MessageId::from("srv-1"), "x", 5)]);
        assert_eq!(asm.messages().len(), 1);
        assert!(asm.messages()[0].is_user());
    }

    #[test]
    fn version_counts_mutations() {
        let mut asm = TranscriptAssembler::new();
        let v0 = asm.version();
        asm.apply_text_delta(&run(), "a", 0);
        assert!(asm.version() > v0);
        let v1 = asm.version();
        asm.push_system_error("boom", 0);
        assert!(asm.version() > v1);
    }

    #[test]
    fn system_error_lands_in_transcript() {
        let mut asm = TranscriptAssembler::new();
        asm.push_system_error("model overloaded", 7);
        let msg = &asm.messages()[0];
        assert_eq!(msg.is_error, Some(true));
        assert_eq!(msg.content.visible_text(), "model overloaded");
    }

    mod determinism {
        use super::*;
        use proptest::prelude::*;

        #[derive(Clone, Debug)]
        enum Delta {
            Text(String),
            Thinking(String),
            ToolStart(u8),
            ToolResult(u8),
        }

        fn delta_strategy() -> impl Strategy<Value = Delta> {
            prop_oneof![
                "[a-z]{1,6}".prop_map(Delta::Text),
                "[a-z]{1,6}".prop_map(Delta::Thinking),
                (0u8..4).prop_map(Delta::ToolStart),
                (0u8..4).prop_map(Delta::ToolResult),
            ]
        }

        fn apply_all(deltas: &[Delta]) -> Vec<ContentPart> {
            let mut asm = TranscriptAssembler::new();
            let run = RunId::from("run-p");
            for delta in deltas {
                match delta {
                    Delta::Text(s) => asm.apply_text_delta(&run, s, 0),
                    Delta::Thinking(s) => asm.apply_thinking_delta(&run, s, 0),
                    Delta::ToolStart(n) => {
                        asm.apply_tool_start(&run, &tool_start(&format!("tool{n}"), None), 0);
                    }
                    Delta::ToolResult(n) => asm.apply_tool_result(
                        &run,
                        &tool_result(&format!("tool{n}"), None, "ok", false),
                        0,
                    ),
                }
            }
            asm.messages()
                .first()
                .map(|m| m.content.parts().to_vec())
                .unwrap_or_default()
        }

        proptest! {
            // Re-applying the same delta stream to a fresh assembler yields
            // an identical content list.
            #[test]
            fn same_stream_same_content(deltas in prop::collection::vec(delta_strategy(), 0..40)) {
                prop_assert_eq!(apply_all(&deltas), apply_all(&deltas));
            }

            // Tool parts only ever move running → terminal, never back.
            #[test]
            fn tool_status_never_regresses(deltas in prop::collection::vec(delta_strategy(), 0..40)) {
                let mut asm = TranscriptAssembler::new();
                let run = RunId::from("run-p");
                let mut terminal_seen: Vec<bool> = Vec::new();
                for delta in &deltas {
                    match delta {
                        Delta::Text(s) => asm.apply_text_delta(&run, s, 0),
                        Delta::Thinking(s) => asm.apply_thinking_delta(&run, s, 0),
                        Delta::ToolStart(n) => {
                            asm.apply_tool_start(&run, &tool_start(&format!("tool{n}"), None), 0);
                        }
                        Delta::ToolResult(n) => asm.apply_tool_result(
                            &run,
                            &tool_result(&format!("tool{n}"), None, "ok", false),
                            0,
                        ),
                    }
                    let statuses: Vec<bool> = asm
                        .messages()
                        .first()
                        .map(|m| {
                            m.content
                                .parts()
                                .iter()
                                .filter_map(|p| match p {
                                    ContentPart::ToolCall { status, .. } => {
                                        Some(status.is_terminal())
                                    }
                                    _ => None,
                                })
                                .collect()
                        })
                        .unwrap_or_default();
                    for (i, was_terminal) in terminal_seen.iter().enumerate() {
                        if *was_terminal {
                            prop_assert!(statuses[i], "terminal status regressed");
                        }
                    }
                    terminal_seen = statuses;
                }
            }
        }
    }
}
