//! Resume-after-reconnect: in-flight run detection and canonical polling.
//!
//! After every connect and every run completion the client fetches the
//! canonical transcript. If the fetched history shows a run mid-flight —
//! the last raw message is from the user, or the last assistant message
//! lacks a terminal stop reason — the client re-enters streaming state and
//! polls the fetch at a fixed interval until the condition clears. The
//! detection is a known approximation: a race between message persistence
//! and run completion on the gateway can misfire it, and the poll is the
//! only reconciliation.
//!
//! This module also owns sub-agent discovery: spawn tool calls in fetched
//! history whose results name a child conversation key get a one-shot
//! child history fetch, imported through the registry's history path.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tether_core::messages::{ChatMessage, StopReason};
use tether_core::{ContentPart, RequestId, SessionKey, ToolCallId};
use tether_protocol::{ChatHistoryParams, ClientFrame};

use crate::transport::Transport;

/// Name of the gateway's spawn-type tool. Its result JSON names the child
/// conversation key.
pub const SPAWN_TOOL_NAME: &str = "sessions_spawn";

/// Field of the spawn result carrying the child conversation key.
pub const SPAWN_RESULT_KEY_FIELD: &str = "sessionKey";

/// Request-id prefix for poll-issued main history fetches. Responses are
/// matched at dispatch by this prefix since the poll task cannot register
/// in the pending-request table.
pub const POLL_REQUEST_PREFIX: &str = "hist-main-";

/// A spawn tool call whose result revealed its child session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpawnLink {
    /// The spawn tool call, when the gateway assigned it an id.
    pub tool_call_id: Option<ToolCallId>,
    /// The child conversation key.
    pub key: SessionKey,
}

/// Whether fetched history shows a run still in flight.
#[must_use]
pub fn run_in_flight(messages: &[ChatMessage]) -> bool {
    let Some(last) = messages.last() else {
        return false;
    };
    if last.is_user() {
        return true;
    }
    match messages.iter().rev().find(|m| m.is_assistant()) {
        Some(assistant) => !assistant.stop_reason.is_some_and(StopReason::is_terminal),
        None => false,
    }
}

/// Scan assistant tool calls for completed spawns revealing child sessions.
#[must_use]
pub fn discover_spawned_sessions(messages: &[ChatMessage]) -> Vec<SpawnLink> {
    let mut links = Vec::new();
    for msg in messages.iter().filter(|m| m.is_assistant()) {
        for part in msg.content.parts() {
            let ContentPart::ToolCall {
                name,
                tool_call_id,
                result: Some(result),
                ..
            } = part
            else {
                continue;
            };
            if name != SPAWN_TOOL_NAME {
                continue;
            }
            let Ok(parsed) = serde_json::from_str::<Value>(result) else {
                warn!("spawn result is not JSON, cannot discover child session");
                continue;
            };
            let Some(key) = parsed.get(SPAWN_RESULT_KEY_FIELD).and_then(Value::as_str) else {
                continue;
            };
            links.push(SpawnLink {
                tool_call_id: tool_call_id.clone().map(ToolCallId::from_string),
                key: SessionKey::from(key),
            });
        }
    }
    links
}

/// Resume state: the one-shot sub-agent fetch guard and the poll task.
#[derive(Debug, Default)]
pub struct ResumeEngine {
    fetched_subagent_keys: HashSet<SessionKey>,
    poll_cancel: Option<CancellationToken>,
}

impl ResumeEngine {
    /// Create an idle engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a sub-agent key as fetched; returns `false` if it already was.
    ///
    /// Guards against duplicate child history fetches racing when the same
    /// spawn is rediscovered on every canonical merge.
    pub fn mark_subagent_fetched(&mut self, key: &SessionKey) -> bool {
        self.fetched_subagent_keys.insert(key.clone())
    }

    /// Whether the resume poll is currently running.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.poll_cancel
            .as_ref()
            .is_some_and(|c| !c.is_cancelled())
    }

    /// Start the fixed-interval poll, re-issuing the main history fetch
    /// until [`stop_poll`](Self::stop_poll) is called.
    ///
    /// The first fetch fires one full interval from now: the caller just
    /// merged a fresh snapshot, so an immediate re-fetch would be a
    /// duplicate.
    pub fn start_poll<T: Transport + 'static>(
        &mut self,
        interval: Duration,
        transport: Arc<T>,
        main_key: SessionKey,
    ) {
        if self.is_polling() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let cancel = CancellationToken::new();
        self.poll_cancel = Some(cancel.clone());
        debug!(key = %main_key, "starting resume poll");
        drop(handle.spawn(run_resume_poll(
            interval, transport, main_key, cancel,
        )));
    }

    /// Cancel the poll the instant the in-flight condition clears, and
    /// unconditionally on connection close.
    pub fn stop_poll(&mut self) {
        if let Some(cancel) = self.poll_cancel.take() {
            cancel.cancel();
        }
    }

    /// Drop all state (connection closed). Sub-agent keys must be fetched
    /// again on the next connect since their history may have moved on.
    pub fn reset(&mut self) {
        self.stop_poll();
        self.fetched_subagent_keys.clear();
    }
}

impl Drop for ResumeEngine {
    fn drop(&mut self) {
        self.stop_poll();
    }
}

/// Build a poll-issued main history fetch frame.
#[must_use]
pub fn poll_history_frame(main_key: &SessionKey) -> ClientFrame {
    let id = RequestId::from_string(format!("{POLL_REQUEST_PREFIX}{}", uuid::Uuid::now_v7()));
    ClientFrame::request(
        id,
        "chat.history",
        &ChatHistoryParams {
            session_key: main_key.clone(),
        },
    )
    .expect("history params always serialize")
}

/// Poll loop: one history fetch per interval tick until cancelled.
async fn run_resume_poll<T: Transport + 'static>(
    interval: Duration,
    transport: Arc<T>,
    main_key: SessionKey,
    cancel: CancellationToken,
) {
    let mut ticks = time::interval_at(Instant::now() + interval, interval);
    loop {
        tokio::select! {
            _ = ticks.tick() => {
                let frame = poll_history_frame(&main_key);
                if !transport.send(&frame) {
                    debug!("resume poll send not accepted");
                }
            }
            () = cancel.cancelled() => {
                debug!("resume poll cancelled");
                return;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
