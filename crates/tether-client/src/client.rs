//! The gateway client: frame dispatch and event routing.
//!
//! One `GatewayClient` owns all mutable session state — transcript, run
//! tracker, sub-agent registry, pending-request table — and is driven from
//! a single logical event loop: the embedding app calls
//! [`on_frame`](GatewayClient::on_frame) for every inbound frame in receipt
//! order, and the user-action methods between frames. No internal locking
//! is needed because no two handlers ever run concurrently; the only
//! shared state is the watchdog/poll tasks' cancel tokens and flags.
//!
//! Routing is a per-event comparison of the frame's conversation key with
//! the current main key. The comparison is never cached: a reconnect
//! handshake can change the main key mid-session.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, instrument, warn};

use tether_core::messages::StopReason;
use tether_core::{now_ms, ClientError, MessageId, RequestId, RunId, SessionKey};
use tether_protocol::{
    AgentEvent, AgentStream, ChatAbortParams, ChatEvent, ChatSendParams, ChatState, ClientFrame,
    HistoryPayload, LifecycleData, LifecyclePhase, ResponseFrame, ServerEvent, ServerFrame,
    ToolPhase, WireMessage,
};

use crate::assembler::{RunOutcome, TranscriptAssembler};
use crate::config::ClientConfig;
use crate::device::DeviceIdentity;
use crate::handshake::HandshakeManager;
use crate::resume::{
    discover_spawned_sessions, run_in_flight, ResumeEngine, POLL_REQUEST_PREFIX, SPAWN_RESULT_KEY_FIELD,
    SPAWN_TOOL_NAME,
};
use crate::run::{RunEnd, RunPhase, RunTracker};
use crate::session::{PendingRequest, SessionContext};
use crate::subagent::SubagentRegistry;
use crate::transport::Transport;

/// Session streaming protocol client for one gateway connection.
pub struct GatewayClient<T: Transport + 'static, D: DeviceIdentity> {
    transport: Arc<T>,
    device: D,
    config: ClientConfig,
    handshake: HandshakeManager,
    session: SessionContext,
    assembler: TranscriptAssembler,
    tracker: RunTracker,
    resume: ResumeEngine,
    subagents: SubagentRegistry,
}

impl<T: Transport + 'static, D: DeviceIdentity> GatewayClient<T, D> {
    /// Create a client over the given transport and device identity store.
    #[must_use]
    pub fn new(transport: Arc<T>, device: D, config: ClientConfig, auth_token: Option<String>) -> Self {
        let handshake = HandshakeManager::new(config.clone(), auth_token);
        let subagents = SubagentRegistry::new(config.subagent_coalesce_gap_ms);
        Self {
            transport,
            device,
            config,
            handshake,
            session: SessionContext::new(),
            assembler: TranscriptAssembler::new(),
            tracker: RunTracker::new(),
            resume: ResumeEngine::new(),
            subagents,
        }
    }

    // ── Read-only surface ───────────────────────────────────────────────

    /// The ordered transcript of the main conversation.
    #[must_use]
    pub fn transcript(&self) -> &[tether_core::ChatMessage] {
        self.assembler.messages()
    }

    /// Transcript change counter.
    #[must_use]
    pub fn transcript_version(&self) -> u64 {
        self.assembler.version()
    }

    /// Current run phase.
    #[must_use]
    pub fn run_phase(&self) -> RunPhase {
        self.tracker.phase()
    }

    /// Whether the streaming run has gone quiet past the threshold.
    #[must_use]
    pub fn is_silent(&self) -> bool {
        self.tracker.is_silent()
    }

    /// Sub-agent activity store.
    #[must_use]
    pub fn subagents(&self) -> &SubagentRegistry {
        &self.subagents
    }

    /// The main conversation key, once the handshake completed.
    #[must_use]
    pub fn main_session_key(&self) -> Option<&SessionKey> {
        self.session.main_key()
    }

    // ── User actions ────────────────────────────────────────────────────

    /// Submit a user message, entering `awaiting`.
    ///
    /// The message lands in the transcript optimistically; canonical
    /// history reconciles it once the gateway persists it.
    pub fn send_user_message(&mut self, text: &str) -> Result<MessageId, ClientError> {
        let main_key = self
            .session
            .main_key()
            .cloned()
            .ok_or_else(|| ClientError::invalid_state("not connected"))?;
        let now = now_ms();
        self.tracker.begin_awaiting(now)?;
        self.tracker
            .spawn_watchdog(Duration::from_millis(self.config.silence_threshold_ms));

        let message_id = self.assembler.push_user(text, now);
        let request_id = RequestId::new();
        let frame = ClientFrame::request(
            request_id.clone(),
            "chat.send",
            &ChatSendParams {
                session_key: main_key,
                message: text.to_owned(),
                idempotency_key: uuid::Uuid::now_v7().to_string(),
            },
        )?;
        self.session.track(request_id, PendingRequest::Send);
        if !self.transport.send(&frame) {
            let _ = self.tracker.finish(None, RunEnd::Error, now_ms());
            return Err(ClientError::transport("chat.send not accepted"));
        }
        Ok(message_id)
    }

    /// Abort the active run.
    ///
    /// Local state resets immediately — the cleanup path is the same as a
    /// server-reported abort, without waiting for confirmation.
    pub fn abort(&mut self) -> Result<(), ClientError> {
        if self.tracker.phase() == RunPhase::Idle {
            return Ok(());
        }
        if let Some(main_key) = self.session.main_key().cloned() {
            let request_id = RequestId::new();
            let frame = ClientFrame::request(
                request_id.clone(),
                "chat.abort",
                &ChatAbortParams {
                    session_key: main_key,
                },
            )?;
            self.session.track(request_id, PendingRequest::Abort);
            let _ = self.transport.send(&frame);
        }
        self.finish_run(None, RunEnd::Aborted, Some(StopReason::Aborted));
        Ok(())
    }

    /// Notify the client that the transport closed.
    ///
    /// Cancels the resume poll and silence watchdog and drops request
    /// correlation; the next `connect.challenge` re-establishes everything.
    pub fn on_disconnected(&mut self) {
        debug!("connection closed, cancelling timers");
        self.resume.reset();
        self.tracker.cancel_watchdog();
        self.session.clear_pending();
    }

    // ── Frame dispatch ──────────────────────────────────────────────────

    /// Handle one raw inbound frame.
    ///
    /// Malformed frames are skipped: losing one fragment is recoverable via
    /// the next canonical history merge, killing the dispatch loop is not.
    #[instrument(skip_all)]
    pub fn on_frame(&mut self, raw: &str) {
        match serde_json::from_str::<ServerFrame>(raw) {
            Ok(frame) => self.handle_frame(frame),
            Err(e) => warn!(error = %e, "skipping malformed frame"),
        }
    }

    fn handle_frame(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::Hello { session_id } => {
                debug!(session_id, "hello received");
                self.session.set_connection_id(session_id);
            }
            ServerFrame::Event(ServerEvent::ConnectChallenge { nonce }) => {
                self.handle_challenge(&nonce);
            }
            ServerFrame::Event(ServerEvent::Chat(event)) => self.handle_chat(event),
            ServerFrame::Event(ServerEvent::Agent(event)) => self.handle_agent(event),
            ServerFrame::Response(response) => self.handle_response(response),
        }
    }

    fn handle_challenge(&mut self, nonce: &str) {
        match self.handshake.connect_request(&self.device, nonce, now_ms()) {
            Ok(request) => {
                self.session
                    .track(request.request_id, PendingRequest::Connect);
                if !self.transport.send(&request.frame) {
                    warn!("connect request not accepted by transport");
                }
            }
            Err(e) => warn!(error = %e, "failed to build connect request"),
        }
    }

    fn handle_response(&mut self, response: ResponseFrame) {
        match self.session.take(&response.id) {
            Some(PendingRequest::Connect) => self.handle_connect_response(response),
            Some(PendingRequest::History { key, main }) => {
                self.handle_history_response(response, &key, main);
            }
            Some(PendingRequest::Send) => {
                if !response.ok {
                    // The rejected request initiated the run: tear it down
                    // and surface the rejection in the transcript.
                    let text = response
                        .error
                        .map_or_else(|| "request rejected".to_owned(), |e| e.message);
                    warn!(text, "chat.send rejected");
                    self.assembler.push_system_error(&text, now_ms());
                    self.finish_run(None, RunEnd::Error, None);
                }
            }
            Some(PendingRequest::Abort) => {
                if !response.ok {
                    debug!("abort rejected; local state already reset");
                }
            }
            None => {
                // Poll-issued fetches are matched by id prefix; they never
                // enter the pending table.
                if response.id.as_str().starts_with(POLL_REQUEST_PREFIX) {
                    if let Some(key) = self.session.main_key().cloned() {
                        self.handle_history_response(response, &key, true);
                    }
                } else {
                    debug!(id = %response.id, "response for unknown request");
                }
            }
        }
    }

    fn handle_connect_response(&mut self, response: ResponseFrame) {
        if !response.ok {
            let code = response.error_code().unwrap_or("UNKNOWN").to_owned();
            warn!(code, "connect rejected");
            return;
        }
        match HandshakeManager::accept_ack(response.payload) {
            Ok(ack) => {
                debug!(protocol = ack.protocol, key = %ack.session_key, "session established");
                self.session.set_main_key(ack.session_key.clone());
                self.request_history(&ack.session_key, true);
            }
            Err(e) => warn!(error = %e, "malformed connect ack"),
        }
    }

    fn handle_history_response(&mut self, response: ResponseFrame, key: &SessionKey, main: bool) {
        if !response.ok {
            warn!(key = %key, "history fetch rejected");
            return;
        }
        let Some(payload) = response.payload else {
            warn!("history response had no payload");
            return;
        };
        let payload: HistoryPayload = match serde_json::from_value(payload) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "malformed history payload");
                return;
            }
        };
        let messages = tether_protocol::history::messages_from_history(payload);
        if main && self.session.is_main(key) {
            self.apply_main_history(messages);
        } else {
            self.subagents.load_from_history(key, &messages);
        }
    }

    // ── Event routing ───────────────────────────────────────────────────

    fn handle_chat(&mut self, event: ChatEvent) {
        if self.session.is_main(&event.session_key) {
            self.handle_main_chat(event);
        } else {
            // Sub-agent chat events only matter for terminal status.
            let phase = match event.state {
                ChatState::Delta => return,
                ChatState::Final | ChatState::Aborted => LifecyclePhase::End,
                ChatState::Error => LifecyclePhase::Error,
            };
            self.subagents.ingest_event(
                &event.session_key,
                &AgentStream::Lifecycle(LifecycleData {
                    phase,
                    error_message: event.error_message,
                }),
                now_ms(),
            );
        }
    }

    fn handle_main_chat(&mut self, event: ChatEvent) {
        match event.state {
            ChatState::Delta => {
                if !self.tracker.note_event(&event.run_id) {
                    return;
                }
                if let Some(snapshot) = event.message {
                    self.apply_snapshot(&event.run_id, snapshot);
                }
            }
            ChatState::Final => {
                self.finish_run(Some(&event.run_id), RunEnd::Final, Some(StopReason::EndTurn));
            }
            ChatState::Aborted => {
                self.finish_run(Some(&event.run_id), RunEnd::Aborted, Some(StopReason::Aborted));
            }
            ChatState::Error => {
                let text = event
                    .error_message
                    .unwrap_or_else(|| "run failed".to_owned());
                self.handle_run_error(Some(&event.run_id), &text);
            }
        }
    }

    fn handle_agent(&mut self, event: AgentEvent) {
        if !self.session.is_main(&event.session_key) {
            self.subagents
                .ingest_event(&event.session_key, &event.stream, now_ms());
            return;
        }

        if !event.is_meaningful() {
            warn!(seq = event.seq, "skipping unknown agent stream kind");
            return;
        }
        if !self.tracker.note_event(&event.run_id) {
            return;
        }

        let now = now_ms();
        match event.stream {
            AgentStream::Lifecycle(data) => match data.phase {
                // Start/end carry no content; note_event above already fed
                // the watchdog and the formal end arrives via chat state.
                LifecyclePhase::Start | LifecyclePhase::End => {}
                LifecyclePhase::Error => {
                    let text = data
                        .error_message
                        .unwrap_or_else(|| "run failed".to_owned());
                    self.handle_run_error(Some(&event.run_id), &text);
                }
            },
            AgentStream::Content { delta } => {
                self.assembler.apply_text_delta(&event.run_id, &delta, now);
            }
            AgentStream::Reasoning { delta } => {
                self.tracker.note_thinking(now);
                self.assembler
                    .apply_thinking_delta(&event.run_id, &delta, now);
            }
            AgentStream::Tool(data) => match data.phase {
                ToolPhase::Start => {
                    if data.name == SPAWN_TOOL_NAME {
                        if let Some(id) = &data.tool_call_id {
                            self.subagents.register_spawn(id.clone());
                        }
                    }
                    self.assembler.apply_tool_start(&event.run_id, &data, now);
                }
                ToolPhase::Result => {
                    self.link_spawn_result(&data);
                    self.assembler.apply_tool_result(&event.run_id, &data, now);
                }
            },
            AgentStream::Assistant { message } => {
                match serde_json::from_value::<WireMessage>(message) {
                    Ok(snapshot) => self.apply_snapshot(&event.run_id, snapshot),
                    Err(e) => warn!(error = %e, "malformed assistant snapshot"),
                }
            }
            AgentStream::Error { message } => {
                self.handle_run_error(Some(&event.run_id), &message);
            }
            AgentStream::Unknown => unreachable!("filtered by is_meaningful"),
        }
    }

    /// Install an explicit spawn link when a live spawn result names its
    /// child key. Explicit links take precedence over FIFO auto-linking.
    fn link_spawn_result(&mut self, data: &tether_protocol::ToolData) {
        if data.name != SPAWN_TOOL_NAME {
            return;
        }
        let (Some(id), Some(result)) = (&data.tool_call_id, &data.result) else {
            return;
        };
        let Ok(parsed) = serde_json::from_str::<Value>(result) else {
            return;
        };
        if let Some(key) = parsed.get(SPAWN_RESULT_KEY_FIELD).and_then(Value::as_str) {
            self.subagents.link(id.clone(), SessionKey::from(key));
        }
    }

    fn apply_snapshot(&mut self, run_id: &RunId, snapshot: WireMessage) {
        if let Some(message) = snapshot.into_message() {
            self.assembler.apply_snapshot(run_id, message, now_ms());
        }
    }

    fn handle_run_error(&mut self, run_id: Option<&RunId>, text: &str) {
        // Only surface errors that belong to the active run; a stale error
        // for a finished run must not pollute the next one.
        let relevant = match run_id {
            Some(rid) => self.tracker.accepts(rid),
            None => self.tracker.phase() != RunPhase::Idle,
        };
        if relevant {
            self.assembler.push_system_error(text, now_ms());
        }
        self.finish_run(run_id, RunEnd::Error, None);
    }

    /// Shared terminal-transition path: attach outcome, clear sub-agent
    /// state, re-fetch canonical history.
    fn finish_run(&mut self, run_id: Option<&RunId>, end: RunEnd, stop_reason: Option<StopReason>) {
        let Some(completion) = self.tracker.finish(run_id, end, now_ms()) else {
            debug!("stale terminal event ignored");
            return;
        };
        if let Some(rid) = completion.run_id.as_ref() {
            self.assembler.attach_outcome(
                rid,
                RunOutcome {
                    stop_reason,
                    run_duration_ms: completion.run_duration_ms,
                    thinking_duration_ms: completion.thinking_duration_ms,
                },
            );
        }
        self.subagents.clear();
        self.resume.stop_poll();
        if let Some(main_key) = self.session.main_key().cloned() {
            self.request_history(&main_key, true);
        }
    }

    // ── History fetch + resume ──────────────────────────────────────────

    fn request_history(&mut self, key: &SessionKey, main: bool) {
        if self.session.history_in_flight(key) {
            debug!(key = %key, "history fetch already in flight");
            return;
        }
        let request_id = RequestId::new();
        let frame = match ClientFrame::request(
            request_id.clone(),
            "chat.history",
            &tether_protocol::ChatHistoryParams {
                session_key: key.clone(),
            },
        ) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "failed to build history request");
                return;
            }
        };
        self.session.track(
            request_id,
            PendingRequest::History {
                key: key.clone(),
                main,
            },
        );
        if !self.transport.send(&frame) {
            warn!(key = %key, "history request not accepted");
        }
    }

    fn apply_main_history(&mut self, messages: Vec<tether_core::ChatMessage>) {
        let links = discover_spawned_sessions(&messages);
        self.assembler.merge_canonical(messages);

        let in_flight = run_in_flight(self.assembler.messages());
        if in_flight {
            if self.tracker.phase() == RunPhase::Idle {
                debug!("canonical history shows run in flight, resuming streaming");
                self.tracker.force_streaming(now_ms());
                self.tracker
                    .spawn_watchdog(Duration::from_millis(self.config.silence_threshold_ms));
            }
            if let Some(main_key) = self.session.main_key().cloned() {
                self.resume.start_poll(
                    Duration::from_millis(self.config.resume_poll_interval_ms),
                    Arc::clone(&self.transport),
                    main_key,
                );
            }
        } else {
            self.resume.stop_poll();
            if self.tracker.phase() != RunPhase::Idle {
                // The run completed while we were reconnecting; there is no
                // terminal chat event coming. Retire the forced run without
                // another re-fetch — this merge *is* the canonical state.
                let _ = self.tracker.finish(None, RunEnd::Final, now_ms());
                self.subagents.clear();
            }
        }

        // Retroactive sub-agent discovery: one-shot fetch per child key.
        for link in links {
            if let Some(id) = link.tool_call_id.clone() {
                self.subagents.link(id, link.key.clone());
            }
            if self.resume.mark_subagent_fetched(&link.key) {
                self.request_history(&link.key, false);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
