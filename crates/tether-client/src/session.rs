//! Session context: main conversation key and request correlation.
//!
//! The main-session key is mutable session state, not a constant — the
//! gateway may assign a different key after a reconnect handshake. Every
//! routing decision therefore asks [`SessionContext::is_main`] at event
//! time instead of caching the comparison.

use std::collections::HashMap;

use tether_core::{RequestId, SessionKey};

/// What an in-flight request was for, so its response can be dispatched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PendingRequest {
    /// The `connect` handshake request.
    Connect,
    /// A `chat.history` fetch.
    History {
        /// Conversation the fetch targets.
        key: SessionKey,
        /// Whether that conversation is the main one.
        main: bool,
    },
    /// A run-initiating `chat.send`.
    Send,
    /// A `chat.abort`.
    Abort,
}

/// Mutable per-connection session state.
#[derive(Debug, Default)]
pub struct SessionContext {
    /// Server-assigned connection id from the `hello` frame.
    connection_id: Option<String>,
    /// The main conversation key, set by a successful handshake.
    main_key: Option<SessionKey>,
    /// In-flight requests awaiting a response.
    pending: HashMap<RequestId, PendingRequest>,
}

impl SessionContext {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the server-assigned connection id.
    pub fn set_connection_id(&mut self, id: String) {
        self.connection_id = Some(id);
    }

    /// The server-assigned connection id, if the hello frame arrived.
    #[must_use]
    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    /// Install the main conversation key from a connect acknowledgment.
    pub fn set_main_key(&mut self, key: SessionKey) {
        self.main_key = Some(key);
    }

    /// The current main conversation key.
    #[must_use]
    pub fn main_key(&self) -> Option<&SessionKey> {
        self.main_key.as_ref()
    }

    /// Whether `key` is the main conversation *right now*.
    ///
    /// Returns `false` before the handshake completes; events arriving that
    /// early cannot be attributed and are treated as sub-agent traffic by
    /// the router only once a main key exists.
    #[must_use]
    pub fn is_main(&self, key: &SessionKey) -> bool {
        self.main_key.as_ref() == Some(key)
    }

    /// Track an in-flight request.
    pub fn track(&mut self, id: RequestId, request: PendingRequest) {
        let _ = self.pending.insert(id, request);
    }

    /// Resolve an in-flight request by its echoed id.
    pub fn take(&mut self, id: &RequestId) -> Option<PendingRequest> {
        self.pending.remove(id)
    }

    /// Whether a history fetch for `key` is already in flight.
    #[must_use]
    pub fn history_in_flight(&self, key: &SessionKey) -> bool {
        self.pending
            .values()
            .any(|p| matches!(p, PendingRequest::History { key: k, .. } if k == key))
    }

    /// Drop all correlation state (connection closed).
    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
