//! Error hierarchy for the tether client.
//!
//! Built on [`thiserror`]. Two broad classes exist:
//!
//! - connection-scoped failures ([`ClientError::Handshake`],
//!   [`ClientError::Transport`]) which surface as connection-state changes,
//! - run-scoped failures ([`ClientError::Request`], [`ClientError::Run`])
//!   which are converted into transcript entries so the user sees them in
//!   context.
//!
//! Malformed inbound frames are deliberately *not* errors at the public
//! surface: the dispatch layer skips them and keeps the stream alive.

use thiserror::Error;

/// Top-level error type for the tether client core.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Session establishment failed.
    #[error("handshake failed: {message}")]
    Handshake {
        /// Human-readable description.
        message: String,
    },

    /// The gateway rejected a request (`ok: false` response).
    #[error("request rejected [{code}]: {message}")]
    Request {
        /// Machine-readable error code from the gateway.
        code: String,
        /// Human-readable message.
        message: String,
    },

    /// The server reported a run-level error.
    #[error("run failed: {message}")]
    Run {
        /// Server-supplied error text.
        message: String,
    },

    /// A frame could not be serialized or deserialized.
    #[error("protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    /// The transport refused to accept an outbound frame.
    #[error("transport unavailable: {message}")]
    Transport {
        /// Human-readable description.
        message: String,
    },

    /// An operation was attempted in a state that does not allow it.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Human-readable description.
        message: String,
    },
}

impl ClientError {
    /// Create a handshake error.
    #[must_use]
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake {
            message: message.into(),
        }
    }

    /// Create a transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create an invalid-state error.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Returns `true` if this error should tear down the active run.
    ///
    /// Request rejections only do so when the rejected request was the one
    /// that initiated the run; the caller knows that and uses
    /// [`ClientError::Run`] for it.
    #[must_use]
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, Self::Run { .. })
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ClientError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
