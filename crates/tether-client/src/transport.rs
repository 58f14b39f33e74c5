//! Transport collaborator interface.
//!
//! The raw duplex connection (socket management, reconnect backoff,
//! keepalive) lives outside this crate. The core only needs a way to push
//! frames out and to observe coarse connection state; inbound frames are
//! delivered by the embedding app calling
//! [`GatewayClient::on_frame`](crate::client::GatewayClient::on_frame) in
//! receipt order.

use tether_protocol::ClientFrame;

/// Coarse connection state reported by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial dial in progress.
    Connecting,
    /// Connected and passing frames.
    Connected,
    /// Connection lost; the transport is re-dialing.
    Reconnecting,
    /// Closed and not retrying.
    Disconnected,
}

impl ConnectionState {
    /// Returns `true` when frames can be sent.
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Outbound side of the duplex connection.
///
/// `send` is fire-and-forget: `false` means the frame was not accepted
/// (closed or backpressured) and the caller must not assume delivery.
/// Implementations must be shareable across the client's timer tasks.
pub trait Transport: Send + Sync {
    /// Serialize and send one frame. Returns `false` if not accepted.
    fn send(&self, frame: &ClientFrame) -> bool;

    /// Current connection state.
    fn state(&self) -> ConnectionState;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tether_core::RequestId;

    struct RecordingTransport {
        sent: Mutex<Vec<ClientFrame>>,
        accept: bool,
    }

    impl Transport for RecordingTransport {
        fn send(&self, frame: &ClientFrame) -> bool {
            if self.accept {
                self.sent.lock().push(frame.clone());
            }
            self.accept
        }

        fn state(&self) -> ConnectionState {
            if self.accept {
                ConnectionState::Connected
            } else {
                ConnectionState::Disconnected
            }
        }
    }

    #[test]
    fn connected_state_predicate() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(!ConnectionState::Reconnecting.is_connected());
        assert!(!ConnectionState::Disconnected.is_connected());
    }

    #[test]
    fn recording_transport_captures_frames() {
        let transport = RecordingTransport {
            sent: Mutex::new(Vec::new()),
            accept: true,
        };
        let frame = ClientFrame::bare(RequestId::from("r1"), "chat.abort");
        assert!(transport.send(&frame));
        assert_eq!(transport.sent.lock().len(), 1);
    }

    #[test]
    fn rejecting_transport_returns_false() {
        let transport = RecordingTransport {
            sent: Mutex::new(Vec::new()),
            accept: false,
        };
        let frame = ClientFrame::bare(RequestId::from("r1"), "chat.abort");
        assert!(!transport.send(&frame));
        assert!(transport.sent.lock().is_empty());
    }
}
