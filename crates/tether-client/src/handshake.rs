//! Session establishment.
//!
//! The gateway opens every connection with a `connect.challenge` event.
//! The manager answers it with a `connect` request carrying the protocol
//! range, client identity, role/scopes, optional bearer token and an
//! optional signed device block. It holds no retry logic: reconnection is
//! the transport's job, and each fresh challenge simply re-runs this
//! exchange.

use serde_json::Value;
use tracing::{debug, instrument};

use tether_core::{ClientError, RequestId};
use tether_protocol::{AuthPayload, ClientFrame, ClientInfo, ConnectAck, ConnectParams};

use crate::config::ClientConfig;
use crate::device::{DeviceIdentity, SigningContext, build_device_block};

/// Outcome of answering a challenge.
#[derive(Debug)]
pub struct ConnectRequest {
    /// The frame to send.
    pub frame: ClientFrame,
    /// Id to correlate the response with.
    pub request_id: RequestId,
    /// `true` when device signing was unavailable and the request went out
    /// token-only.
    pub degraded: bool,
}

/// Builds connect requests and validates acknowledgments.
#[derive(Clone, Debug)]
pub struct HandshakeManager {
    config: ClientConfig,
    auth_token: Option<String>,
}

impl HandshakeManager {
    /// Create a manager for the given configuration.
    #[must_use]
    pub fn new(config: ClientConfig, auth_token: Option<String>) -> Self {
        Self { config, auth_token }
    }

    /// Replace the bearer token used for subsequent handshakes.
    pub fn set_auth_token(&mut self, token: Option<String>) {
        self.auth_token = token;
    }

    /// Answer a `connect.challenge` with a `connect` request.
    #[instrument(skip_all)]
    pub fn connect_request(
        &self,
        identity: &dyn DeviceIdentity,
        nonce: &str,
        now_ms: i64,
    ) -> Result<ConnectRequest, ClientError> {
        let ctx = SigningContext {
            client: &self.config.client_name,
            role: &self.config.role,
            scopes: &self.config.scopes,
            signed_at: now_ms,
            token: self.auth_token.as_deref(),
            nonce,
        };
        let device = build_device_block(identity, &ctx);
        let degraded = device.is_none();

        let params = ConnectParams {
            min_protocol: self.config.min_protocol,
            max_protocol: self.config.max_protocol,
            client: ClientInfo {
                name: self.config.client_name.clone(),
                version: self.config.client_version.clone(),
                platform: self.config.platform.clone(),
            },
            role: self.config.role.clone(),
            scopes: self.config.scopes.clone(),
            auth: self.auth_token.clone().map(|token| AuthPayload { token }),
            device,
        };

        let request_id = RequestId::new();
        let frame = ClientFrame::request(request_id.clone(), "connect", &params)?;
        debug!(degraded, "built connect request");
        Ok(ConnectRequest {
            frame,
            request_id,
            degraded,
        })
    }

    /// Extract session metadata from a successful connect response payload.
    pub fn accept_ack(payload: Option<Value>) -> Result<ConnectAck, ClientError> {
        let payload = payload.ok_or_else(|| ClientError::handshake("connect ack had no payload"))?;
        Ok(serde_json::from_value(payload)?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use tether_core::DeviceId;

    use crate::device::DeviceKeys;

    struct FakeStore {
        fail: bool,
    }

    impl DeviceIdentity for FakeStore {
        fn load_or_create(&self) -> Result<DeviceKeys, ClientError> {
            if self.fail {
                return Err(ClientError::handshake("no keychain"));
            }
            Ok(DeviceKeys {
                device_id: DeviceId::from("dev-1"),
                public_key: b"pub".to_vec(),
                private_key: b"priv".to_vec(),
            })
        }

        fn sign(&self, _keys: &DeviceKeys, payload: &[u8]) -> Result<Vec<u8>, ClientError> {
            Ok(payload.to_vec())
        }
    }

    fn manager() -> HandshakeManager {
        HandshakeManager::new(ClientConfig::default(), Some("tok-1".into()))
    }

    #[test]
    fn connect_request_carries_identity_and_device() {
        let req = manager()
            .connect_request(&FakeStore { fail: false }, "nonce-1", 1_000)
            .unwrap();
        assert!(!req.degraded);
        assert_eq!(req.frame.method, "connect");
        let params = req.frame.params.unwrap();
        assert_eq!(params["client"]["name"], "tether");
        assert_eq!(params["role"], "operator");
        assert_eq!(params["auth"]["token"], "tok-1");
        assert_eq!(params["device"]["deviceId"], "dev-1");
        assert_eq!(params["device"]["signedAt"], 1_000);
    }

    #[test]
    fn signing_failure_soft_degrades() {
        let req = manager()
            .connect_request(&FakeStore { fail: true }, "nonce-1", 1_000)
            .unwrap();
        assert!(req.degraded);
        let params = req.frame.params.unwrap();
        assert!(params.get("device").is_none());
        // Token auth still present.
        assert_eq!(params["auth"]["token"], "tok-1");
    }

    #[test]
    fn no_token_and_no_device_still_connects() {
        let mgr = HandshakeManager::new(ClientConfig::default(), None);
        let req = mgr
            .connect_request(&FakeStore { fail: true }, "nonce-1", 1_000)
            .unwrap();
        let params = req.frame.params.unwrap();
        assert!(params.get("auth").is_none());
        assert!(params.get("device").is_none());
    }

    #[test]
    fn fresh_request_ids_per_challenge() {
        let mgr = manager();
        let store = FakeStore { fail: false };
        let a = mgr.connect_request(&store, "n1", 0).unwrap();
        let b = mgr.connect_request(&store, "n2", 0).unwrap();
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn accept_ack_extracts_session_key() {
        let ack =
            HandshakeManager::accept_ack(Some(json!({"protocol": 2, "sessionKey": "main:xyz"})))
                .unwrap();
        assert_eq!(ack.protocol, 2);
        assert_eq!(ack.session_key.as_str(), "main:xyz");
    }

    #[test]
    fn accept_ack_without_payload_fails() {
        let err = HandshakeManager::accept_ack(None).unwrap_err();
        assert_matches!(err, ClientError::Handshake { .. });
    }

    #[test]
    fn accept_ack_with_wrong_shape_fails() {
        let err = HandshakeManager::accept_ack(Some(json!({"nope": true}))).unwrap_err();
        assert_matches!(err, ClientError::Protocol(_));
    }

    #[test]
    fn set_auth_token_changes_subsequent_requests() {
        let mut mgr = HandshakeManager::new(ClientConfig::default(), None);
        mgr.set_auth_token(Some("tok-2".into()));
        let req = mgr
            .connect_request(&FakeStore { fail: false }, "n", 0)
            .unwrap();
        let params = req.frame.params.unwrap();
        assert_eq!(params["auth"]["token"], "tok-2");
    }
}
