//! Session-establishment payloads: connect request, device identity block,
//! and connect acknowledgment.

use serde::{Deserialize, Serialize};

use tether_core::{DeviceId, SessionKey};

/// Client identity advertised during connect.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Client name (e.g. `tether`).
    pub name: String,
    /// Client semantic version.
    pub version: String,
    /// Host platform (e.g. `ios`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

/// Bearer-token authentication payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    /// Opaque bearer token.
    pub token: String,
}

/// Signed device-identity block.
///
/// The signature covers a payload binding device id, client id, role,
/// scopes, timestamp, token and the server nonce, so a captured connect
/// frame cannot be replayed against a different session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentityBlock {
    /// Stable device identifier.
    pub device_id: DeviceId,
    /// Base64-encoded public key.
    pub public_key: String,
    /// Base64-encoded signature over the binding payload.
    pub signature: String,
    /// When the payload was signed, epoch milliseconds.
    pub signed_at: i64,
}

/// Parameters of the `connect` request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    /// Lowest protocol version the client speaks.
    pub min_protocol: u32,
    /// Highest protocol version the client speaks.
    pub max_protocol: u32,
    /// Client identity.
    pub client: ClientInfo,
    /// Requested role (e.g. `operator`).
    pub role: String,
    /// Requested scopes.
    pub scopes: Vec<String>,
    /// Bearer token, when the app holds one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthPayload>,
    /// Signed device identity. Absent when signing degraded (no secure
    /// key store available); the gateway then authenticates on token alone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceIdentityBlock>,
}

/// Payload of a successful `connect` response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectAck {
    /// Negotiated protocol version.
    pub protocol: u32,
    /// The main conversation key for this client. Events carrying any
    /// other key belong to sub-agent sessions.
    pub session_key: SessionKey,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
