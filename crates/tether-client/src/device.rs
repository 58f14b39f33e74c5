//! Device identity collaborator interface and signing payload.
//!
//! The secure key store (and whatever curve it signs with) belongs to the
//! embedding app. This module defines the seam plus the canonical payload
//! the signature must cover, and the soft-degrade rule: if the store is
//! unavailable the connect request simply goes out without a device block.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha256};
use tracing::warn;

use tether_core::{ClientError, DeviceId};
use tether_protocol::DeviceIdentityBlock;

/// Key material handed back by the secure store.
#[derive(Clone, Debug)]
pub struct DeviceKeys {
    /// Stable device identifier.
    pub device_id: DeviceId,
    /// Raw public key bytes.
    pub public_key: Vec<u8>,
    /// Opaque private key handle, only meaningful to [`DeviceIdentity::sign`].
    pub private_key: Vec<u8>,
}

/// Secure key store collaborator.
pub trait DeviceIdentity {
    /// Load the persistent device keys, creating them on first use.
    fn load_or_create(&self) -> Result<DeviceKeys, ClientError>;

    /// Sign a payload digest with the device's private key.
    fn sign(&self, keys: &DeviceKeys, payload: &[u8]) -> Result<Vec<u8>, ClientError>;
}

/// Inputs bound into the device signature.
#[derive(Clone, Debug)]
pub struct SigningContext<'a> {
    /// Client identity string.
    pub client: &'a str,
    /// Requested role.
    pub role: &'a str,
    /// Requested scopes.
    pub scopes: &'a [String],
    /// Signing time, epoch milliseconds.
    pub signed_at: i64,
    /// Bearer token, when present.
    pub token: Option<&'a str>,
    /// Server challenge nonce.
    pub nonce: &'a str,
}

/// Build the canonical payload digest the device key signs.
///
/// The digest binds device id, client id, role, scopes, timestamp, token
/// and nonce so a captured connect frame cannot be replayed with any field
/// swapped out.
#[must_use]
pub fn signing_payload(device_id: &DeviceId, ctx: &SigningContext<'_>) -> Vec<u8> {
    let material = format!(
        "v1|{}|{}|{}|{}|{}|{}|{}",
        device_id.as_str(),
        ctx.client,
        ctx.role,
        ctx.scopes.join(","),
        ctx.signed_at,
        ctx.token.unwrap_or(""),
        ctx.nonce,
    );
    Sha256::digest(material.as_bytes()).to_vec()
}

/// Produce a signed device block, or `None` when signing degrades.
///
/// Failure here is not fatal: the gateway falls back to token-only
/// authentication for this connection.
pub fn build_device_block(
    identity: &dyn DeviceIdentity,
    ctx: &SigningContext<'_>,
) -> Option<DeviceIdentityBlock> {
    let keys = match identity.load_or_create() {
        Ok(keys) => keys,
        Err(e) => {
            warn!(error = %e, "device key store unavailable, degrading to token auth");
            return None;
        }
    };
    let payload = signing_payload(&keys.device_id, ctx);
    match identity.sign(&keys, &payload) {
        Ok(signature) => Some(DeviceIdentityBlock {
            device_id: keys.device_id.clone(),
            public_key: BASE64.encode(&keys.public_key),
            signature: BASE64.encode(signature),
            signed_at: ctx.signed_at,
        }),
        Err(e) => {
            warn!(error = %e, "device signing failed, degrading to token auth");
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
