//! Client configuration.

use serde::{Deserialize, Serialize};

use tether_core::constants::{CLIENT_NAME, VERSION};

/// Configuration for the gateway client.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Lowest protocol version the client speaks.
    pub min_protocol: u32,
    /// Highest protocol version the client speaks.
    pub max_protocol: u32,
    /// Client name advertised at connect.
    pub client_name: String,
    /// Client version advertised at connect.
    pub client_version: String,
    /// Host platform advertised at connect.
    pub platform: Option<String>,
    /// Requested role.
    pub role: String,
    /// Requested scopes.
    pub scopes: Vec<String>,
    /// Silence watchdog threshold in milliseconds: a streaming run with no
    /// event for this long is flagged silent (still running).
    pub silence_threshold_ms: u64,
    /// Resume poll interval in milliseconds.
    pub resume_poll_interval_ms: u64,
    /// Sub-agent coalesce gap in milliseconds: text/reasoning fragments
    /// within this window of the trailing entry merge into it.
    pub subagent_coalesce_gap_ms: i64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            min_protocol: 1,
            max_protocol: 3,
            client_name: CLIENT_NAME.into(),
            client_version: VERSION.into(),
            platform: None,
            role: "operator".into(),
            scopes: vec!["chat".into(), "history".into()],
            silence_threshold_ms: 3_000,
            resume_poll_interval_ms: 3_000,
            subagent_coalesce_gap_ms: 2_000,
        }
    }
}
