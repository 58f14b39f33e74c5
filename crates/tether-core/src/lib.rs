//! # tether-core
//!
//! Foundation types, errors, and branded IDs for the tether gateway client.
//!
//! This crate provides the shared vocabulary the protocol and client crates
//! depend on:
//!
//! - **Branded IDs**: `RunId`, `SessionKey`, `ToolCallId`, … as newtypes
//! - **Messages**: `ChatMessage` transcript entries with role and content
//! - **Content parts**: `ContentPart` covering text, thinking, tool calls
//!   and images, preserved in emission order
//! - **Errors**: `ClientError` hierarchy via `thiserror`

#![deny(unsafe_code)]

pub mod constants;
pub mod content;
pub mod errors;
pub mod ids;
pub mod messages;

pub use content::{ContentPart, ToolStatus};
pub use errors::{ClientError, Result};
pub use ids::{DeviceId, MessageId, RequestId, RunId, SessionKey, ToolCallId};
pub use messages::{ChatMessage, MessageContent, Role, StopReason};

/// Current epoch-millisecond timestamp.
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
