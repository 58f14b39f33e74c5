//! # tether-client
//!
//! Session streaming protocol client for the tether agent gateway.
//!
//! The hardest engineering in a chat client is not rendering — it is
//! turning a stream of out-of-order, partial, possibly-duplicated network
//! events into a consistent ordered transcript that survives reconnects.
//! This crate owns that core:
//!
//! - [`handshake`] — authenticated session establishment with soft-degrade
//!   device identity
//! - [`client`] — frame dispatch and per-event routing between the main
//!   conversation and sub-agent sessions
//! - [`assembler`] — incremental message assembly preserving the emission
//!   order of text, reasoning and tool-call segments
//! - [`run`] — run lifecycle tracking with silence detection
//! - [`resume`] — in-flight run detection from canonical history and
//!   fixed-interval polling until completion
//! - [`subagent`] — compact per-session activity logs with FIFO spawn
//!   auto-linking
//!
//! The raw duplex transport and the secure key store are collaborator
//! traits ([`transport::Transport`], [`device::DeviceIdentity`]) owned by
//! the embedding app.

#![deny(unsafe_code)]

pub mod assembler;
pub mod client;
pub mod config;
pub mod device;
pub mod handshake;
pub mod logging;
pub mod resume;
pub mod run;
pub mod session;
pub mod subagent;
pub mod transport;

pub use assembler::TranscriptAssembler;
pub use client::GatewayClient;
pub use config::ClientConfig;
pub use device::{DeviceIdentity, DeviceKeys};
pub use handshake::HandshakeManager;
pub use resume::ResumeEngine;
pub use run::{RunEnd, RunPhase, RunTracker};
pub use subagent::{SubagentEntry, SubagentRegistry, SubagentSession, SubagentStatus};
pub use transport::{ConnectionState, Transport};
