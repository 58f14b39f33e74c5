//! # tether-protocol
//!
//! Wire-format types for the gateway duplex protocol.
//!
//! The gateway speaks JSON frames over a persistent duplex connection.
//! Inbound frames are [`ServerFrame`]s (hello, events, responses); outbound
//! frames are [`ClientFrame`] requests correlated by a client-chosen id.
//! Every event variant is a tagged union with exhaustive matching — unknown
//! stream kinds parse into an explicit `Unknown` variant instead of being
//! silently dropped at the serde layer.

#![deny(unsafe_code)]

pub mod connect;
pub mod events;
pub mod frames;
pub mod history;

pub use connect::{AuthPayload, ClientInfo, ConnectAck, ConnectParams, DeviceIdentityBlock};
pub use events::{
    AgentEvent, AgentStream, ChatEvent, ChatState, LifecycleData, LifecyclePhase, ToolData,
    ToolPhase,
};
pub use frames::{ClientFrame, ErrorBody, ResponseFrame, ServerEvent, ServerFrame};
pub use history::{ChatAbortParams, ChatHistoryParams, ChatSendParams, HistoryPayload, WireMessage};
