//! Channel protocol between the SparkConnect panel and the kernel-side backend.
//!
//! The panel talks to the backend over a single Jupyter comm per notebook.
//! Outbound messages are actions (`{"type": "action", "action": ...}`), inbound
//! messages are notifications discriminated by `msgtype`.
//!
//! # Features
//!
//! - Typed outbound [`Action`]s with the wire envelope
//! - Typed inbound [`Notification`]s with lenient payload parsing
//! - Conversion to and from `jupyter_protocol` comm messages

mod action;
mod comm;
mod notification;

pub use action::{Action, ConnectData, MessageKind, OutboundMessage};
pub use comm::{
    comm_close, comm_event, comm_msg, comm_open, execution_state, CommEvent, ConversionError,
    COMM_TARGET,
};
pub use notification::{
    ConfigPage, Notification, ProtocolError, ResyncReason, SessionInfo, CONFIG_PAGE,
};

/// Notebook metadata key holding the persisted connection configuration.
pub const METADATA_KEY: &str = "sparkconnect";
