//! Jupyter comm framing for the panel channel.
//!
//! The panel's channel to the backend is a Jupyter comm with target
//! [`COMM_TARGET`]. Outbound actions travel as the `data` of `comm_open` and
//! `comm_msg`; inbound notifications are the `data` of kernel `comm_msg`s.

use jupyter_protocol::{ExecutionState, JupyterMessage, JupyterMessageContent};
use serde_json::{json, Value};

use crate::Action;

/// Comm target name registered by the kernel-side backend.
pub const COMM_TARGET: &str = "SparkConnector";

/// Error type for comm message conversion failures.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Failed to build comm content: {0}")]
    ContentError(#[from] anyhow::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Comm traffic relevant to the panel, extracted from a kernel message.
#[derive(Debug, Clone, PartialEq)]
pub enum CommEvent {
    /// The backend sent data on a comm.
    Message { comm_id: String, data: Value },
    /// The comm was closed by the kernel.
    Closed { comm_id: String },
}

/// Build the `comm_open` that creates the panel channel and carries its first action.
pub fn comm_open(
    comm_id: &str,
    target_name: &str,
    action: &Action,
) -> Result<JupyterMessage, ConversionError> {
    build(
        "comm_open",
        json!({
            "comm_id": comm_id,
            "target_name": target_name,
            "data": action.to_value()?,
        }),
    )
}

/// Build a `comm_msg` carrying an action on an open channel.
pub fn comm_msg(comm_id: &str, action: &Action) -> Result<JupyterMessage, ConversionError> {
    build(
        "comm_msg",
        json!({
            "comm_id": comm_id,
            "data": action.to_value()?,
        }),
    )
}

/// Build a `comm_close` for the panel channel.
pub fn comm_close(comm_id: &str) -> Result<JupyterMessage, ConversionError> {
    build("comm_close", json!({ "comm_id": comm_id, "data": {} }))
}

fn build(msg_type: &str, content: Value) -> Result<JupyterMessage, ConversionError> {
    let content = JupyterMessageContent::from_type_and_content(msg_type, content)?;
    Ok(JupyterMessage::new(content, None))
}

/// Extract comm traffic from a kernel message, if any.
pub fn comm_event(message: &JupyterMessage) -> Option<CommEvent> {
    match &message.content {
        JupyterMessageContent::CommMsg(msg) => Some(CommEvent::Message {
            comm_id: msg.comm_id.0.clone(),
            data: serde_json::to_value(&msg.data).unwrap_or_default(),
        }),
        JupyterMessageContent::CommClose(close) => Some(CommEvent::Closed {
            comm_id: close.comm_id.0.clone(),
        }),
        _ => None,
    }
}

/// Extract the kernel execution state from an iopub `status` message.
pub fn execution_state(message: &JupyterMessage) -> Option<ExecutionState> {
    match &message.content {
        JupyterMessageContent::Status(status) => Some(status.execution_state.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comm_open_targets_backend() {
        let message = comm_open("comm-1", COMM_TARGET, &Action::Open).unwrap();
        match &message.content {
            JupyterMessageContent::CommOpen(open) => {
                assert_eq!(open.comm_id.0, "comm-1");
                assert_eq!(open.target_name, "SparkConnector");
                let data = serde_json::to_value(&open.data).unwrap();
                assert_eq!(data["type"], "action");
                assert_eq!(data["action"], "sparkconn-action-open");
            }
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[test]
    fn test_comm_msg_carries_action() {
        let message = comm_msg("comm-1", &Action::Disconnect).unwrap();
        match &message.content {
            JupyterMessageContent::CommMsg(msg) => {
                assert_eq!(msg.comm_id.0, "comm-1");
                let data = serde_json::to_value(&msg.data).unwrap();
                assert_eq!(data["action"], "sparkconn-action-disconnect");
            }
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[test]
    fn test_comm_event_from_kernel_msg() {
        let content = JupyterMessageContent::from_type_and_content(
            "comm_msg",
            json!({
                "comm_id": "comm-7",
                "data": {"msgtype": "sparkconn-connected"}
            }),
        )
        .unwrap();
        let message = JupyterMessage::new(content, None);

        assert_eq!(
            comm_event(&message),
            Some(CommEvent::Message {
                comm_id: "comm-7".to_string(),
                data: json!({"msgtype": "sparkconn-connected"}),
            })
        );
    }

    #[test]
    fn test_comm_close_event() {
        let message = comm_close("comm-9").unwrap();
        assert_eq!(
            comm_event(&message),
            Some(CommEvent::Closed {
                comm_id: "comm-9".to_string()
            })
        );
        assert!(execution_state(&message).is_none());
    }

    #[test]
    fn test_status_message_execution_state() {
        let content = JupyterMessageContent::from_type_and_content(
            "status",
            json!({"execution_state": "restarting"}),
        )
        .unwrap();
        let message = JupyterMessage::new(content, None);

        assert_eq!(execution_state(&message), Some(ExecutionState::Restarting));
        assert!(comm_event(&message).is_none());
    }
}
