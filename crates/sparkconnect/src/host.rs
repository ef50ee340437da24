//! The notebook host the panel runs inside.
//!
//! The controller talks to the host through [`NotebookHost`]. Host calls
//! return immediately; work that completes later (kernel ready, channel
//! open, reconnect) is reported back as a [`HostEvent`] on the controller's
//! queue.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sparkconn_protocol::Action;

use crate::{ChannelId, NotebookId, NotebookRef};

/// State of the kernel connection of a notebook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Connecting,
    Disconnected,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// State of the kernel process, as reported by iopub `status` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelProcessStatus {
    Starting,
    Idle,
    Busy,
    Restarting,
    Dead,
    #[serde(other)]
    Unknown,
}

impl From<&jupyter_protocol::ExecutionState> for KernelProcessStatus {
    fn from(state: &jupyter_protocol::ExecutionState) -> Self {
        match state {
            jupyter_protocol::ExecutionState::Starting => KernelProcessStatus::Starting,
            jupyter_protocol::ExecutionState::Idle => KernelProcessStatus::Idle,
            jupyter_protocol::ExecutionState::Busy => KernelProcessStatus::Busy,
            jupyter_protocol::ExecutionState::Restarting => KernelProcessStatus::Restarting,
            jupyter_protocol::ExecutionState::Terminating
            | jupyter_protocol::ExecutionState::Dead => KernelProcessStatus::Dead,
            _ => KernelProcessStatus::Unknown,
        }
    }
}

/// Handle to a host-side watch. The watch is released when this is dropped.
pub struct Subscription {
    release: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A subscription with nothing to release.
    pub fn detached() -> Self {
        Self { release: None }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

/// Operations the controller needs from the notebook host.
pub trait NotebookHost {
    /// Ask to be told when the notebook's session is ready
    /// ([`HostEvent::NotebookReady`]).
    fn request_ready(&mut self, notebook: &NotebookId);

    fn connection_status(&self, notebook: &NotebookId) -> ConnectionStatus;

    /// Report [`HostEvent::ConnectionStatusChanged`] until the subscription is dropped.
    fn watch_connection_status(&mut self, notebook: &NotebookId) -> Subscription;

    /// Report [`HostEvent::KernelStatusChanged`] until the subscription is dropped.
    fn watch_kernel_status(&mut self, notebook: &NotebookId) -> Subscription;

    /// Open a comm channel to `target` carrying `open` as its first message.
    ///
    /// Completion is reported as [`HostEvent::ChannelOpened`] or
    /// [`HostEvent::ChannelOpenFailed`]. An error means the request could not
    /// even be made.
    fn open_channel(
        &mut self,
        notebook: &NotebookId,
        channel: &ChannelId,
        target: &str,
        open: &Action,
    ) -> anyhow::Result<()>;

    /// Send an action over an open channel. Fails when the channel is gone.
    fn send(&mut self, notebook: &NotebookId, channel: &ChannelId, action: &Action)
        -> anyhow::Result<()>;

    /// Close a channel from the panel side.
    fn close_channel(&mut self, notebook: &NotebookId, channel: &ChannelId) {
        let _ = (notebook, channel);
    }

    /// Reconnect to the kernel; completion is [`HostEvent::ReconnectCompleted`].
    fn reconnect(&mut self, notebook: &NotebookId);

    /// Hard-restart the kernel process.
    fn restart(&mut self, notebook: &NotebookId);

    fn metadata(&self, notebook: &NotebookId, key: &str) -> Option<Value>;

    fn set_metadata(&mut self, notebook: &NotebookId, key: &str, value: Value)
        -> anyhow::Result<()>;
}

/// Something the host reports to the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    /// The user switched notebooks, or closed the last one.
    FocusChanged { notebook: Option<NotebookRef> },
    NotebookReady { notebook: NotebookId },
    ConnectionStatusChanged {
        notebook: NotebookId,
        status: ConnectionStatus,
    },
    KernelStatusChanged {
        notebook: NotebookId,
        status: KernelProcessStatus,
    },
    ChannelOpened {
        notebook: NotebookId,
        channel: ChannelId,
    },
    ChannelOpenFailed {
        notebook: NotebookId,
        channel: ChannelId,
        error: String,
    },
    /// A comm message from the backend; `data` is the notification.
    ChannelMessage {
        notebook: NotebookId,
        channel: ChannelId,
        data: Value,
    },
    /// The backend closed the channel.
    ChannelClosed {
        notebook: NotebookId,
        channel: ChannelId,
    },
    ReconnectCompleted { notebook: NotebookId },
    NotebookClosed { notebook: NotebookId },
    /// The host dropped all kernel state (e.g. the application reloaded).
    HostReset,
}

impl HostEvent {
    /// Translate a Jupyter comm message into a host event.
    pub fn from_comm(notebook: &NotebookId, event: sparkconn_protocol::CommEvent) -> Self {
        match event {
            sparkconn_protocol::CommEvent::Message { comm_id, data } => HostEvent::ChannelMessage {
                notebook: notebook.clone(),
                channel: ChannelId::new(comm_id),
                data,
            },
            sparkconn_protocol::CommEvent::Closed { comm_id } => HostEvent::ChannelClosed {
                notebook: notebook.clone(),
                channel: ChannelId::new(comm_id),
            },
        }
    }

    /// Translate a kernel message (iopub `status`, `comm_msg` or
    /// `comm_close`) into a host event. Other messages yield `None`.
    pub fn from_kernel_message(
        notebook: &NotebookId,
        message: &jupyter_protocol::JupyterMessage,
    ) -> Option<Self> {
        if let Some(state) = sparkconn_protocol::execution_state(message) {
            return Some(HostEvent::KernelStatusChanged {
                notebook: notebook.clone(),
                status: KernelProcessStatus::from(&state),
            });
        }
        sparkconn_protocol::comm_event(message).map(|event| Self::from_comm(notebook, event))
    }

    /// The notebook this event concerns, if any.
    pub fn notebook(&self) -> Option<&NotebookId> {
        match self {
            HostEvent::FocusChanged { notebook } => notebook.as_ref().map(|n| &n.id),
            HostEvent::NotebookReady { notebook }
            | HostEvent::ConnectionStatusChanged { notebook, .. }
            | HostEvent::KernelStatusChanged { notebook, .. }
            | HostEvent::ChannelOpened { notebook, .. }
            | HostEvent::ChannelOpenFailed { notebook, .. }
            | HostEvent::ChannelMessage { notebook, .. }
            | HostEvent::ChannelClosed { notebook, .. }
            | HostEvent::ReconnectCompleted { notebook }
            | HostEvent::NotebookClosed { notebook } => Some(notebook),
            HostEvent::HostReset => None,
        }
    }
}
