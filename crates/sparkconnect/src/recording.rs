//! An in-memory notebook host that records every call.
//!
//! Used to replay scripted event traces and to drive the controller in
//! tests. Nothing happens on its own: completions such as
//! [`HostEvent::ChannelOpened`](crate::host::HostEvent::ChannelOpened) are
//! fed back by whoever drives the controller.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use anyhow::bail;
use serde::Serialize;
use serde_json::Value;
use sparkconn_protocol::Action;

use crate::host::{ConnectionStatus, NotebookHost, Subscription};
use crate::{ChannelId, NotebookId};

/// A call made on the [`RecordingHost`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum HostCall {
    RequestReady {
        notebook: NotebookId,
    },
    WatchConnectionStatus {
        notebook: NotebookId,
    },
    WatchKernelStatus {
        notebook: NotebookId,
    },
    OpenChannel {
        notebook: NotebookId,
        channel: ChannelId,
        target: String,
        open: Action,
    },
    Send {
        notebook: NotebookId,
        channel: ChannelId,
        action: Action,
    },
    CloseChannel {
        notebook: NotebookId,
        channel: ChannelId,
    },
    Reconnect {
        notebook: NotebookId,
    },
    Restart {
        notebook: NotebookId,
    },
    SetMetadata {
        notebook: NotebookId,
        key: String,
        value: Value,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum WatchKind {
    Connection,
    Kernel,
}

type WatchCounts = Rc<RefCell<HashMap<(NotebookId, WatchKind), usize>>>;

#[derive(Debug, Default)]
pub struct RecordingHost {
    calls: Vec<HostCall>,
    statuses: HashMap<NotebookId, ConnectionStatus>,
    metadata: HashMap<(NotebookId, String), Value>,
    dead_channels: HashSet<ChannelId>,
    refuse_open: bool,
    watches: WatchCounts,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &[HostCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<HostCall> {
        std::mem::take(&mut self.calls)
    }

    pub fn set_connection_status(&mut self, notebook: &NotebookId, status: ConnectionStatus) {
        self.statuses.insert(notebook.clone(), status);
    }

    pub fn insert_metadata(&mut self, notebook: &NotebookId, key: &str, value: Value) {
        self.metadata
            .insert((notebook.clone(), key.to_string()), value);
    }

    /// Make every later `open_channel` fail.
    pub fn refuse_channels(&mut self, refuse: bool) {
        self.refuse_open = refuse;
    }

    /// Make sends on `channel` fail, as if the kernel dropped the comm.
    pub fn kill_channel(&mut self, channel: &ChannelId) {
        self.dead_channels.insert(channel.clone());
    }

    pub fn active_connection_watches(&self, notebook: &NotebookId) -> usize {
        self.active(notebook, WatchKind::Connection)
    }

    pub fn active_kernel_watches(&self, notebook: &NotebookId) -> usize {
        self.active(notebook, WatchKind::Kernel)
    }

    /// Actions sent to `notebook`, across all of its channels, in order.
    pub fn sent_actions(&self, notebook: &NotebookId) -> Vec<&Action> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                HostCall::OpenChannel {
                    notebook: nb, open, ..
                } if nb == notebook => Some(open),
                HostCall::Send {
                    notebook: nb,
                    action,
                    ..
                } if nb == notebook => Some(action),
                _ => None,
            })
            .collect()
    }

    /// The most recently opened channel of `notebook`.
    pub fn last_channel(&self, notebook: &NotebookId) -> Option<&ChannelId> {
        self.calls.iter().rev().find_map(|call| match call {
            HostCall::OpenChannel {
                notebook: nb,
                channel,
                ..
            } if nb == notebook => Some(channel),
            _ => None,
        })
    }

    pub fn count(&self, pred: impl Fn(&HostCall) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    fn active(&self, notebook: &NotebookId, kind: WatchKind) -> usize {
        self.watches
            .borrow()
            .get(&(notebook.clone(), kind))
            .copied()
            .unwrap_or(0)
    }

    fn watch(&mut self, notebook: &NotebookId, kind: WatchKind) -> Subscription {
        let key = (notebook.clone(), kind);
        *self.watches.borrow_mut().entry(key.clone()).or_insert(0) += 1;
        let watches = Rc::clone(&self.watches);
        Subscription::new(move || {
            if let Some(count) = watches.borrow_mut().get_mut(&key) {
                *count = count.saturating_sub(1);
            }
        })
    }
}

impl NotebookHost for RecordingHost {
    fn request_ready(&mut self, notebook: &NotebookId) {
        self.calls.push(HostCall::RequestReady {
            notebook: notebook.clone(),
        });
    }

    fn connection_status(&self, notebook: &NotebookId) -> ConnectionStatus {
        self.statuses
            .get(notebook)
            .copied()
            .unwrap_or(ConnectionStatus::Disconnected)
    }

    fn watch_connection_status(&mut self, notebook: &NotebookId) -> Subscription {
        self.calls.push(HostCall::WatchConnectionStatus {
            notebook: notebook.clone(),
        });
        self.watch(notebook, WatchKind::Connection)
    }

    fn watch_kernel_status(&mut self, notebook: &NotebookId) -> Subscription {
        self.calls.push(HostCall::WatchKernelStatus {
            notebook: notebook.clone(),
        });
        self.watch(notebook, WatchKind::Kernel)
    }

    fn open_channel(
        &mut self,
        notebook: &NotebookId,
        channel: &ChannelId,
        target: &str,
        open: &Action,
    ) -> anyhow::Result<()> {
        if self.refuse_open {
            bail!("kernel refused comm target {target}");
        }
        self.calls.push(HostCall::OpenChannel {
            notebook: notebook.clone(),
            channel: channel.clone(),
            target: target.to_string(),
            open: open.clone(),
        });
        Ok(())
    }

    fn send(
        &mut self,
        notebook: &NotebookId,
        channel: &ChannelId,
        action: &Action,
    ) -> anyhow::Result<()> {
        if self.dead_channels.contains(channel) {
            bail!("comm {channel} is closed");
        }
        self.calls.push(HostCall::Send {
            notebook: notebook.clone(),
            channel: channel.clone(),
            action: action.clone(),
        });
        Ok(())
    }

    fn close_channel(&mut self, notebook: &NotebookId, channel: &ChannelId) {
        self.dead_channels.insert(channel.clone());
        self.calls.push(HostCall::CloseChannel {
            notebook: notebook.clone(),
            channel: channel.clone(),
        });
    }

    fn reconnect(&mut self, notebook: &NotebookId) {
        self.calls.push(HostCall::Reconnect {
            notebook: notebook.clone(),
        });
    }

    fn restart(&mut self, notebook: &NotebookId) {
        self.calls.push(HostCall::Restart {
            notebook: notebook.clone(),
        });
    }

    fn metadata(&self, notebook: &NotebookId, key: &str) -> Option<Value> {
        self.metadata
            .get(&(notebook.clone(), key.to_string()))
            .cloned()
    }

    fn set_metadata(
        &mut self,
        notebook: &NotebookId,
        key: &str,
        value: Value,
    ) -> anyhow::Result<()> {
        self.calls.push(HostCall::SetMetadata {
            notebook: notebook.clone(),
            key: key.to_string(),
            value: value.clone(),
        });
        self.insert_metadata(notebook, key, value);
        Ok(())
    }
}
