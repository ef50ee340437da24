//! The connection lifecycle state machine.
//!
//! The controller is an actor: host signals, user actions and display ticks
//! all arrive as [`Event`]s on one unbounded queue and are handled one at a
//! time by [`Controller::run`]. Host work that completes later is reported
//! back on the same queue, so no handler ever waits.
//!
//! ```text
//! NotAttached → Loading → Configuring ──connect──→ Connecting → Connected
//!                  ↑          ↑                        │            │
//!                  │          └──── (re-open) ─────────┤        reconfigure
//!                  │                                   ↓            │
//!                  └──────────── retry ─────────── ConnectFailed    ↓
//!                                                                Loading
//! ```
//!
//! Only the focused notebook is rendered. Backend messages for any other
//! notebook, or from a channel that has since been replaced, are dropped.

use std::collections::HashMap;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use sparkconn_protocol::{Action, Notification};
use tokio::sync::{mpsc, watch};

use crate::host::{ConnectionStatus, HostEvent, KernelProcessStatus, NotebookHost, Subscription};
use crate::logs::RefreshTicker;
use crate::metadata::ConnectionConfig;
use crate::phase::{ConnectFailed, Configuring, Connected, Connecting, Phase, PhaseEvent, PhaseKind};
use crate::registry::{Registry, Reopen};
use crate::settings::Settings;
use crate::view::{project, View};
use crate::{ChannelId, NotebookId, NotebookRef};

/// An edit of the connection configuration form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ConfigEdit {
    AddOption { name: String, value: String },
    RemoveOption { name: String },
    AddBundle { name: String },
    RemoveBundle { name: String },
    ToggleBundle { name: String },
}

/// A user action from the view layer. Applies to the focused notebook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "ui", rename_all = "snake_case")]
pub enum UiEvent {
    /// Configuring: start the session.
    Connect,
    /// Connected: disconnect and reconfigure. ConnectFailed: try again.
    Reconfigure,
    Edit { edit: ConfigEdit },
}

/// Everything the controller reacts to.
#[derive(Debug)]
pub enum Event {
    Host(HostEvent),
    Ui(UiEvent),
    /// A phase's refresh ticker fired.
    RefreshTick { notebook: NotebookId, ticker: u64 },
    /// Stop [`Controller::run`].
    Shutdown,
}

impl From<HostEvent> for Event {
    fn from(event: HostEvent) -> Self {
        Event::Host(event)
    }
}

impl From<UiEvent> for Event {
    fn from(event: UiEvent) -> Self {
        Event::Ui(event)
    }
}

/// Host watches held for one notebook.
#[derive(Debug, Default)]
struct Watch {
    connection: Option<Subscription>,
    kernel: Option<Subscription>,
}

pub struct Controller<H: NotebookHost> {
    host: H,
    settings: Settings,
    registry: Registry,
    focused: Option<NotebookRef>,
    /// Phase of the focused notebook while it has no session.
    placeholder: Phase,
    watches: HashMap<NotebookId, Watch>,
    /// Notebook whose kernel restart is being reconnected.
    pending_reinit: Option<NotebookId>,
    events: mpsc::UnboundedSender<Event>,
    views: watch::Sender<View>,
    next_ticker: u64,
}

impl<H: NotebookHost> Controller<H> {
    /// Create a controller and the receiving end of its event queue.
    pub fn new(host: H, settings: Settings) -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (views, _) = watch::channel(View::NotAttached);
        let controller = Self {
            host,
            settings,
            registry: Registry::new(),
            focused: None,
            placeholder: Phase::NotAttached,
            watches: HashMap::new(),
            pending_reinit: None,
            events,
            views,
            next_ticker: 0,
        };
        (controller, rx)
    }

    /// A handle for posting events to this controller.
    pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
        self.events.clone()
    }

    /// Follow the rendered view.
    pub fn subscribe_view(&self) -> watch::Receiver<View> {
        self.views.subscribe()
    }

    /// Process events until [`Event::Shutdown`].
    ///
    /// The controller holds a sender of its own queue, so the queue never
    /// closes while it runs.
    pub async fn run(&mut self, mut rx: mpsc::UnboundedReceiver<Event>) {
        info!("[controller] Event loop started");
        while let Some(event) = rx.recv().await {
            if matches!(event, Event::Shutdown) {
                break;
            }
            self.handle(event);
        }
        info!("[controller] Event loop stopped");
    }

    /// Handle one event to completion.
    pub fn handle(&mut self, event: Event) {
        match event {
            Event::Host(event) => self.handle_host_event(event),
            Event::Ui(event) => self.handle_ui_event(event),
            Event::RefreshTick { notebook, ticker } => self.handle_tick(&notebook, ticker),
            Event::Shutdown => {}
        }
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn focused(&self) -> Option<&NotebookRef> {
        self.focused.as_ref()
    }

    /// The phase `notebook` is in, if it is tracked or focused.
    pub fn phase(&self, notebook: &NotebookId) -> Option<&Phase> {
        if let Some(session) = self.registry.get(notebook) {
            return Some(&session.phase);
        }
        self.is_focused(notebook).then_some(&self.placeholder)
    }

    /// The view of the focused notebook.
    pub fn view(&self) -> View {
        match &self.focused {
            Some(nb) => match self.phase(&nb.id) {
                Some(phase) => project(&nb.title, phase),
                None => View::NotAttached,
            },
            None => View::NotAttached,
        }
    }

    pub fn has_connection_watch(&self, notebook: &NotebookId) -> bool {
        self.watches
            .get(notebook)
            .is_some_and(|w| w.connection.is_some())
    }

    pub fn has_kernel_watch(&self, notebook: &NotebookId) -> bool {
        self.watches
            .get(notebook)
            .is_some_and(|w| w.kernel.is_some())
    }

    /// Recompute the focused notebook's log display now.
    pub fn refresh_now(&mut self) {
        let Some(id) = self.focused_id() else {
            return;
        };
        let changed = match self.registry.get_mut(&id) {
            Some(session) => session.phase.refresh_logs_now(),
            None => false,
        };
        if changed {
            self.publish();
        }
    }

    // ── Host events ─────────────────────────────────────────────────

    fn handle_host_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::FocusChanged { notebook } => self.on_focus_changed(notebook),
            HostEvent::NotebookReady { notebook } => self.on_ready(&notebook),
            HostEvent::ConnectionStatusChanged { notebook, status } => {
                self.on_connection_status(&notebook, status)
            }
            HostEvent::KernelStatusChanged { notebook, status } => {
                self.on_kernel_status(&notebook, status)
            }
            HostEvent::ChannelOpened { notebook, channel } => {
                self.registry.mark_open(&notebook, &channel);
            }
            HostEvent::ChannelOpenFailed {
                notebook,
                channel,
                error,
            } => {
                warn!("[controller] Channel {} failed to open: {}", channel, error);
                self.on_channel_gone(&notebook, &channel);
            }
            HostEvent::ChannelMessage {
                notebook,
                channel,
                data,
            } => self.on_message(&notebook, &channel, &data),
            HostEvent::ChannelClosed { notebook, channel } => {
                info!("[controller] Backend closed channel {}", channel);
                self.on_channel_gone(&notebook, &channel);
            }
            HostEvent::ReconnectCompleted { notebook } => self.on_reconnected(&notebook),
            HostEvent::NotebookClosed { notebook } => self.on_notebook_closed(&notebook),
            HostEvent::HostReset => {
                info!("[controller] Host reset, dropping all sessions");
                self.reset();
                self.focused = None;
                self.publish();
            }
        }
    }

    fn on_focus_changed(&mut self, notebook: Option<NotebookRef>) {
        // The notebook losing focus keeps its channel but nothing else.
        if let Some(previous) = self.focused.take() {
            self.set_phase(&previous.id, Phase::Loading);
            self.release_kernel_watch(&previous.id);
        }

        let Some(notebook) = notebook else {
            debug!("[controller] No notebook focused");
            self.placeholder = Phase::NotAttached;
            self.publish();
            return;
        };

        info!("[controller] Focused {} ({})", notebook.title, notebook.id);
        let id = notebook.id.clone();
        self.focused = Some(notebook);
        // A tracked session may have been left in any phase while unfocused.
        self.set_phase(&id, Phase::Loading);
        self.host.request_ready(&id);
    }

    fn on_ready(&mut self, id: &NotebookId) {
        if !self.is_focused(id) {
            debug!("[controller] Ignoring ready signal of unfocused {}", id);
            return;
        }

        match self.registry.reopen(id, &mut self.host) {
            Reopen::Reused => {
                debug!("[controller] Re-opened existing channel of {}", id);
                self.set_phase(id, Phase::Loading);
            }
            Reopen::NotFound => {
                if self.host.connection_status(id) == ConnectionStatus::Connected {
                    // The connected transition already happened, so force another one.
                    info!("[controller] Kernel of {} already connected, reconnecting", id);
                    self.host.reconnect(id);
                }
            }
        }

        let watch = self.watches.entry(id.clone()).or_default();
        if watch.connection.is_none() {
            watch.connection = Some(self.host.watch_connection_status(id));
        }
    }

    fn on_connection_status(&mut self, id: &NotebookId, status: ConnectionStatus) {
        info!("[controller] Kernel connection of {} is {}", id, status);
        match status {
            ConnectionStatus::Connected => {
                let notebook = match (&self.focused, self.registry.get(id)) {
                    (_, Some(session)) => NotebookRef::new(id.clone(), session.title.clone()),
                    (Some(focused), None) if &focused.id == id => focused.clone(),
                    _ => NotebookRef::new(id.clone(), id.to_string()),
                };
                let created = self
                    .registry
                    .create(
                        &notebook,
                        &mut self.host,
                        &self.settings.comm_target,
                        &Action::Open,
                    )
                    .is_some();
                self.release_kernel_watch(id);
                if !created {
                    self.set_phase(id, Phase::NotAttached);
                } else if self.is_focused(id) {
                    self.publish();
                }
            }
            ConnectionStatus::Connecting => {
                self.close_session(id);
                self.set_phase(id, Phase::Loading);
            }
            ConnectionStatus::Disconnected | ConnectionStatus::Unknown => {
                self.set_phase(id, Phase::NotAttached);
            }
        }
    }

    fn on_kernel_status(&mut self, id: &NotebookId, status: KernelProcessStatus) {
        if status != KernelProcessStatus::Restarting {
            return;
        }
        let connected = self
            .registry
            .get(id)
            .is_some_and(|s| s.phase.kind() == PhaseKind::Connected);
        if !connected {
            debug!("[controller] Kernel of {} restarting outside a session", id);
            return;
        }
        info!("[controller] Kernel of {} restarting, reconnecting", id);
        self.pending_reinit = Some(id.clone());
        self.host.reconnect(id);
    }

    fn on_reconnected(&mut self, id: &NotebookId) {
        if self.pending_reinit.as_ref() != Some(id) {
            debug!("[controller] Reconnect of {} completed", id);
            return;
        }
        // A restarted kernel lost its backend state: start over from scratch.
        info!("[controller] Re-initializing after kernel restart of {}", id);
        self.reset();
        let focused = self.focused.take();
        self.on_focus_changed(focused);
    }

    fn on_channel_gone(&mut self, id: &NotebookId, channel: &ChannelId) {
        if self.registry.close_channel(id, channel).is_none() {
            debug!("[controller] Ignoring stale channel {}", channel);
            return;
        }
        self.release_kernel_watch(id);
        self.set_phase(id, Phase::NotAttached);
    }

    fn on_notebook_closed(&mut self, id: &NotebookId) {
        info!("[controller] Notebook {} closed", id);
        self.registry.close(id);
        self.watches.remove(id);
        if self.pending_reinit.as_ref() == Some(id) {
            self.pending_reinit = None;
        }
        if self.is_focused(id) {
            self.focused = None;
            self.placeholder = Phase::NotAttached;
            self.publish();
        }
    }

    // ── Backend notifications ───────────────────────────────────────

    fn on_message(&mut self, id: &NotebookId, channel: &ChannelId, data: &serde_json::Value) {
        if !self.is_focused(id) || !self.registry.channel_matches(id, channel) {
            debug!("[controller] Dropping message for {} on channel {}", id, channel);
            return;
        }

        let notification = match Notification::from_value(data) {
            Ok(n) => n,
            Err(e) => {
                warn!("[controller] Unreadable message for {}: {}", id, e);
                return;
            }
        };
        let title = self.title(id);

        match notification {
            Notification::ConfigurationNeeded(page) => {
                info!("[controller] {} needs configuration", title);
                let config = ConnectionConfig::from_metadata(
                    self.host.metadata(id, &self.settings.metadata_key),
                );
                match Configuring::from_page(&page, config) {
                    Ok(configuring) => self.set_phase(id, Phase::Configuring(configuring)),
                    Err(e) => error!("[controller] Invalid catalog from backend for {}: {}", title, e),
                }
            }
            Notification::AlreadyConnected(info) => {
                info!("[controller] {} is connected to {:?}", title, info.cluster);
                let connected = Connected::new(info, self.settings.display_policy());
                self.set_phase(id, Phase::Connected(connected));
            }
            Notification::Resync(reason) => {
                info!("[controller] {} changed state ({:?}), re-opening", title, reason);
                self.send(id, Action::Open);
            }
            Notification::ConnectError { error } => {
                warn!("[controller] {} failed to connect: {}", title, error);
                self.set_phase(id, Phase::ConnectFailed(ConnectFailed::new(error)));
            }
            Notification::FollowLog { logs } => {
                debug!("[controller] {} log: {} lines", title, logs.len());
                self.append_logs(id, logs);
            }
            Notification::Unknown { msgtype } => {
                info!("[controller] Ignoring unknown message {} for {}", msgtype, title);
            }
        }
    }

    fn append_logs(&mut self, id: &NotebookId, logs: Vec<String>) {
        let Some(session) = self.registry.get_mut(id) else {
            return;
        };
        let before = session.phase.logs().map(|l| l.displayed().len());
        if !session.phase.append_logs(logs) {
            debug!("[controller] Dropping log lines in {} phase", session.phase.kind());
            return;
        }
        let after = session.phase.logs().map(|l| l.displayed().len());
        if before != after {
            self.publish();
        }
    }

    fn handle_tick(&mut self, id: &NotebookId, ticker: u64) {
        let changed = match self.registry.get_mut(id) {
            Some(session) => session.phase.refresh_logs(ticker),
            None => false,
        };
        if changed && self.is_focused(id) {
            self.publish();
        }
    }

    // ── User actions ────────────────────────────────────────────────

    fn handle_ui_event(&mut self, event: UiEvent) {
        let Some(id) = self.focused_id() else {
            debug!("[controller] Ignoring {:?} with no notebook focused", event);
            return;
        };
        let Some(session) = self.registry.get_mut(&id) else {
            debug!("[controller] Ignoring {:?} for untracked {}", event, id);
            return;
        };

        let phase_event = match (&event, &mut session.phase) {
            (UiEvent::Connect, Phase::Configuring(c)) => c.connect(),
            (UiEvent::Reconfigure, Phase::Connected(c)) => c.reconfigure(),
            (UiEvent::Reconfigure, Phase::ConnectFailed(c)) => c.retry(),
            (UiEvent::Edit { edit }, Phase::Configuring(c)) => {
                if apply_edit(c, edit) {
                    self.publish();
                }
                return;
            }
            (_, phase) => {
                debug!("[controller] Ignoring {:?} in {} phase", event, phase.kind());
                return;
            }
        };
        self.on_phase_event(&id, phase_event);
    }

    fn on_phase_event(&mut self, id: &NotebookId, event: PhaseEvent) {
        match event {
            PhaseEvent::ConnectRequested {
                options,
                config,
                cluster,
            } => {
                info!("[controller] Connecting {} with {} options", id, options.len());
                if let Err(e) =
                    self.host
                        .set_metadata(id, &self.settings.metadata_key, config.to_metadata())
                {
                    warn!("[controller] Failed to store connection config of {}: {}", id, e);
                }
                let connecting = Connecting::new(
                    cluster,
                    self.settings.display_policy(),
                    &self.settings.connecting_banner,
                );
                self.set_phase(id, Phase::Connecting(connecting));
                self.send(id, Action::connect(options));
            }
            PhaseEvent::ReconfigureRequested => {
                info!("[controller] Disconnecting {} to reconfigure", id);
                self.set_phase(id, Phase::Loading);
                self.send(id, Action::Disconnect);
            }
            PhaseEvent::RetryRequested => {
                // The kernel caches the failed context; only a restart clears it.
                info!("[controller] Retrying {} after a kernel restart", id);
                self.set_phase(id, Phase::Loading);
                self.send(id, Action::Disconnect);
                self.host.restart(id);
            }
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn is_focused(&self, id: &NotebookId) -> bool {
        self.focused.as_ref().is_some_and(|nb| &nb.id == id)
    }

    fn focused_id(&self) -> Option<NotebookId> {
        self.focused.as_ref().map(|nb| nb.id.clone())
    }

    fn title(&self, id: &NotebookId) -> String {
        self.registry
            .get(id)
            .map(|s| s.title.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Switch `id` to `phase`, wiring up what the new phase needs.
    fn set_phase(&mut self, id: &NotebookId, mut phase: Phase) {
        let tracked = self.registry.has(id);
        if !tracked && !self.is_focused(id) {
            return;
        }

        let kind = phase.kind();
        if matches!(kind, PhaseKind::Connecting | PhaseKind::Connected) {
            if let Some(ticker) = self.spawn_ticker(id) {
                phase.attach_ticker(ticker);
            }
        }
        if kind == PhaseKind::Connected {
            let watch = self.watches.entry(id.clone()).or_default();
            if watch.kernel.is_none() {
                watch.kernel = Some(self.host.watch_kernel_status(id));
            }
        } else {
            self.release_kernel_watch(id);
        }

        match self.registry.get_mut(id) {
            Some(session) => {
                info!(
                    "[controller] {}: {} -> {}",
                    session.title,
                    session.phase.kind(),
                    kind
                );
                session.phase = phase;
            }
            None => self.placeholder = phase,
        }

        if self.is_focused(id) {
            self.publish();
        }
    }

    fn spawn_ticker(&mut self, id: &NotebookId) -> Option<RefreshTicker> {
        if tokio::runtime::Handle::try_current().is_err() {
            debug!("[controller] No runtime, log display refreshes on demand only");
            return None;
        }
        let ticker = self.next_ticker;
        self.next_ticker += 1;
        let events = self.events.clone();
        let notebook = id.clone();
        Some(RefreshTicker::spawn(
            ticker,
            self.settings.refresh_interval(),
            move || {
                events
                    .send(Event::RefreshTick {
                        notebook: notebook.clone(),
                        ticker,
                    })
                    .is_ok()
            },
        ))
    }

    /// Send an action on the notebook's channel. A failed send drops the session.
    fn send(&mut self, id: &NotebookId, action: Action) -> bool {
        let Some(session) = self.registry.get(id) else {
            warn!("[controller] No channel to send {} for {}", action, id);
            return false;
        };
        let channel = session.channel.clone();
        match self.host.send(id, &channel, &action) {
            Ok(()) => {
                debug!("[controller] Sent {} on {}", action, channel);
                true
            }
            Err(e) => {
                warn!("[controller] Failed to send {} on {}: {}", action, channel, e);
                self.close_session(id);
                self.set_phase(id, Phase::NotAttached);
                false
            }
        }
    }

    fn close_session(&mut self, id: &NotebookId) {
        if let Some(session) = self.registry.close(id) {
            self.host.close_channel(id, &session.channel);
        }
        self.release_kernel_watch(id);
    }

    fn release_kernel_watch(&mut self, id: &NotebookId) {
        if let Some(watch) = self.watches.get_mut(id) {
            watch.kernel = None;
        }
    }

    /// Close every session and drop every subscription.
    fn reset(&mut self) {
        for session in self.registry.clear() {
            self.host.close_channel(&session.id, &session.channel);
        }
        self.watches.clear();
        self.pending_reinit = None;
        self.placeholder = Phase::NotAttached;
    }

    fn publish(&mut self) {
        let view = self.view();
        self.views.send_if_modified(|current| {
            if *current == view {
                return false;
            }
            *current = view;
            true
        });
    }
}

fn apply_edit(configuring: &mut Configuring, edit: &ConfigEdit) -> bool {
    match edit {
        ConfigEdit::AddOption { name, value } => configuring.add_option(name, value),
        ConfigEdit::RemoveOption { name } => configuring.remove_option(name),
        ConfigEdit::AddBundle { name } => configuring.add_bundle(name),
        ConfigEdit::RemoveBundle { name } => configuring.remove_bundle(name),
        ConfigEdit::ToggleBundle { name } => {
            configuring.toggle_bundle(name);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{HostCall, RecordingHost};
    use serde_json::json;

    fn nb() -> NotebookRef {
        NotebookRef::new("nb-1", "analysis.ipynb")
    }

    fn controller() -> Controller<RecordingHost> {
        Controller::new(RecordingHost::new(), Settings::default()).0
    }

    fn host(controller: &mut Controller<RecordingHost>, event: HostEvent) {
        controller.handle(Event::Host(event));
    }

    /// Focus `nb()` and bring its channel up, returning the channel id.
    fn attach(controller: &mut Controller<RecordingHost>) -> ChannelId {
        let nb = nb();
        host(controller, HostEvent::FocusChanged { notebook: Some(nb.clone()) });
        host(controller, HostEvent::NotebookReady { notebook: nb.id.clone() });
        host(
            controller,
            HostEvent::ConnectionStatusChanged {
                notebook: nb.id.clone(),
                status: ConnectionStatus::Connected,
            },
        );
        let channel = controller.host().last_channel(&nb.id).unwrap().clone();
        host(
            controller,
            HostEvent::ChannelOpened {
                notebook: nb.id.clone(),
                channel: channel.clone(),
            },
        );
        channel
    }

    fn message(controller: &mut Controller<RecordingHost>, channel: &ChannelId, data: serde_json::Value) {
        host(
            controller,
            HostEvent::ChannelMessage {
                notebook: nb().id,
                channel: channel.clone(),
                data,
            },
        );
    }

    fn config_reply() -> serde_json::Value {
        json!({
            "msgtype": "sparkconn-action-open",
            "page": "sparkconn-config",
            "sparkversion": "3.3.1",
            "cluster": "analytix",
            "maxmemory": "8g",
            "availableoptions": {"spark_options": [{"value": "spark.executor.memory"}]},
            "availablebundles": {"bundled_options": {}}
        })
    }

    #[test]
    fn test_focus_enters_loading_and_requests_ready() {
        let mut c = controller();
        host(&mut c, HostEvent::FocusChanged { notebook: Some(nb()) });

        assert_eq!(c.view().kind(), PhaseKind::Loading);
        assert_eq!(
            c.host().calls(),
            &[HostCall::RequestReady { notebook: nb().id }]
        );
    }

    #[test]
    fn test_losing_focus_shows_not_attached() {
        let mut c = controller();
        host(&mut c, HostEvent::FocusChanged { notebook: Some(nb()) });
        host(&mut c, HostEvent::FocusChanged { notebook: None });
        assert_eq!(c.view(), View::NotAttached);
        assert!(c.focused().is_none());
    }

    #[test]
    fn test_ready_with_connected_kernel_requests_reconnect() {
        let mut c = controller();
        let id = nb().id;
        c.host_mut().set_connection_status(&id, ConnectionStatus::Connected);
        host(&mut c, HostEvent::FocusChanged { notebook: Some(nb()) });
        host(&mut c, HostEvent::NotebookReady { notebook: id.clone() });

        assert!(c
            .host()
            .calls()
            .contains(&HostCall::Reconnect { notebook: id.clone() }));
        assert!(c.has_connection_watch(&id));

        // A second ready signal does not add another watch.
        host(&mut c, HostEvent::NotebookReady { notebook: id.clone() });
        assert_eq!(c.host().active_connection_watches(&id), 1);
    }

    #[tokio::test]
    async fn test_config_reply_enters_configuring_with_stored_config() {
        let mut c = controller();
        let id = nb().id;
        c.host_mut().insert_metadata(
            &id,
            "sparkconnect",
            json!({"bundled_options": [], "list_of_options": [{"name": "spark.executor.memory", "value": "2g"}]}),
        );
        let channel = attach(&mut c);
        message(&mut c, &channel, config_reply());

        let View::Configuring(view) = c.view() else {
            panic!("expected configuring, got {:?}", c.view());
        };
        assert_eq!(view.options.len(), 1);
        assert_eq!(view.cluster.spark_version.as_deref(), Some("3.3.1"));
    }

    #[tokio::test]
    async fn test_malformed_catalog_keeps_loading() {
        let mut c = controller();
        let channel = attach(&mut c);
        let mut reply = config_reply();
        reply["availableoptions"] = json!({"spark_options": [{"value": [1]}]});
        message(&mut c, &channel, reply);

        assert_eq!(c.view().kind(), PhaseKind::Loading);
    }

    #[tokio::test]
    async fn test_connect_stores_config_and_sends_merged_options() {
        let mut c = controller();
        let id = nb().id;
        let channel = attach(&mut c);
        message(&mut c, &channel, config_reply());

        c.handle(Event::Ui(UiEvent::Edit {
            edit: ConfigEdit::AddOption {
                name: "spark.executor.memory".to_string(),
                value: "4g".to_string(),
            },
        }));
        c.handle(Event::Ui(UiEvent::Connect));

        let View::Connecting(view) = c.view() else {
            panic!("expected connecting");
        };
        assert_eq!(view.logs, vec!["Waiting for spark context to start"]);
        assert_eq!(view.cluster.cluster.as_deref(), Some("analytix"));

        let stored = c.host().metadata(&id, "sparkconnect").unwrap();
        assert_eq!(stored["list_of_options"][0]["value"], "4g");

        match c.host().sent_actions(&id).last() {
            Some(Action::Connect { data }) => {
                assert_eq!(data.options["spark.executor.memory"], "4g");
            }
            other => panic!("expected connect, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_session_reply_enters_connected_and_watches_kernel() {
        let mut c = controller();
        let id = nb().id;
        let channel = attach(&mut c);
        message(
            &mut c,
            &channel,
            json!({"msgtype": "sparkconn-action-open", "sparkversion": "3.3.1", "cluster": "k8s"}),
        );

        assert_eq!(c.view().kind(), PhaseKind::Connected);
        assert!(c.has_kernel_watch(&id));

        c.handle(Event::Ui(UiEvent::Reconfigure));
        assert_eq!(c.view().kind(), PhaseKind::Loading);
        assert!(!c.has_kernel_watch(&id));
        assert_eq!(c.host().active_kernel_watches(&id), 0);
        assert_eq!(c.host().sent_actions(&id).last(), Some(&&Action::Disconnect));
    }

    #[tokio::test]
    async fn test_connect_error_retry_restarts_kernel() {
        let mut c = controller();
        let id = nb().id;
        let channel = attach(&mut c);
        message(
            &mut c,
            &channel,
            json!({"msgtype": "sparkconn-connect-error", "error": "no quota"}),
        );

        let View::ConnectFailed(view) = c.view() else {
            panic!("expected connect failed");
        };
        assert_eq!(view.error, "no quota");

        c.handle(Event::Ui(UiEvent::Reconfigure));
        assert_eq!(c.view().kind(), PhaseKind::Loading);
        assert_eq!(c.host().sent_actions(&id).last(), Some(&&Action::Disconnect));
        assert_eq!(c.host().calls().last(), Some(&HostCall::Restart { notebook: id }));
    }

    #[tokio::test]
    async fn test_resync_notifications_reopen() {
        let mut c = controller();
        let id = nb().id;
        let channel = attach(&mut c);
        for msgtype in ["sparkconn-connected", "sparkconn-config", "sparkconn-disconnected"] {
            message(&mut c, &channel, json!({ "msgtype": msgtype }));
            assert_eq!(c.host().sent_actions(&id).last(), Some(&&Action::Open));
        }
        // The channel open plus three re-opens.
        assert_eq!(c.host().sent_actions(&id).len(), 4);
    }

    #[tokio::test]
    async fn test_failed_send_closes_session() {
        let mut c = controller();
        let id = nb().id;
        let channel = attach(&mut c);
        c.host_mut().kill_channel(&channel);
        message(&mut c, &channel, json!({"msgtype": "sparkconn-connected"}));

        assert!(!c.registry().has(&id));
        assert_eq!(c.view().kind(), PhaseKind::NotAttached);
    }

    #[test]
    fn test_connecting_status_closes_session() {
        let mut c = controller();
        let id = nb().id;
        attach(&mut c);
        host(
            &mut c,
            HostEvent::ConnectionStatusChanged {
                notebook: id.clone(),
                status: ConnectionStatus::Connecting,
            },
        );
        assert!(!c.registry().has(&id));
        assert_eq!(c.view().kind(), PhaseKind::Loading);

        host(
            &mut c,
            HostEvent::ConnectionStatusChanged {
                notebook: id,
                status: ConnectionStatus::Disconnected,
            },
        );
        assert_eq!(c.view().kind(), PhaseKind::NotAttached);
    }

    #[test]
    fn test_edits_outside_configuring_are_ignored() {
        let mut c = controller();
        attach(&mut c);
        let before = c.view();
        c.handle(Event::Ui(UiEvent::Edit {
            edit: ConfigEdit::AddBundle {
                name: "x".to_string(),
            },
        }));
        c.handle(Event::Ui(UiEvent::Connect));
        assert_eq!(c.view(), before);
    }

    #[test]
    fn test_ui_event_wire_format() {
        let event: UiEvent = serde_json::from_value(json!({
            "ui": "edit",
            "edit": {"op": "toggle_bundle", "name": "LongRunningAnalysis"}
        }))
        .unwrap();
        assert_eq!(
            event,
            UiEvent::Edit {
                edit: ConfigEdit::ToggleBundle {
                    name: "LongRunningAnalysis".to_string()
                }
            }
        );
        let connect: UiEvent = serde_json::from_value(json!({"ui": "connect"})).unwrap();
        assert_eq!(connect, UiEvent::Connect);
    }

    #[tokio::test]
    async fn test_views_are_published() {
        let mut c = controller();
        let mut views = c.subscribe_view();
        host(&mut c, HostEvent::FocusChanged { notebook: Some(nb()) });

        assert!(views.has_changed().unwrap());
        assert_eq!(views.borrow_and_update().kind(), PhaseKind::Loading);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (mut c, rx) = Controller::new(RecordingHost::new(), Settings::default());
        let tx = c.sender();
        tx.send(HostEvent::FocusChanged { notebook: Some(nb()) }.into()).unwrap();
        tx.send(Event::Shutdown).unwrap();
        c.run(rx).await;
        assert_eq!(c.view().kind(), PhaseKind::Loading);
    }
}
