//! Per-notebook comm channels and the phase each notebook is in.
//!
//! Each notebook has at most one live channel to the backend. A session is
//! created when the notebook's kernel connection comes up and dropped when
//! the channel goes away, from either side.
//!
//! Sessions are looked up by notebook id on every event; callers never keep
//! a reference across events. Events carry the channel id they arrived on,
//! and [`Registry::channel_matches`] tells whether that channel is still the
//! current one.

use std::collections::HashMap;

use log::{debug, info, warn};
use sparkconn_protocol::Action;

use crate::host::NotebookHost;
use crate::phase::Phase;
use crate::{ChannelId, NotebookId, NotebookRef};

/// Whether the host has confirmed the channel open yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Opening,
    Open,
}

/// A notebook's channel and connection phase.
#[derive(Debug)]
pub struct NotebookSession {
    pub id: NotebookId,
    pub title: String,
    pub channel: ChannelId,
    pub state: ChannelState,
    pub phase: Phase,
}

/// Outcome of [`Registry::reopen`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reopen {
    /// The live channel was reused and asked to re-send its state.
    Reused,
    /// No usable channel; the caller must create one.
    NotFound,
}

/// All tracked notebook sessions.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: HashMap<NotebookId, NotebookSession>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a fresh channel for `notebook` and track it in `Opening` state
    /// with phase Loading.
    ///
    /// Any existing session for the notebook is discarded first. Returns
    /// `None` when the host refuses to open the channel.
    pub fn create<H: NotebookHost + ?Sized>(
        &mut self,
        notebook: &NotebookRef,
        host: &mut H,
        target: &str,
        open: &Action,
    ) -> Option<&mut NotebookSession> {
        if let Some(old) = self.sessions.remove(&notebook.id) {
            info!(
                "[registry] Replacing channel {} of {}",
                old.channel, notebook.title
            );
            host.close_channel(&old.id, &old.channel);
        }

        let channel = ChannelId::generate();
        if let Err(e) = host.open_channel(&notebook.id, &channel, target, open) {
            warn!(
                "[registry] Failed to open channel for {}: {}",
                notebook.title, e
            );
            return None;
        }

        info!(
            "[registry] Opening channel {} for {} ({})",
            channel, notebook.title, notebook.id
        );
        let session = NotebookSession {
            id: notebook.id.clone(),
            title: notebook.title.clone(),
            channel,
            state: ChannelState::Opening,
            phase: Phase::Loading,
        };
        Some(self.sessions.entry(notebook.id.clone()).or_insert(session))
    }

    /// Record that the host opened `channel`. Ignored for superseded channels.
    pub fn mark_open(&mut self, id: &NotebookId, channel: &ChannelId) -> bool {
        match self.sessions.get_mut(id) {
            Some(session) if &session.channel == channel => {
                session.state = ChannelState::Open;
                true
            }
            _ => {
                debug!("[registry] Ignoring open of stale channel {}", channel);
                false
            }
        }
    }

    /// Ask an existing channel to re-send the backend state.
    ///
    /// A channel still opening will deliver its open reply on its own and is
    /// reused as is. A channel that fails to send is dropped.
    pub fn reopen<H: NotebookHost + ?Sized>(&mut self, id: &NotebookId, host: &mut H) -> Reopen {
        let Some(session) = self.sessions.get_mut(id) else {
            return Reopen::NotFound;
        };
        if session.state == ChannelState::Opening {
            return Reopen::Reused;
        }
        match host.send(id, &session.channel, &Action::Open) {
            Ok(()) => {
                debug!("[registry] Reusing channel {} of {}", session.channel, session.title);
                Reopen::Reused
            }
            Err(e) => {
                warn!(
                    "[registry] Channel {} of {} is gone: {}",
                    session.channel, session.title, e
                );
                self.sessions.remove(id);
                Reopen::NotFound
            }
        }
    }

    pub fn has(&self, id: &NotebookId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn get(&self, id: &NotebookId) -> Option<&NotebookSession> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &NotebookId) -> Option<&mut NotebookSession> {
        self.sessions.get_mut(id)
    }

    /// Whether `channel` is the notebook's current channel.
    pub fn channel_matches(&self, id: &NotebookId, channel: &ChannelId) -> bool {
        self.sessions
            .get(id)
            .is_some_and(|session| &session.channel == channel)
    }

    /// Stop tracking a notebook. Safe to call when nothing is tracked.
    pub fn close(&mut self, id: &NotebookId) -> Option<NotebookSession> {
        let session = self.sessions.remove(id)?;
        info!("[registry] Closed channel {} of {}", session.channel, session.title);
        Some(session)
    }

    /// Stop tracking a notebook only if `channel` is its current channel.
    pub fn close_channel(&mut self, id: &NotebookId, channel: &ChannelId) -> Option<NotebookSession> {
        if !self.channel_matches(id, channel) {
            return None;
        }
        self.close(id)
    }

    /// Stop tracking every notebook, handing back the dropped sessions.
    pub fn clear(&mut self) -> Vec<NotebookSession> {
        if !self.sessions.is_empty() {
            info!("[registry] Dropping {} sessions", self.sessions.len());
        }
        self.sessions.drain().map(|(_, session)| session).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &NotebookId> {
        self.sessions.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::PhaseKind;
    use crate::recording::{HostCall, RecordingHost};
    use sparkconn_protocol::COMM_TARGET;

    fn notebook() -> NotebookRef {
        NotebookRef::new("nb-1", "analysis.ipynb")
    }

    #[test]
    fn test_create_tracks_opening_session() {
        let mut host = RecordingHost::new();
        let mut registry = Registry::new();

        let session = registry
            .create(&notebook(), &mut host, COMM_TARGET, &Action::Open)
            .unwrap();
        assert_eq!(session.state, ChannelState::Opening);
        assert_eq!(session.phase.kind(), PhaseKind::Loading);
        let channel = session.channel.clone();

        assert!(registry.has(&notebook().id));
        assert!(matches!(
            host.calls().last(),
            Some(HostCall::OpenChannel { channel: c, .. }) if *c == channel
        ));
    }

    #[test]
    fn test_create_replaces_existing_channel() {
        let mut host = RecordingHost::new();
        let mut registry = Registry::new();
        let nb = notebook();

        let first = registry
            .create(&nb, &mut host, COMM_TARGET, &Action::Open)
            .unwrap()
            .channel
            .clone();
        let second = registry
            .create(&nb, &mut host, COMM_TARGET, &Action::Open)
            .unwrap()
            .channel
            .clone();

        assert_ne!(first, second);
        assert_eq!(registry.len(), 1);
        assert!(!registry.channel_matches(&nb.id, &first));
        assert!(registry.channel_matches(&nb.id, &second));
        assert!(host
            .calls()
            .iter()
            .any(|c| matches!(c, HostCall::CloseChannel { channel, .. } if *channel == first)));
    }

    #[test]
    fn test_refused_open_stores_nothing() {
        let mut host = RecordingHost::new();
        host.refuse_channels(true);
        let mut registry = Registry::new();

        assert!(registry
            .create(&notebook(), &mut host, COMM_TARGET, &Action::Open)
            .is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_mark_open_ignores_stale_channel() {
        let mut host = RecordingHost::new();
        let mut registry = Registry::new();
        let nb = notebook();
        let channel = registry
            .create(&nb, &mut host, COMM_TARGET, &Action::Open)
            .unwrap()
            .channel
            .clone();

        assert!(!registry.mark_open(&nb.id, &ChannelId::new("stale")));
        assert_eq!(registry.get(&nb.id).unwrap().state, ChannelState::Opening);
        assert!(registry.mark_open(&nb.id, &channel));
        assert_eq!(registry.get(&nb.id).unwrap().state, ChannelState::Open);
    }

    #[test]
    fn test_reopen_live_channel_resends_open() {
        let mut host = RecordingHost::new();
        let mut registry = Registry::new();
        let nb = notebook();
        let channel = registry
            .create(&nb, &mut host, COMM_TARGET, &Action::Open)
            .unwrap()
            .channel
            .clone();
        registry.mark_open(&nb.id, &channel);

        assert_eq!(registry.reopen(&nb.id, &mut host), Reopen::Reused);
        assert!(matches!(
            host.calls().last(),
            Some(HostCall::Send { action: Action::Open, .. })
        ));
    }

    #[test]
    fn test_reopen_opening_channel_is_reused_without_resend() {
        let mut host = RecordingHost::new();
        let mut registry = Registry::new();
        let nb = notebook();
        registry.create(&nb, &mut host, COMM_TARGET, &Action::Open);
        let calls = host.calls().len();

        assert_eq!(registry.reopen(&nb.id, &mut host), Reopen::Reused);
        assert_eq!(host.calls().len(), calls);
    }

    #[test]
    fn test_reopen_dead_channel_is_not_found() {
        let mut host = RecordingHost::new();
        let mut registry = Registry::new();
        let nb = notebook();
        let channel = registry
            .create(&nb, &mut host, COMM_TARGET, &Action::Open)
            .unwrap()
            .channel
            .clone();
        registry.mark_open(&nb.id, &channel);
        host.kill_channel(&channel);

        assert_eq!(registry.reopen(&nb.id, &mut host), Reopen::NotFound);
        assert!(!registry.has(&nb.id));
        assert_eq!(
            registry.reopen(&NotebookId::from("unknown"), &mut host),
            Reopen::NotFound
        );
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut host = RecordingHost::new();
        let mut registry = Registry::new();
        let nb = notebook();
        registry.create(&nb, &mut host, COMM_TARGET, &Action::Open);

        assert!(registry.close(&nb.id).is_some());
        assert!(registry.close(&nb.id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_close_channel_requires_current_channel() {
        let mut host = RecordingHost::new();
        let mut registry = Registry::new();
        let nb = notebook();
        let channel = registry
            .create(&nb, &mut host, COMM_TARGET, &Action::Open)
            .unwrap()
            .channel
            .clone();

        assert!(registry
            .close_channel(&nb.id, &ChannelId::new("superseded"))
            .is_none());
        assert!(registry.has(&nb.id));
        assert!(registry.close_channel(&nb.id, &channel).is_some());
        assert!(!registry.has(&nb.id));
    }

    #[test]
    fn test_clear_drops_everything() {
        let mut host = RecordingHost::new();
        let mut registry = Registry::new();
        registry.create(&NotebookRef::new("a", "a.ipynb"), &mut host, COMM_TARGET, &Action::Open);
        registry.create(&NotebookRef::new("b", "b.ipynb"), &mut host, COMM_TARGET, &Action::Open);
        assert_eq!(registry.len(), 2);
        let mut ids: Vec<&str> = registry.ids().map(NotebookId::as_str).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["a", "b"]);

        let mut dropped: Vec<String> = registry
            .clear()
            .into_iter()
            .map(|session| session.id.as_str().to_string())
            .collect();
        dropped.sort_unstable();
        assert_eq!(dropped, vec!["a", "b"]);
        assert!(registry.is_empty());
    }
}
