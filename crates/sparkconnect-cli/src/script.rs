//! Scripted event traces replayed through the controller.
//!
//! A script is a JSON array of steps. Each step is a host event
//! (`{"event": ...}`), a user action (`{"ui": ...}`) or a setup step
//! (`{"setup": ...}`) that changes what the recording host reports.
//!
//! Backend messages need the id of the channel the controller opened, which
//! the script cannot know in advance; `"channel": "current"` stands for the
//! notebook's live channel.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sparkconnect::controller::{Controller, Event, UiEvent};
use sparkconnect::host::{ConnectionStatus, HostEvent};
use sparkconnect::phase::PhaseKind;
use sparkconnect::recording::{HostCall, RecordingHost};
use sparkconnect::settings::Settings;
use sparkconnect::view::View;
use sparkconnect::{ChannelId, NotebookId};

/// Placeholder channel id resolved at replay time.
pub const CURRENT_CHANNEL: &str = "current";

/// Changes to the recording host between events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "setup", rename_all = "snake_case")]
pub enum SetupStep {
    /// What `connection_status` reports for a notebook.
    ConnectionStatus {
        notebook: NotebookId,
        status: ConnectionStatus,
    },
    /// Stored connection config of a notebook.
    Metadata { notebook: NotebookId, value: Value },
    /// Make channel opens fail (or succeed again).
    RefuseChannels { refuse: bool },
    /// Make the notebook's live channel fail on send.
    KillChannel { notebook: NotebookId },
    /// Recompute the log display without waiting for the ticker.
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Step {
    Host(HostEvent),
    Ui(UiEvent),
    Setup(SetupStep),
}

impl Step {
    /// Short name for tables: the event, action or setup kind.
    pub fn label(&self) -> String {
        let (tag, value) = match self {
            Step::Host(e) => ("event", serde_json::to_value(e)),
            Step::Ui(e) => ("ui", serde_json::to_value(e)),
            Step::Setup(s) => ("setup", serde_json::to_value(s)),
        };
        value
            .ok()
            .and_then(|v| v.get(tag).and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| tag.to_string())
    }
}

pub fn parse_script(json: &str) -> Result<Vec<Step>> {
    serde_json::from_str(json).context("Invalid replay script")
}

pub fn load_script(path: &Path) -> Result<Vec<Step>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script {}", path.display()))?;
    parse_script(&json).with_context(|| format!("In {}", path.display()))
}

/// The state after one replayed step.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub index: usize,
    pub step: String,
    pub phase: PhaseKind,
    pub sessions: usize,
    pub calls: Vec<HostCall>,
}

/// Result of a replay.
#[derive(Debug, Clone, Serialize)]
pub struct Replay {
    pub steps: Vec<StepRecord>,
    pub view: View,
}

/// Run `steps` through a fresh controller backed by a [`RecordingHost`].
pub fn replay(steps: Vec<Step>, settings: Settings) -> Result<Replay> {
    let metadata_key = settings.metadata_key.clone();
    let (mut controller, _rx) = Controller::new(RecordingHost::new(), settings);
    let mut records = Vec::with_capacity(steps.len());

    for (index, step) in steps.into_iter().enumerate() {
        let label = step.label();
        match step {
            Step::Host(event) => {
                let event = resolve_channel(&controller, event)
                    .with_context(|| format!("Step {index} ({label})"))?;
                controller.handle(Event::Host(event));
            }
            Step::Ui(event) => controller.handle(Event::Ui(event)),
            Step::Setup(setup) => apply_setup(&mut controller, &metadata_key, setup)
                .with_context(|| format!("Step {index} ({label})"))?,
        }
        let calls = controller.host_mut().take_calls();
        records.push(StepRecord {
            index,
            step: label,
            phase: controller.view().kind(),
            sessions: controller.registry().len(),
            calls,
        });
    }

    Ok(Replay {
        steps: records,
        view: controller.view(),
    })
}

fn apply_setup(
    controller: &mut Controller<RecordingHost>,
    metadata_key: &str,
    setup: SetupStep,
) -> Result<()> {
    match setup {
        SetupStep::ConnectionStatus { notebook, status } => {
            controller
                .host_mut()
                .set_connection_status(&notebook, status);
        }
        SetupStep::Metadata { notebook, value } => {
            controller
                .host_mut()
                .insert_metadata(&notebook, metadata_key, value);
        }
        SetupStep::RefuseChannels { refuse } => controller.host_mut().refuse_channels(refuse),
        SetupStep::KillChannel { notebook } => {
            let channel = live_channel(controller, &notebook)?;
            controller.host_mut().kill_channel(&channel);
        }
        SetupStep::Refresh => controller.refresh_now(),
    }
    Ok(())
}

fn live_channel(controller: &Controller<RecordingHost>, notebook: &NotebookId) -> Result<ChannelId> {
    controller
        .registry()
        .get(notebook)
        .map(|session| session.channel.clone())
        .with_context(|| format!("Notebook {notebook} has no live channel"))
}

/// Replace `"current"` channel ids with the notebook's live channel.
fn resolve_channel(controller: &Controller<RecordingHost>, event: HostEvent) -> Result<HostEvent> {
    let resolve = |notebook: &NotebookId, channel: ChannelId| -> Result<ChannelId> {
        if channel.as_str() == CURRENT_CHANNEL {
            live_channel(controller, notebook)
        } else {
            Ok(channel)
        }
    };
    Ok(match event {
        HostEvent::ChannelOpened { notebook, channel } => HostEvent::ChannelOpened {
            channel: resolve(&notebook, channel)?,
            notebook,
        },
        HostEvent::ChannelOpenFailed {
            notebook,
            channel,
            error,
        } => HostEvent::ChannelOpenFailed {
            channel: resolve(&notebook, channel)?,
            notebook,
            error,
        },
        HostEvent::ChannelMessage {
            notebook,
            channel,
            data,
        } => HostEvent::ChannelMessage {
            channel: resolve(&notebook, channel)?,
            notebook,
            data,
        },
        HostEvent::ChannelClosed { notebook, channel } => HostEvent::ChannelClosed {
            channel: resolve(&notebook, channel)?,
            notebook,
        },
        other => other,
    })
}
