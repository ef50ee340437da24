//! sparkconnect - Connection lifecycle core for the SparkConnect side panel.
//!
//! The panel lets a notebook user configure, start and monitor a Spark cluster
//! session. This crate holds everything below the visual layer:
//!
//! - [`registry::Registry`]: one comm channel per notebook
//! - [`phase::Phase`]: the lifecycle phases and the data each one renders
//! - [`controller::Controller`]: the event-driven state machine tying host
//!   events, backend notifications and user actions together
//! - [`view::View`]: the serializable projection handed to the view layer
//!
//! The notebook host is abstracted behind [`host::NotebookHost`]; the wire
//! protocol lives in the `sparkconn-protocol` crate.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub mod bundles;
pub mod controller;
pub mod host;
pub mod logs;
pub mod metadata;
pub mod phase;
pub mod recording;
pub mod registry;
pub mod settings;
pub mod view;

pub use sparkconn_protocol as protocol;

// ============================================================================
// Paths
// ============================================================================

/// Get the configuration directory for the panel.
///
/// - Linux: `~/.config/sparkconnect/`
/// - macOS: `~/Library/Application Support/sparkconnect/`
/// - Windows: `C:\Users\<User>\AppData\Roaming\sparkconnect\`
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sparkconnect")
}

/// Get the default path of the settings file.
pub fn default_settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

// ============================================================================
// Types
// ============================================================================

/// Stable identifier the host assigns to an open notebook.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotebookId(String);

impl NotebookId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NotebookId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NotebookId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NotebookId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identity of one comm channel. Doubles as the Jupyter `comm_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    /// Allocate a fresh channel id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A notebook as announced by the host: its id plus a display label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotebookRef {
    pub id: NotebookId,
    pub title: String,
}

impl NotebookRef {
    pub fn new(id: impl Into<NotebookId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}
