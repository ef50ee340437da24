//! Connection configuration persisted in notebook metadata.
//!
//! Stored under the `sparkconnect` metadata key as:
//!
//! ```json
//! {
//!   "bundled_options": ["LongRunningAnalysis"],
//!   "list_of_options": [{"name": "spark.executor.memory", "value": "2g"}]
//! }
//! ```

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

/// A single user-chosen Spark option.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct SparkOpt {
    pub name: String,
    pub value: String,
}

impl SparkOpt {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// The user's connection configuration for one notebook.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Chosen bundle names, in the order they were added.
    #[serde(default)]
    pub bundled_options: Vec<String>,

    /// Explicit options. Names are unique.
    #[serde(default)]
    pub list_of_options: Vec<SparkOpt>,
}

impl ConnectionConfig {
    /// Read the configuration from a metadata value.
    ///
    /// An absent value yields an empty configuration. A value of the wrong
    /// shape is logged and also yields an empty configuration, so a damaged
    /// notebook can still be connected.
    pub fn from_metadata(value: Option<Value>) -> Self {
        let Some(value) = value else {
            return Self::default();
        };
        match serde_json::from_value(value) {
            Ok(config) => config,
            Err(e) => {
                warn!("[metadata] Ignoring malformed connection config: {}", e);
                Self::default()
            }
        }
    }

    /// Serialize for writing back to notebook metadata.
    pub fn to_metadata(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    /// Value of an explicit option.
    pub fn option(&self, name: &str) -> Option<&str> {
        self.list_of_options
            .iter()
            .find(|o| o.name == name)
            .map(|o| o.value.as_str())
    }

    /// Set an explicit option, replacing any previous value for the same name.
    pub fn set_option(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.list_of_options.iter_mut().find(|o| o.name == name) {
            Some(existing) => existing.value = value,
            None => self.list_of_options.push(SparkOpt { name, value }),
        }
    }

    /// Remove an explicit option. Returns whether anything was removed.
    pub fn remove_option(&mut self, name: &str) -> bool {
        let before = self.list_of_options.len();
        self.list_of_options.retain(|o| o.name != name);
        self.list_of_options.len() != before
    }

    pub fn has_bundle(&self, name: &str) -> bool {
        self.bundled_options.iter().any(|b| b == name)
    }

    /// Append a bundle to the selection. Returns false if already chosen.
    pub fn add_bundle(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if self.has_bundle(&name) {
            return false;
        }
        self.bundled_options.push(name);
        true
    }

    /// Remove a bundle from the selection. Returns whether it was chosen.
    pub fn remove_bundle(&mut self, name: &str) -> bool {
        let before = self.bundled_options.len();
        self.bundled_options.retain(|b| b != name);
        self.bundled_options.len() != before
    }
}
