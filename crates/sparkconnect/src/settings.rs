//! Panel settings persistence.
//!
//! Settings are stored as JSON in the user's config directory (see
//! [`crate::default_settings_path`]). Missing files and missing fields fall
//! back to defaults, so an empty `{}` is a valid settings file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::logs::DisplayPolicy;

/// Error type for settings that cannot be loaded or saved.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to access settings at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings in {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Tunables for the panel core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Settings {
    /// How often (in milliseconds) the connection log display is refreshed.
    pub refresh_interval_ms: u64,

    /// Number of log lines above which the display is truncated.
    pub log_display_limit: usize,

    /// Lines dropped from the display limit when truncating; the display then
    /// shows the last `log_display_limit - log_truncate_offset` lines.
    pub log_truncate_offset: usize,

    /// Comm target registered by the kernel-side backend.
    pub comm_target: String,

    /// Notebook metadata key holding the persisted connection configuration.
    pub metadata_key: String,

    /// First line shown while a connection is being established.
    pub connecting_banner: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 1000,
            log_display_limit: 5000,
            log_truncate_offset: 1000,
            comm_target: sparkconn_protocol::COMM_TARGET.to_string(),
            metadata_key: sparkconn_protocol::METADATA_KEY.to_string(),
            connecting_banner: "Waiting for spark context to start".to_string(),
        }
    }
}

impl Settings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms.max(1))
    }

    pub fn display_policy(&self) -> DisplayPolicy {
        DisplayPolicy {
            limit: self.log_display_limit,
            truncate_offset: self.log_truncate_offset,
        }
    }
}

/// Load settings from disk, returning defaults if the file doesn't exist.
pub fn load_settings(path: &Path) -> Result<Settings, SettingsError> {
    if !path.exists() {
        info!("[settings] No settings at {:?}, using defaults", path);
        return Ok(Settings::default());
    }

    let contents = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let settings = serde_json::from_str(&contents).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    info!("[settings] Loaded settings from {:?}", path);
    Ok(settings)
}

/// Write settings to disk, creating the parent directory if needed.
pub fn save_settings(path: &Path, settings: &Settings) -> Result<(), SettingsError> {
    let io_err = |source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, json).map_err(io_err)
}

/// JSON Schema for the settings file, for editor completion.
pub fn settings_schema() -> schemars::Schema {
    schemars::schema_for!(Settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = load_settings(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.refresh_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"log_display_limit": 10}"#).unwrap();

        let settings = load_settings(&path).unwrap();
        assert_eq!(settings.log_display_limit, 10);
        assert_eq!(settings.log_truncate_offset, 1000);
        assert_eq!(settings.comm_target, "SparkConnector");
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = load_settings(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = Settings {
            refresh_interval_ms: 250,
            metadata_key: "spark".to_string(),
            ..Settings::default()
        };

        save_settings(&path, &settings).unwrap();
        assert_eq!(load_settings(&path).unwrap(), settings);
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let settings = Settings {
            refresh_interval_ms: 0,
            ..Settings::default()
        };
        assert_eq!(settings.refresh_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_schema_lists_fields() {
        let schema = serde_json::to_value(settings_schema()).unwrap();
        let properties = schema["properties"].as_object().unwrap();
        assert!(properties.contains_key("refresh_interval_ms"));
        assert!(properties.contains_key("metadata_key"));
    }
}
