//! Channel configuration.
//!
//! Read from `~/.config/tars/config.json` by default. The file may hold the
//! channel section directly, or a host config with the section nested under
//! `channels["tars-channel"]`:
//!
//! ```json
//! { "enabled": true, "socketPath": "/tmp/tars-channel.sock" }
//! { "channels": { "tars-channel": { "enabled": true } } }
//! ```

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::channel::CHANNEL_ID;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,
}

impl ChannelConfig {
    /// Default config file location (`<config dir>/tars/config.json`).
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "tars").map(|dirs| dirs.config_dir().join("config.json"))
    }

    /// Load the config file, falling back to defaults if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        let value: serde_json::Value = serde_json::from_str(&content)?;
        Self::from_value(value)
    }

    /// Extract the channel section from either config shape.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Json` if the section has the wrong shape.
    pub fn from_value(mut value: serde_json::Value) -> Result<Self, ConfigError> {
        if let Some(channels) = value.get_mut("channels") {
            return match channels.get_mut(CHANNEL_ID) {
                Some(section) => Ok(serde_json::from_value(section.take())?),
                None => Ok(Self::default()),
            };
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Socket path to bind, falling back to the protocol default.
    #[must_use]
    pub fn resolved_socket_path(&self) -> PathBuf {
        self.socket_path
            .clone()
            .unwrap_or_else(tars_protocol::socket_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_is_disabled() {
        let config = ChannelConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.resolved_socket_path(), tars_protocol::socket_path());
    }

    #[test]
    fn test_flat_config() {
        let config = ChannelConfig::from_value(json!({
            "enabled": true,
            "socketPath": "/run/tars/display.sock"
        }))
        .unwrap();

        assert!(config.enabled);
        assert_eq!(
            config.resolved_socket_path(),
            PathBuf::from("/run/tars/display.sock")
        );
    }

    #[test]
    fn test_host_config_section() {
        let config = ChannelConfig::from_value(json!({
            "channels": {
                "tars-channel": { "enabled": true, "port": 3030 },
                "other": { "enabled": false }
            }
        }))
        .unwrap();

        assert!(config.enabled);
        assert!(config.socket_path.is_none());
    }

    #[test]
    fn test_host_config_without_section() {
        let config = ChannelConfig::from_value(json!({ "channels": {} })).unwrap();
        assert_eq!(config, ChannelConfig::default());
    }

    #[test]
    fn test_wrong_types_are_rejected() {
        let result = ChannelConfig::from_value(json!({ "enabled": "yes" }));
        assert!(matches!(result, Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ChannelConfig::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, ChannelConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"enabled": true, "socketPath": "/tmp/x.sock"}"#).unwrap();

        let config = ChannelConfig::load(&path).unwrap();
        assert!(config.enabled);
        assert_eq!(config.socket_path, Some(PathBuf::from("/tmp/x.sock")));
    }

    #[test]
    fn test_load_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            ChannelConfig::load(&path),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_serialize_camel_case() {
        let config = ChannelConfig {
            enabled: true,
            socket_path: Some(PathBuf::from("/tmp/a.sock")),
        };
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value, json!({ "enabled": true, "socketPath": "/tmp/a.sock" }));
    }
}
