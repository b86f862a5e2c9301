//! Device configuration for a live session.
//!
//! Stored as a small JSON file next to the app's other settings. Every field
//! has a default, so a partial file (or none at all) is valid.

use crate::cue::CueTarget;
use crate::error::ConfigError;
use crate::midi::{clamp_bpm, DEFAULT_BPM};
use crate::transport::{Identity, Role};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LiveConfig {
    /// Sync server URL. No sync link is opened when unset.
    pub sync_url: Option<String>,
    /// Bridge process URL. Cues and clock go nowhere when unset.
    pub bridge_url: Option<String>,
    pub role: Role,
    pub room_id: String,
    /// Stable device id; generated per run when unset.
    pub device_id: Option<String>,
    pub reconnect_interval_ms: u64,
    pub poll_interval_ms: u64,
    pub default_bpm: f64,
    pub cue: CueTarget,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            sync_url: None,
            bridge_url: None,
            role: Role::Follower,
            room_id: "main".to_string(),
            device_id: None,
            reconnect_interval_ms: 3_000,
            poll_interval_ms: 100,
            default_bpm: DEFAULT_BPM,
            cue: CueTarget::default(),
        }
    }
}

impl LiveConfig {
    /// Loads and validates a config file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, is not valid JSON, or holds
    /// unusable values.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Saves the config as pretty-printed JSON.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Clamps the tempo and rejects values the session cannot run with.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        for (field, url) in [("syncUrl", &self.sync_url), ("bridgeUrl", &self.bridge_url)] {
            if let Some(url) = url {
                if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                    return Err(ConfigError::Invalid {
                        field,
                        reason: format!("{url} is not a ws:// or wss:// URL"),
                    });
                }
            }
        }
        if self.reconnect_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "reconnectIntervalMs",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "pollIntervalMs",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.room_id.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "roomId",
                reason: "must not be empty".to_string(),
            });
        }
        self.default_bpm = clamp_bpm(self.default_bpm);
        Ok(self)
    }

    /// The identity announced in `HELLO`.
    pub fn identity(&self) -> Identity {
        match &self.device_id {
            Some(device_id) => Identity::new(self.role, self.room_id.clone(), device_id.clone()),
            None => Identity::generated(self.role, self.room_id.clone()),
        }
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cue::LyricSoftware;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config =
            LiveConfig::from_json(r#"{"syncUrl":"ws://10.0.0.5:8080","role":"host"}"#).unwrap();
        assert_eq!(config.sync_url.as_deref(), Some("ws://10.0.0.5:8080"));
        assert_eq!(config.role, Role::Host);
        assert_eq!(config.reconnect_interval(), Duration::from_secs(3));
        assert_eq!(config.poll_interval_ms, 100);
        assert_eq!(config.default_bpm, 120.0);
        assert_eq!(config.cue.software, LyricSoftware::ProPresenter);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let err = LiveConfig::from_json(r#"{"bridgeUrl":"http://bridge"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "bridgeUrl", .. }));

        let err = LiveConfig::from_json(r#"{"pollIntervalMs":0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "pollIntervalMs", .. }));

        let err = LiveConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validate_clamps_bpm() {
        let config = LiveConfig::from_json(r#"{"defaultBpm":900}"#).unwrap();
        assert_eq!(config.default_bpm, 300.0);
    }

    #[test]
    fn test_identity_keeps_configured_device_id() {
        let mut config = LiveConfig::default();
        config.device_id = Some("ipad-keys".to_string());
        assert_eq!(config.identity().device_id, "ipad-keys");

        config.device_id = None;
        assert_ne!(config.identity().device_id, config.identity().device_id);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.json");

        let mut config = LiveConfig::default();
        config.bridge_url = Some("ws://127.0.0.1:7070".to_string());
        config.cue = CueTarget::new(LyricSoftware::OpenLp, "192.168.1.40");
        config.save_to_file(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"bridgeUrl\""));
        assert!(text.contains("\"reconnectIntervalMs\": 3000"));

        let loaded = LiveConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = LiveConfig::load_from_file("/nonexistent/live.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
