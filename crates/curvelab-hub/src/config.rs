//! Hub configuration: TOML file with CLI overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::HubError;

/// Configuration values for running a session hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Address the WebSocket listener binds to.
    pub listen_addr: String,
    /// Seconds an empty session survives before the fast-path delete.
    pub idle_grace_secs: u64,
    /// Seconds between reaper scans for long-idle sessions.
    pub reap_scan_interval_secs: u64,
    /// Seconds of emptiness after which the reaper removes a session.
    pub reap_idle_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            idle_grace_secs: 60,
            reap_scan_interval_secs: 600,
            reap_idle_secs: 3600,
        }
    }
}

impl HubConfig {
    /// Load configuration from a TOML file. Missing keys fall back to the
    /// defaults.
    pub fn from_file(path: &Path) -> Result<Self, HubError> {
        let text = std::fs::read_to_string(path).map_err(|source| HubError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| HubError::ConfigParse {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = HubConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.idle_grace_secs, 60);
        assert_eq!(config.reap_scan_interval_secs, 600);
        assert_eq!(config.reap_idle_secs, 3600);
    }

    #[test]
    fn test_from_file_partial_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "listen_addr = \"127.0.0.1:9100\"").unwrap();
        let config = HubConfig::from_file(file.path()).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9100");
        assert_eq!(config.idle_grace_secs, 60);
    }

    #[test]
    fn test_from_file_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "listen_addr = [not toml").unwrap();
        assert!(HubConfig::from_file(file.path()).is_err());
    }
}
