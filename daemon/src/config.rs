// Configuration management for bluehostd
//
// Stored in the platform config directory:
// - Linux: ~/.config/bluehost/config.json

use anyhow::{Context, Result};
use bluehost_core::HostConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DaemonConfig {
    /// Adapter defaults applied to every controller.
    #[serde(default)]
    pub host: HostConfig,

    /// Override for the adapter settings database location.
    pub storage_path: Option<String>,
}

impl DaemonConfig {
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("failed to determine config directory")?
            .join("bluehost");

        std::fs::create_dir_all(&config_dir).context("failed to create config directory")?;

        Ok(config_dir)
    }

    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("failed to determine data directory")?
            .join("bluehost");

        std::fs::create_dir_all(&data_dir).context("failed to create data directory")?;

        Ok(data_dir)
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load from the given file, or fall back to defaults when it does
    /// not exist.
    pub fn load(path: &PathBuf) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("failed to read config file")?;
            let config: DaemonConfig =
                serde_json::from_str(&contents).context("failed to parse config file")?;
            Ok(config)
        } else {
            Ok(DaemonConfig::default())
        }
    }

    pub fn save(&self, path: &PathBuf) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, contents).context("failed to write config file")?;
        Ok(())
    }

    /// Resolved location of the adapter settings database.
    pub fn storage_path(&self) -> Result<PathBuf> {
        match &self.storage_path {
            Some(path) => Ok(PathBuf::from(path)),
            None => Ok(Self::data_dir()?.join("adapters")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(config.host.name, "%h-%d");
        assert!(config.storage_path.is_none());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = DaemonConfig::default();
        config.host.name = "test-adapter".to_string();
        config.storage_path = Some("/var/lib/bluehost".to_string());
        config.save(&path).unwrap();

        let loaded = DaemonConfig::load(&path).unwrap();
        assert_eq!(loaded.host.name, "test-adapter");
        assert_eq!(loaded.storage_path.as_deref(), Some("/var/lib/bluehost"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"host": {"name": "custom"}}"#).unwrap();

        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(config.host.name, "custom");
        assert_eq!(config.host.page_timeout, 8192);
    }
}
