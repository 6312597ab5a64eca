//! Configuration management for Wishare clients
//!
//! Config files are stored in platform-appropriate locations:
//! - Linux: ~/.config/wishare/
//! - macOS: ~/Library/Application Support/wishare/
//! - Windows: %APPDATA%\wishare\

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Config directory not found")]
    NoDirFound,
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

/// Backend REST API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL including the `/api` prefix
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Token and session handling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Refresh when the access token has less than this many seconds left
    #[serde(default = "default_refresh_threshold")]
    pub refresh_threshold_secs: u64,

    /// Session monitor polling interval
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_ms: u64,

    /// Expose `AuthSession::debug_view`
    #[serde(default)]
    pub debug: bool,

    /// Where durable and tab storage files live
    pub storage_dir: Option<PathBuf>,
}

fn default_base_url() -> String {
    crate::DEFAULT_API_URL.to_string()
}
fn default_timeout() -> u64 {
    30
}
fn default_refresh_threshold() -> u64 {
    crate::DEFAULT_REFRESH_THRESHOLD_SECS
}
fn default_monitor_interval() -> u64 {
    crate::DEFAULT_MONITOR_INTERVAL_MS
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_threshold_secs: default_refresh_threshold(),
            monitor_interval_ms: default_monitor_interval(),
            debug: false,
            storage_dir: None,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl SessionConfig {
    pub fn refresh_threshold(&self) -> Duration {
        Duration::from_secs(self.refresh_threshold_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    /// Configured storage directory, else the platform data dir
    pub fn storage_dir(&self) -> Result<PathBuf, ConfigError> {
        match self.storage_dir {
            Some(ref dir) => Ok(dir.clone()),
            None => dirs::data_dir()
                .map(|p| p.join("wishare"))
                .ok_or(ConfigError::NoDirFound),
        }
    }
}

impl Config {
    /// Get config directory path
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|p| p.join("wishare"))
            .ok_or(ConfigError::NoDirFound)
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load config from default location
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load config from specific path
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save config to default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path()?)
    }

    /// Save config to specific path
    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api.base_url, "http://localhost:8000/api");
        assert_eq!(config.session.refresh_threshold(), Duration::from_secs(300));
        assert_eq!(config.session.monitor_interval(), Duration::from_millis(5000));
        assert!(!config.session.debug);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [session]
            debug = true
            storage_dir = "/var/lib/wishare"
            "#,
        )
        .unwrap();

        assert!(config.session.debug);
        assert_eq!(config.session.refresh_threshold_secs, 300);
        assert_eq!(
            config.session.storage_dir().unwrap(),
            PathBuf::from("/var/lib/wishare")
        );
        assert_eq!(config.api.timeout_secs, 30);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.api.base_url = "https://wishare.example/api".to_string();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.api.base_url, "https://wishare.example/api");
        assert!(std::fs::read_to_string(&path).unwrap().contains("[api]"));
    }
}
