//! Configuration management for the Home Assistant scene engine
//!
//! Settings are read from `settings.toml` in the data directory and then
//! overridden by environment variables, which always take precedence.

use crate::error::{HassError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::{env, fs, time::Duration};
use tracing::debug;
use url::Url;

/// Name of the settings file inside the data directory
pub const SETTINGS_FILE: &str = "settings.toml";

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Home Assistant connection configuration
    pub hass: HassConfig,

    /// Scene engine timing and behaviour
    pub engine: EngineConfig,

    /// Local backup storage configuration
    pub storage: StorageConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Home Assistant connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HassConfig {
    /// Base URL (e.g., "http://homeassistant.local:8123")
    pub url: Url,

    /// Long-lived access token
    pub token: String,

    /// HTTP request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Maximum attempts per remote call
    pub max_retries: u32,

    /// Base delay for linear retry backoff
    #[serde(with = "humantime_serde")]
    pub retry_base_delay: Duration,

    /// Enable SSL/TLS verification
    pub verify_ssl: bool,
}

/// Scene engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound for a single device command including retries
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,

    /// Upper bound for one device metadata lookup including retries
    #[serde(with = "humantime_serde")]
    pub metadata_timeout: Duration,

    /// Pause between consecutive device commands
    #[serde(with = "humantime_serde")]
    pub pacing_delay: Duration,

    /// Pause between the colour and brightness phase of split-sequenced devices
    #[serde(with = "humantime_serde")]
    pub mode_switch_delay: Duration,

    /// Pause after the exclusive-mode baseline turn-off
    #[serde(with = "humantime_serde")]
    pub exclusive_settle_delay: Duration,

    /// Pause before the verification sweep re-queries device states
    #[serde(with = "humantime_serde")]
    pub verification_settle_delay: Duration,

    /// Persist resolution changes (merges, restores, adaptations) when activating
    pub auto_repair_on_activate: bool,
}

/// Local backup storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the settings file and the scene backup
    pub data_dir: PathBuf,

    /// File name of the scene backup document
    pub backup_file: String,

    /// Maximum number of snapshots retained system-wide
    pub max_snapshots: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable structured JSON logging
    pub json_format: bool,

    /// Log to file (path)
    pub file: Option<String>,
}

impl Default for HassConfig {
    fn default() -> Self {
        Self {
            url: Url::parse("http://homeassistant.local:8123").expect("static URL is valid"),
            token: String::new(),
            timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
            verify_ssl: true,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(5),
            metadata_timeout: Duration::from_secs(2),
            pacing_delay: Duration::from_millis(50),
            mode_switch_delay: Duration::from_millis(500),
            exclusive_settle_delay: Duration::from_millis(500),
            verification_settle_delay: Duration::from_millis(300),
            auto_repair_on_activate: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backup_file: "scene_backup.json".to_string(),
            max_snapshots: 50,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            file: None,
        }
    }
}

/// Default data directory (`~/.hass-scenes-mcp`)
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hass-scenes-mcp")
}

impl StorageConfig {
    /// Full path of the scene backup document
    pub fn backup_path(&self) -> PathBuf {
        self.data_dir.join(&self.backup_file)
    }

    /// Full path of the settings file
    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(SETTINGS_FILE)
    }
}

impl ServerConfig {
    /// Load settings file (if present) from the data directory, then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let data_dir = env::var("HASS_SCENES_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        let settings_path = data_dir.join(SETTINGS_FILE);
        let mut config = if settings_path.exists() {
            Self::from_file(&settings_path)?
        } else {
            debug!("No settings file at {}", settings_path.display());
            Self::default()
        };
        config.storage.data_dir = data_dir;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML settings file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            HassError::config(format!("Failed to read {}: {e}", path.display()))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment variables on top of the current values
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(url) = env::var("HASS_URL") {
            self.hass.url = url
                .parse()
                .map_err(|e| HassError::config(format!("Invalid HASS_URL: {e}")))?;
        }

        if let Ok(token) = env::var("HASS_TOKEN") {
            self.hass.token = token;
        }

        if let Ok(timeout) = env::var("HASS_TIMEOUT") {
            self.hass.timeout = Duration::from_secs(
                timeout
                    .parse()
                    .map_err(|e| HassError::config(format!("Invalid HASS_TIMEOUT: {e}")))?,
            );
        }

        if let Ok(verify) = env::var("HASS_VERIFY_SSL") {
            self.hass.verify_ssl = !matches!(verify.to_lowercase().as_str(), "false" | "0" | "no");
        }

        if let Ok(dir) = env::var("HASS_SCENES_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }

        if let Ok(level) = env::var("RUST_LOG") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.hass.url.scheme() != "http" && self.hass.url.scheme() != "https" {
            return Err(HassError::config("HASS_URL must use http or https scheme"));
        }

        if self.hass.token.trim().is_empty() {
            return Err(HassError::config(
                "Access token missing. Set HASS_TOKEN or add `token` to the [hass] section of settings.toml",
            ));
        }

        if self.hass.timeout.is_zero() {
            return Err(HassError::config("Timeout must be greater than zero"));
        }

        if self.hass.max_retries == 0 {
            return Err(HassError::config("max_retries must be at least 1"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.hass.max_retries, 3);
        assert_eq!(config.engine.pacing_delay, Duration::from_millis(50));
        assert_eq!(config.engine.mode_switch_delay, Duration::from_millis(500));
        assert_eq!(config.storage.max_snapshots, 50);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_settings_file_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(
            &path,
            r#"
[hass]
url = "http://10.0.0.5:8123"
token = "abc"
timeout = "3s"

[engine]
pacing_delay = "80ms"
auto_repair_on_activate = false

[storage]
max_snapshots = 5
"#,
        )
        .unwrap();

        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.hass.url.as_str(), "http://10.0.0.5:8123/");
        assert_eq!(config.hass.timeout, Duration::from_secs(3));
        assert_eq!(config.engine.pacing_delay, Duration::from_millis(80));
        assert_eq!(config.engine.mode_switch_delay, Duration::from_millis(500));
        assert!(!config.engine.auto_repair_on_activate);
        assert_eq!(config.storage.max_snapshots, 5);
        assert!(config.validate().is_ok());
    }
}
