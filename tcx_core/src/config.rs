//! Configuration file support for tcxsync.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/tcxsync/config.toml`.

use crate::upload::Credentials;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub upload: UploadConfig,

    #[serde(default)]
    pub destination: Credentials,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where workouts come from and which ones to take
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,

    #[serde(default = "default_num_activities")]
    pub num_activities: usize,

    /// Source discipline labels to skip, matched case-insensitively
    #[serde(default)]
    pub exclude_disciplines: Vec<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            input_dir: default_input_dir(),
            num_activities: default_num_activities(),
            exclude_disciplines: Vec::new(),
        }
    }
}

/// Where built documents are written
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub directory: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
        }
    }
}

/// Destination upload behaviour
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,

    #[serde(default = "default_history_path")]
    pub history_path: PathBuf,

    #[serde(default = "default_upload_command")]
    pub command: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_interval_secs: default_min_interval_secs(),
            history_path: default_history_path(),
            command: default_upload_command(),
        }
    }
}

impl UploadConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions
fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tcxsync")
}

fn default_input_dir() -> PathBuf {
    data_dir().join("downloads")
}

fn default_output_dir() -> PathBuf {
    data_dir().join("output")
}

fn default_history_path() -> PathBuf {
    data_dir().join("upload_history.jsonl")
}

fn default_num_activities() -> usize {
    5
}

fn default_min_interval_secs() -> u64 {
    2
}

fn default_upload_command() -> String {
    "gupload".into()
}

fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tcxsync")
            .join("config.toml")
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Reject settings that can't produce a working run
    pub fn validate(&self) -> Result<()> {
        if self.source.num_activities == 0 {
            return Err(Error::Config("source.num_activities must be at least 1".into()));
        }
        if self.upload.enabled {
            if !self.destination.is_complete() {
                return Err(Error::Config(
                    "upload is enabled but destination email/password are missing".into(),
                ));
            }
            if self.upload.command.trim().is_empty() {
                return Err(Error::Config("upload.command must not be empty".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.source.num_activities, 5);
        assert!(config.source.exclude_disciplines.is_empty());
        assert!(!config.upload.enabled);
        assert_eq!(config.upload.min_interval(), Duration::from_secs(2));
        assert_eq!(config.upload.command, "gupload");
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");

        let mut config = Config::default();
        config.source.exclude_disciplines = vec!["yoga".into(), "meditation".into()];
        config.upload.min_interval_secs = 7;
        config.save_to(&path).unwrap();

        let parsed = Config::load_from(&path).unwrap();
        assert_eq!(parsed.upload.min_interval_secs, 7);
        assert_eq!(
            parsed.source.exclude_disciplines,
            vec!["yoga", "meditation"]
        );
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[source]
num_activities = 12
exclude_disciplines = ["strength", "Rowing"]

[upload]
enabled = true

[destination]
email = "rider@example.com"
password = "hunter2"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.source.num_activities, 12);
        assert_eq!(
            config.source.exclude_disciplines,
            vec!["strength", "Rowing"]
        );
        assert!(config.upload.enabled);
        assert_eq!(config.upload.min_interval_secs, 2); // default
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_upload_without_credentials_is_invalid() {
        let mut config = Config::default();
        config.upload.enabled = true;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_activities_is_invalid() {
        let mut config = Config::default();
        config.source.num_activities = 0;
        assert!(config.validate().is_err());
    }
}
