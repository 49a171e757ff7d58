//! Configuration file handling for ~/.querymonitor/config.ini.
//!
//! Loads and saves monitor configuration with sensible defaults.
//! Settings structs live in [`super::settings`], constants in [`super::defaults`],
//! parsing in [`super::parser`], and serialization in [`super::writer`].

use ini::Ini;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use super::settings::*;

use crate::expiration::{ExpirationPolicy, PolicyError};

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// The file exists but is not valid INI
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    #[error("Failed to write config file: {0}")]
    WriteError(String),

    /// A key holds a value the monitor cannot use
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    /// Expiration thresholds are inconsistent
    #[error("Invalid expiration policy: {0}")]
    Policy(#[from] PolicyError),

    #[error("Failed to create config directory: {0}")]
    DirectoryError(std::io::Error),
}

impl ConfigFile {
    /// Load configuration from the default path (~/.querymonitor/config.ini).
    pub fn load() -> Result<Self, ConfigFileError> {
        let path = config_file_path();
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults. The expiration section is
    /// validated by deriving a policy from it, so a file that loads is always
    /// usable by the monitor.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        let config = super::parser::parse_ini(&ini)?;
        config.expiration_policy()?;
        Ok(config)
    }

    /// Parse configuration from INI text.
    pub fn from_ini_str(text: &str) -> Result<Self, ConfigFileError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigFileError::InvalidValue {
            section: String::new(),
            key: String::new(),
            value: String::new(),
            reason: e.to_string(),
        })?;
        let config = super::parser::parse_ini(&ini)?;
        config.expiration_policy()?;
        Ok(config)
    }

    /// Derive the expiration policy described by the `[expiration]` section.
    pub fn expiration_policy(&self) -> Result<ExpirationPolicy, PolicyError> {
        ExpirationPolicy::from_settings(&self.expiration)
    }

    /// Render the configuration as the INI text `save_to` would write.
    pub fn to_config_string(&self) -> String {
        super::writer::to_config_string(self)
    }

    /// Save configuration to the default path (~/.querymonitor/config.ini).
    pub fn save(&self) -> Result<(), ConfigFileError> {
        let path = config_file_path();
        self.save_to(&path)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigFileError::DirectoryError)?;
        }

        std::fs::write(path, self.to_config_string())
            .map_err(|e| ConfigFileError::WriteError(e.to_string()))
    }
}

/// Get the path to the config directory (~/.querymonitor).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".querymonitor")
}

/// Get the path to the config file (~/.querymonitor/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::units::TimedValue;
    use crate::config::DEFAULT_CONNECTION_POOL;

    #[test]
    fn test_default_config() {
        let config = ConfigFile::default();

        assert_eq!(config.monitor.interval, TimedValue::seconds(30));
        assert_eq!(config.monitor.lock_wait, TimedValue::millis(0));
        assert_eq!(config.monitor.inactive_query_ttl, TimedValue::days(1));
        assert_eq!(config.executor_status.lock_wait, TimedValue::seconds(30));
        assert_eq!(
            config.executor_status.default_connection_pool,
            DEFAULT_CONNECTION_POOL
        );
        assert_eq!(config.expiration.idle_timeout, TimedValue::minutes(15));
    }

    #[test]
    fn test_load_nonexistent_returns_defaults() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.ini");

        let config = ConfigFile::load_from(&config_path).unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_save_then_load_preserves_settings() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.ini");

        let mut config = ConfigFile::default();
        config.monitor.interval = TimedValue::minutes(2);
        config.expiration.short_circuit_timeout = Some(TimedValue::seconds(90));
        config.executor_status.default_connection_pool = "ETL".to_string();
        config.save_to(&config_path).unwrap();

        let loaded = ConfigFile::load_from(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_rejects_inconsistent_policy() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.ini");
        std::fs::write(
            &config_path,
            "[expiration]\npage_min_timeout = 2\npage_min_timeout_unit = hours\n",
        )
        .unwrap();

        let err = ConfigFile::load_from(&config_path).unwrap_err();
        assert!(matches!(err, ConfigFileError::Policy(_)));
    }
}
