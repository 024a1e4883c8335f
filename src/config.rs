use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{CleanupError, Result};
use crate::models::GroupField;

/// Run-wide settings. Built once at startup and passed by reference.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub delete: DeleteConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_secure_port")]
    pub secure_port: u16,
    #[serde(default = "default_plaintext_port")]
    pub plaintext_port: u16,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_probe_prefixes")]
    pub probe_prefixes: Vec<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            secure_port: default_secure_port(),
            plaintext_port: default_plaintext_port(),
            probe_timeout_ms: default_probe_timeout_ms(),
            probe_prefixes: default_probe_prefixes(),
        }
    }
}

impl ConnectionConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default)]
    pub default_field: GroupField,
    #[serde(default = "default_subject_max_chars")]
    pub subject_max_chars: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            default_field: GroupField::default(),
            subject_max_chars: default_subject_max_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_key_column_width")]
    pub key_column_width: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            key_column_width: default_key_column_width(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for DeleteConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

fn default_secure_port() -> u16 {
    993
}

fn default_plaintext_port() -> u16 {
    143
}

fn default_probe_timeout_ms() -> u64 {
    3000
}

fn default_probe_prefixes() -> Vec<String> {
    vec!["imap.".to_string(), "mail.".to_string(), "".to_string()]
}

fn default_subject_max_chars() -> usize {
    60
}

fn default_page_size() -> usize {
    20
}

fn default_key_column_width() -> usize {
    40
}

fn default_batch_size() -> usize {
    500
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CleanupError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            CleanupError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    CleanupError::ConfigError(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self).map_err(|e| {
            CleanupError::ConfigError(format!("Failed to serialize config: {}", e))
        })?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| CleanupError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.connection.secure_port == 0 || self.connection.plaintext_port == 0 {
            return Err(CleanupError::ConfigError(
                "connection ports must be greater than 0".to_string(),
            ));
        }

        // A zero timeout would make every probe fail
        if self.connection.probe_timeout_ms == 0 {
            return Err(CleanupError::ConfigError(
                "connection.probe_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.connection.probe_timeout_ms > 60_000 {
            return Err(CleanupError::ConfigError(
                "connection.probe_timeout_ms cannot exceed 60000".to_string(),
            ));
        }

        if self.connection.probe_prefixes.is_empty() {
            return Err(CleanupError::ConfigError(
                "connection.probe_prefixes cannot be empty".to_string(),
            ));
        }
        for prefix in &self.connection.probe_prefixes {
            if !prefix.is_empty() && !prefix.ends_with('.') {
                return Err(CleanupError::ConfigError(format!(
                    "connection.probe_prefixes entry '{}' must end with '.' or be empty",
                    prefix
                )));
            }
        }

        // Leave room for the ellipsis plus at least one character
        if self.scan.subject_max_chars < 4 {
            return Err(CleanupError::ConfigError(
                "scan.subject_max_chars must be at least 4".to_string(),
            ));
        }

        if self.display.page_size == 0 {
            return Err(CleanupError::ConfigError(
                "display.page_size must be at least 1".to_string(),
            ));
        }
        if self.display.key_column_width < 4 {
            return Err(CleanupError::ConfigError(
                "display.key_column_width must be at least 4".to_string(),
            ));
        }

        if self.delete.batch_size == 0 {
            return Err(CleanupError::ConfigError(
                "delete.batch_size must be at least 1".to_string(),
            ));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let config = Self::default();
        config.save(path).await
    }
}
