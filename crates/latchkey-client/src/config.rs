//! Client configuration management.
//!
//! Configuration is read from a TOML file (when present) and then
//! overridden by environment variables, so a deployment can ship a file
//! while a developer overrides the API URL per shell:
//!
//! - `LATCHKEY_API_URL` - backend base URL
//! - `LATCHKEY_TIMEOUT_SECS` - per-request timeout
//! - `LATCHKEY_LOG_LEVEL` - tracing filter (read by the logging module)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read or written.
    #[error("config I/O error at {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The config file exists but is not valid TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A field failed validation.
    #[error("invalid config: {field}: {message}")]
    Validation {
        /// Offending field.
        field: &'static str,
        /// What was wrong.
        message: String,
    },
}

/// Retry bounds for token issuance, mirrored into
/// [`latchkey_core::RetryPolicy`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum creation requests per issuance.
    pub max_attempts: u32,

    /// Delay between attempts after a conflict, in milliseconds.
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            backoff_ms: 50,
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Backend base URL.
    pub base_url: String,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Token issuance retry bounds.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            request_timeout_secs: 10,
            retry: RetryConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from the given path, falling back to defaults
    /// when the file does not exist, then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed, or
    /// if the resulting configuration is invalid.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the given path, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Default config file location.
    #[must_use]
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("", "", "latchkey")
            .map_or_else(|| PathBuf::from("latchkey.toml"), |dirs| {
                dirs.config_dir().join("config.toml")
            })
    }

    /// Per-request timeout as a [`Duration`].
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Retry bounds as a core [`latchkey_core::RetryPolicy`].
    #[must_use]
    pub const fn retry_policy(&self) -> latchkey_core::RetryPolicy {
        latchkey_core::RetryPolicy {
            max_attempts: self.retry.max_attempts,
            backoff: Duration::from_millis(self.retry.backoff_ms),
        }
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("LATCHKEY_API_URL") {
            if !url.trim().is_empty() {
                self.base_url = url;
            }
        }
        if let Some(secs) = std::env::var("LATCHKEY_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.request_timeout_secs = secs;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if url::Url::parse(&self.base_url).is_err() {
            return Err(ConfigError::Validation {
                field: "base_url",
                message: format!("'{}' is not a valid URL", self.base_url),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Validation {
                field: "retry.max_attempts",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
