//! Configuration file support

use popstream_client::{RetryConfig, SessionConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for popstream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Optimization endpoint URL
    pub endpoint: Option<String>,
    /// Per-attempt connect and read timeout in milliseconds
    pub request_timeout_ms: Option<u64>,
    /// Automatic retries before giving up
    pub max_retries: Option<u32>,
    /// First backoff delay in milliseconds
    pub initial_delay_ms: Option<u64>,
    /// Backoff ceiling in milliseconds
    pub max_delay_ms: Option<u64>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("popstream")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("POPSTREAM_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                Self::default()
            }),
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let defaults = SessionConfig::default();
        let default_config = Config {
            endpoint: Some(defaults.endpoint),
            request_timeout_ms: Some(defaults.request_timeout.as_millis() as u64),
            max_retries: Some(defaults.retry.max_retries),
            initial_delay_ms: Some(defaults.retry.initial_delay.as_millis() as u64),
            max_delay_ms: Some(defaults.retry.max_delay.as_millis() as u64),
        };

        default_config.save()?;
        Ok(path)
    }

    /// Build session settings, filling unset keys with library defaults
    pub fn session_config(&self) -> SessionConfig {
        let defaults = SessionConfig::default();
        let retry = RetryConfig {
            max_retries: self.max_retries.unwrap_or(defaults.retry.max_retries),
            initial_delay: self
                .initial_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.initial_delay),
            max_delay: self
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.max_delay),
            ..defaults.retry
        };

        SessionConfig {
            endpoint: self.endpoint.clone().unwrap_or(defaults.endpoint),
            request_timeout: self
                .request_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_timeout),
            retry,
        }
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# popstream configuration file
# Place at ~/.config/popstream/config.toml (Linux), ~/Library/Application Support/popstream/config.toml (Mac)
# or %APPDATA%\popstream\config.toml (Windows). POPSTREAM_CONFIG_PATH overrides the location.

# Optimization endpoint
endpoint = "http://localhost:8000/optimize"

# Give up on an attempt after this long without a response or a body chunk
request_timeout_ms = 30000

# Automatic retries after the first failed attempt (0 disables retrying)
max_retries = 3

# Backoff doubles from initial_delay_ms up to max_delay_ms
initial_delay_ms = 1000
max_delay_ms = 60000
"#
}
