//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TurnstileError};
use crate::lockout::Policy;

/// Main configuration for the Turnstile driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Limiter policy
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Limiter policy as written in configuration.
///
/// Values are validated when converted with [`LimiterConfig::to_policy`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Failures allowed within the window before lockout
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Sliding window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Lockout length in seconds
    #[serde(default = "default_lockout_secs")]
    pub lockout_secs: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            window_secs: default_window_secs(),
            lockout_secs: default_lockout_secs(),
        }
    }
}

fn default_max_attempts() -> usize {
    5
}

fn default_window_secs() -> u64 {
    300
}

fn default_lockout_secs() -> u64 {
    900
}

impl LimiterConfig {
    /// Validate into a [`Policy`].
    pub fn to_policy(&self) -> Result<Policy> {
        Policy::new(
            self.max_attempts,
            Duration::from_secs(self.window_secs),
            Duration::from_secs(self.lockout_secs),
        )
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON log lines instead of human-readable ones
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TurnstileConfig {
    /// Load configuration from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse configuration: {}", e)))
    }
}
