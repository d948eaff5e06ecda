//! Session core configuration

use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Core configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub stage: StageConfig,
    pub layout: LayoutConfig,
    pub presence: PresenceConfig,
    pub subscription: SubscriptionConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

/// Stage capacity policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Containers at most this wide (px) count as narrow
    pub narrow_max_width: f64,
    /// Stage capacity for narrow containers
    pub narrow_capacity: usize,
    /// Stage capacity for wide containers
    pub wide_capacity: usize,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            narrow_max_width: 768.0,
            narrow_capacity: 2,
            wide_capacity: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Width / height every grid cell should approach
    pub target_aspect_ratio: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            target_aspect_ratio: 16.0 / 9.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Trailing debounce window for local flag changes
    pub debounce_ms: u64,
    /// Upper bound on how long a burst of changes may postpone a flush
    pub max_debounce_ms: u64,
    /// Full-state resend interval when nothing changes
    pub heartbeat_secs: u64,
}

impl PresenceConfig {
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    #[must_use]
    pub fn max_debounce(&self) -> Duration {
        Duration::from_millis(self.max_debounce_ms.max(self.debounce_ms))
    }

    #[must_use]
    pub const fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 150,
            max_debounce_ms: 1000,
            heartbeat_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Never subscribe to remote video, on stage or not
    pub data_saver: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Activity refresh tick
    pub refresh_interval_ms: u64,
}

impl SessionConfig {
    #[must_use]
    pub const fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl CoreConfig {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    ///
    /// The merged result is validated before it is returned.
    pub fn load(config_file: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // HUDDLE_PRESENCE__DEBOUNCE_MS, HUDDLE_STAGE__WIDE_CAPACITY, ...
        builder = builder.add_source(
            Environment::with_prefix("HUDDLE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self> {
        Self::load(Some(path))
    }

    /// Reject values the pipeline cannot work with
    pub fn validate(&self) -> Result<()> {
        let ratio = self.layout.target_aspect_ratio;
        if !ratio.is_finite() || ratio <= 0.0 {
            return Err(Error::InvalidInput(format!(
                "layout.target_aspect_ratio must be positive, got {ratio}"
            )));
        }
        if self.presence.debounce_ms == 0 {
            return Err(Error::InvalidInput(
                "presence.debounce_ms must be greater than zero".to_string(),
            ));
        }
        if self.presence.heartbeat_secs == 0 {
            return Err(Error::InvalidInput(
                "presence.heartbeat_secs must be greater than zero".to_string(),
            ));
        }
        if self.session.refresh_interval_ms == 0 {
            return Err(Error::InvalidInput(
                "session.refresh_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
