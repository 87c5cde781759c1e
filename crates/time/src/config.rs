//! Time model settings.
//!
//! Settings are plain serde structs so hosts can embed them in their own
//! configuration. A standalone TOML file is also supported:
//!
//! ```toml
//! [server]
//! publish_on_state_change = true
//! status_ttl = 0
//! force_segmented = false
//! transmic_size = "small"
//!
//! [client]
//! timeout_ms = 0   # 0 selects ACKNOWLEDGED_TRANSACTION_TIMEOUT
//! ```

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::TransMicSize;

/// Default lifetime of an acknowledged transaction.
pub const ACKNOWLEDGED_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// TTL of unsolicited Time Status publishes. Zero keeps time on a single
/// hop; relays carry it further.
pub const DEFAULT_TIME_STATUS_TTL: u8 = 0;

pub const ENV_PUBLISH_ON_CHANGE: &str = "MESH_TIME_PUBLISH_ON_CHANGE";
pub const ENV_CLIENT_TIMEOUT_MS: &str = "MESH_TIME_CLIENT_TIMEOUT_MS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}

/// Settings for the Time Server and the Time Setup Server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Publish the matching status after every successful state change.
    pub publish_on_state_change: bool,
    /// TTL used for unsolicited Time Status publishes, relays included.
    pub status_ttl: u8,
    pub force_segmented: bool,
    pub transmic_size: TransMicSize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            publish_on_state_change: true,
            status_ttl: DEFAULT_TIME_STATUS_TTL,
            force_segmented: false,
            transmic_size: TransMicSize::Small,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Acknowledged transaction timeout in milliseconds; `0` selects the default.
    pub timeout_ms: u64,
    pub force_segmented: bool,
    pub transmic_size: TransMicSize,
}

impl ClientSettings {
    pub fn timeout(&self) -> Duration {
        if self.timeout_ms == 0 {
            ACKNOWLEDGED_TRANSACTION_TIMEOUT
        } else {
            Duration::from_millis(self.timeout_ms)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeModelConfig {
    pub server: ServerSettings,
    pub client: ClientSettings,
}

impl TimeModelConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load a TOML file and apply environment overrides on top.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(value) = env::var(ENV_PUBLISH_ON_CHANGE) {
            self.server.publish_on_state_change = parse_env(ENV_PUBLISH_ON_CHANGE, &value)?;
        }
        if let Ok(value) = env::var(ENV_CLIENT_TIMEOUT_MS) {
            self.client.timeout_ms = parse_env(ENV_CLIENT_TIMEOUT_MS, &value)?;
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}
