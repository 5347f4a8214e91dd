//! Configuration loading and validation
//!
//! Configuration is a small YAML document; every key is optional and falls
//! back to its default, so an absent file is a valid configuration:
//!
//! ```yaml
//! websocket:
//!   port: 9090
//!   max_message_size: 65536
//!   idle_timeout: 60
//!   enable_deflate: true
//!   ping_interval: 30
//!   auto_ping_pong: true
//! storage:
//!   path: relay.db
//! ```

use crate::core::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    /// WebSocket transport tunables.
    #[serde(default)]
    pub websocket: WebSocketConfig,

    /// Message store location.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Tunables controlling WebSocket behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Listen port; validated to the 1024-65535 range.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum accepted frame size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Seconds without a read after which an idle connection is closed.
    /// Zero disables the idle timer.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,

    /// Negotiate per-message compression. Parsed but not honored: axum's
    /// WebSocket upgrade exposes no permessage-deflate hook, so frames go
    /// out uncompressed regardless of this value.
    #[serde(default = "default_true")]
    pub enable_deflate: bool,

    /// Seconds between server-initiated pings. Zero disables server pings.
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,

    /// Automatically answer control frames. Parsed but not gateable: the
    /// transport always replies to inbound pings itself and exposes no
    /// switch to turn that off, so this behaves as permanently `true`.
    #[serde(default = "default_true")]
    pub auto_ping_pong: bool,
}

/// Message store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path of the sqlite database file.
    #[serde(default = "default_storage_path")]
    pub path: String,
}

fn default_port() -> u16 {
    9090
}

fn default_max_message_size() -> usize {
    64 * 1024
}

fn default_idle_timeout() -> u64 {
    60
}

fn default_ping_interval() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_storage_path() -> String {
    "relay.db".to_string()
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            max_message_size: default_max_message_size(),
            idle_timeout: default_idle_timeout(),
            enable_deflate: true,
            ping_interval: default_ping_interval(),
            auto_ping_pong: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        let config: Self = serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            file: path.to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse {
            file: String::new(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.websocket.port < 1024 {
            return Err(ConfigError::InvalidPort {
                port: self.websocket.port,
            });
        }
        Ok(())
    }
}

impl WebSocketConfig {
    /// Idle timeout as a `Duration`; `None` when disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout > 0).then(|| Duration::from_secs(self.idle_timeout))
    }

    /// Ping interval as a `Duration`; `None` when disabled.
    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval > 0).then(|| Duration::from_secs(self.ping_interval))
    }
}
