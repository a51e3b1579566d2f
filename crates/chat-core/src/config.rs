//! Server settings.
//!
//! Settings are shared across platforms. The Linux host reads them from a
//! JSON file; the device build fills them in from compiled-in defaults.
//! Every field is optional in the file and falls back to its default.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::DEFAULT_CAPACITY;
use crate::persist::PersistPolicy;
use crate::store::StoreConfig;

/// Errors raised while loading settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

// ============================================================================
// Delivery
// ============================================================================

/// How new messages reach connected clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Server-Sent Events over a held-open connection.
    #[default]
    Push,
    /// Clients poll with a timestamp cursor.
    Pull,
}

/// Timings and limits for push streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamSettings {
    pub max_clients: usize,
    /// Registry entries idle for longer than this are purged.
    pub stale_after_secs: u64,
    pub probe_interval_secs: u64,
    pub ping_interval_secs: u64,
    pub max_lifetime_secs: u64,
    /// Reconnect hint sent with every event.
    pub retry_ms: u64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            max_clients: 10,
            stale_after_secs: 300,
            probe_interval_secs: 2,
            ping_interval_secs: 10,
            max_lifetime_secs: 600,
            retry_ms: 3000,
        }
    }
}

// ============================================================================
// Top-level settings
// ============================================================================

/// Top-level server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatSettings {
    pub bind_addr: String,
    /// Directory for the durable message namespace.
    pub data_dir: PathBuf,
    /// Static frontend directory, served for unknown paths.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_root: Option<PathBuf>,
    pub capacity: usize,
    pub cache_ttl_secs: u32,
    pub lock_timeout_ms: u64,
    pub delivery: DeliveryMode,
    pub persistence: PersistPolicy,
    pub stream: StreamSettings,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            data_dir: PathBuf::from(".chat"),
            web_root: None,
            capacity: DEFAULT_CAPACITY,
            cache_ttl_secs: 30,
            lock_timeout_ms: 1000,
            delivery: DeliveryMode::default(),
            persistence: PersistPolicy::default(),
            stream: StreamSettings::default(),
        }
    }
}

impl ChatSettings {
    /// Load settings from `path`. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no settings file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let settings: Self = serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the store and registry cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::Invalid("capacity must be at least 1".into()));
        }
        if self.stream.max_clients == 0 {
            return Err(ConfigError::Invalid(
                "stream.maxClients must be at least 1".into(),
            ));
        }
        if self.stream.probe_interval_secs == 0 || self.stream.ping_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "stream intervals must be at least 1 second".into(),
            ));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            capacity: self.capacity,
            cache_ttl_secs: self.cache_ttl_secs,
            lock_timeout: self.lock_timeout(),
        }
    }
}
