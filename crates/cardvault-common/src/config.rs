//! Configuration types for CardVault
//!
//! This module defines the configuration shared by every wrapped storage
//! instance a process opens.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for wrapped storage instances
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one sub-directory per storage instance
    pub data_dir: PathBuf,
    /// Snapshot rotation configuration
    pub rotation: RotationConfig,
    /// Per-instance log configuration
    pub log: LogConfig,
}

impl StoreConfig {
    /// Create config rooted at the given data directory
    pub fn with_data_dir(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Parse a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Configuration(format!("invalid config: {e}")))
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }
}

/// Snapshot rotation configuration
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    /// Seconds between rotations; also the daemon poll interval
    pub interval_secs: u64,
    /// Number of backup artifacts kept before the oldest is overwritten
    pub retention: usize,
    /// Start the rotation daemon when an instance is created or reacquired
    pub daemon: bool,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            interval_secs: 24 * 60 * 60, // daily
            retention: 14,
            daemon: true,
        }
    }
}

impl RotationConfig {
    /// Rotation interval as a duration
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Per-instance log configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Minimum level written to the instance log (trace, debug, info, warn, error)
    pub level: String,
    /// Also write instance log lines to stderr
    pub echo_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            echo_stderr: true,
        }
    }
}
