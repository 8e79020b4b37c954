//! Error types for CardVault
//!
//! This module defines the error taxonomy shared by the storage engine
//! and its tooling.

use std::path::PathBuf;
use thiserror::Error;

/// Common result type for CardVault operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for CardVault
#[derive(Debug, Error)]
pub enum Error {
    // Configuration errors
    #[error("invalid storage name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("invalid snapshot retention {requested}: must be between 1 and {max}")]
    InvalidRetention { requested: usize, max: usize },

    #[error("invalid rotation interval: {0}")]
    InvalidInterval(String),

    #[error("storage already exists at {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("configuration error: {0}")]
    Configuration(String),

    // Metadata errors
    #[error("metadata file not found: {}", .0.display())]
    MetadataNotFound(PathBuf),

    #[error("corrupt metadata file {}: {reason}", path.display())]
    MetadataCorrupt { path: PathBuf, reason: String },

    // Access errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    // Rotation errors
    #[error("failed to close live store: {0}")]
    CloseFailed(String),

    #[error("failed to write backup artifact: {0}")]
    BackupFailed(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl Error {
    /// Create an invalid name error
    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a corrupt metadata error
    pub fn metadata_corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MetadataCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Check if the caller may retry the same call unchanged
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Engine(_) | Self::CloseFailed(_) | Self::BackupFailed(_)
        )
    }

    /// Check if this error was caused by invalid inputs
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidName { .. }
                | Self::InvalidRetention { .. }
                | Self::InvalidInterval(_)
                | Self::AlreadyExists(_)
                | Self::Configuration(_)
        )
    }

    /// Check if the storage instance is permanently out of service
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
