//! CardVault Common - Shared types and utilities
//!
//! This crate provides the error taxonomy and configuration types
//! used by the storage engine and its tooling.

pub mod config;
pub mod error;

pub use config::{LogConfig, RotationConfig, StoreConfig};
pub use error::{Error, Result};
