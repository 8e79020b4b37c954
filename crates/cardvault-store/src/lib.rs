//! CardVault Store - self-snapshotting embedded key-value storage
//!
//! A [`WrappedStorage`] owns one live embedded store and rotates it into a
//! fixed cycle of labeled backups on a schedule.
//!
//! # Design
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  WrappedStorage                      │
//! │   get / put ──► RwLock (shared) ──► KvEngine (redb)  │
//! │                                                      │
//! │   RotationDaemon ──► RwLock (exclusive)              │
//! │        close ─► copy to <name>.redb.<label> ─► open  │
//! │                                                      │
//! │   MetadataRecord ──► <name>.meta.json                │
//! │   InstanceLog    ──► <name>.log                      │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Lifecycle
//! 1. [`WrappedStorage::create`] makes a fresh instance (never adopts an
//!    existing store)
//! 2. [`WrappedStorage::reacquire`] reopens it from its metadata record
//!    after a restart
//! 3. [`WrappedStorage::close`] persists metadata and releases the store
//!
//! A rotation that cannot reopen the store poisons the instance: every
//! later call returns [`cardvault_common::Error::Unavailable`].

mod daemon;
pub mod engine;
pub mod labels;
pub mod layout;
mod log;
pub mod metadata;
mod rotation;
mod storage;

// Re-exports
pub use engine::{CloseFailure, EngineError, KvEngine, RedbEngine};
pub use labels::SNAPSHOT_LABELS;
pub use layout::StoreLayout;
pub use metadata::MetadataRecord;
pub use rotation::{RotationReport, StorageStats};
pub use storage::{Storage, WrappedStorage};
