//! Wrapped storage: guarded access and lifecycle.

use crate::daemon::RotationDaemon;
use crate::engine::{EngineResult, KvEngine, RedbEngine, close_with_retry};
use crate::labels;
use crate::layout::{StoreLayout, staging_path};
use crate::log::InstanceLog;
use crate::metadata::{MetadataRecord, unix_now};
use crate::rotation::{RotationCounters, RotationReport, StorageStats};
use cardvault_common::{Error, Result, StoreConfig};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

/// Storage over the default redb engine
pub type Storage = WrappedStorage<RedbEngine>;

/// State swapped by rotation
pub(crate) struct LiveState<E> {
    /// `None` only after a failed reopen or a terminal close
    pub(crate) engine: Option<E>,
    pub(crate) meta: MetadataRecord,
}

/// State shared between callers and the rotation daemon
pub(crate) struct Shared<E: KvEngine> {
    pub(crate) name: String,
    pub(crate) layout: StoreLayout,
    /// Readers and writers take the shared side; rotation takes the
    /// exclusive side for its whole close-copy-reopen window.
    pub(crate) live: RwLock<LiveState<E>>,
    pub(crate) poisoned: AtomicBool,
    pub(crate) log: InstanceLog,
    pub(crate) counters: RotationCounters,
}

impl<E: KvEngine> Shared<E> {
    pub(crate) fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }

    pub(crate) fn unavailable(&self) -> Error {
        Error::unavailable(format!(
            "storage '{}' failed to reopen after rotation",
            self.name
        ))
    }

    fn read_live(&self) -> Result<RwLockReadGuard<'_, LiveState<E>>> {
        if self.is_poisoned() {
            return Err(self.unavailable());
        }
        Ok(self.live.read())
    }

    fn with_engine<T>(&self, op: &str, f: impl FnOnce(&E) -> EngineResult<T>) -> Result<T> {
        let live = self.read_live()?;
        let engine = live.engine.as_ref().ok_or_else(|| self.unavailable())?;
        f(engine).map_err(|e| {
            self.log
                .in_scope(|| warn!(storage = %self.name, "{} failed: {}", op, e));
            e.into()
        })
    }

    fn shutdown(&self) -> Result<()> {
        self.log.in_scope(|| {
            let mut live = self.live.write();

            let saved = live.meta.save(&self.layout.metadata_file());
            if let Err(e) = &saved {
                error!(storage = %self.name, "Failed to commit metadata file: {}", e);
            }

            let Some(engine) = live.engine.take() else {
                warn!(storage = %self.name, "Closing storage without a live store");
                return Err(self.unavailable());
            };
            if let Err(failure) = close_with_retry(engine) {
                error!(storage = %self.name, "Failed to safely close storage: {}", failure.source);
                return Err(Error::CloseFailed(failure.source.to_string()));
            }
            saved?;

            info!(storage = %self.name, "Storage closed");
            Ok(())
        })
    }
}

/// An embedded key-value store that periodically snapshots itself.
///
/// Reads and writes go straight to the engine under a shared lock. A
/// background daemon rotates the store once per interval: it closes the
/// live store, copies it to the next labeled backup, and reopens it, all
/// under the exclusive lock.
///
/// The instance is closed by [`WrappedStorage::close`], which consumes it;
/// [`WrappedStorage::reacquire`] brings it back after a restart.
pub struct WrappedStorage<E: KvEngine = RedbEngine> {
    shared: Arc<Shared<E>>,
    daemon_running: AtomicBool,
    daemon: Mutex<Option<RotationDaemon>>,
}

impl<E: KvEngine> WrappedStorage<E> {
    /// Create a new storage instance named `name` under `config.data_dir`.
    ///
    /// Fails if the name or rotation settings are invalid, or if a live
    /// store already exists at the derived path.
    pub fn create(config: &StoreConfig, name: &str) -> Result<Self> {
        let meta = MetadataRecord::new(
            name,
            config.rotation.retention,
            config.rotation.interval_secs,
            unix_now(),
        )?;
        let layout = StoreLayout::new(&config.data_dir, name, E::EXTENSION);
        std::fs::create_dir_all(layout.dir())?;

        // The log validates its level, so it must open before the store exists
        let log = InstanceLog::open(&layout.log_file(), &config.log)?;
        let engine = E::create_new(&layout.live_store())?;
        if let Err(e) = meta.save(&layout.metadata_file()) {
            drop(engine);
            log.in_scope(|| {
                error!(storage = %name, "Failed to write metadata, discarding new store: {}", e);
            });
            discard_created(&layout);
            return Err(e);
        }

        let storage = Self::assemble(layout, meta, engine, log);
        storage.shared.log.in_scope(|| {
            info!(
                storage = %name,
                path = %storage.shared.layout.live_store().display(),
                "Created storage"
            );
        });

        if config.rotation.daemon {
            if let Err(e) = storage.start_daemon() {
                let layout = storage.shared.layout.clone();
                drop(storage);
                discard_created(&layout);
                return Err(e);
            }
        }
        Ok(storage)
    }

    /// Reopen an instance from its persisted metadata record.
    ///
    /// The rotation settings in `config` are ignored; the persisted record
    /// is authoritative.
    pub fn reacquire(config: &StoreConfig, name: &str) -> Result<Self> {
        labels::validate_name(name)?;
        let layout = StoreLayout::new(&config.data_dir, name, E::EXTENSION);

        let meta = MetadataRecord::load(&layout.metadata_file(), name)?;
        let log = InstanceLog::open(&layout.log_file(), &config.log)?;
        let engine = E::open(&layout.live_store())?;

        let storage = Self::assemble(layout, meta, engine, log);
        storage.shared.log.in_scope(|| {
            let live = storage.shared.live.read();
            info!(
                storage = %name,
                label = %live.meta.current_label(),
                "Reacquired storage"
            );
        });

        if config.rotation.daemon {
            storage.start_daemon()?;
        }
        Ok(storage)
    }

    fn assemble(layout: StoreLayout, meta: MetadataRecord, engine: E, log: InstanceLog) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: meta.name.clone(),
                layout,
                live: RwLock::new(LiveState {
                    engine: Some(engine),
                    meta,
                }),
                poisoned: AtomicBool::new(false),
                log,
                counters: RotationCounters::default(),
            }),
            daemon_running: AtomicBool::new(false),
            daemon: Mutex::new(None),
        }
    }

    /// Write `value` under `key`
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.shared.with_engine("put", |engine| engine.put(key, value))
    }

    /// Read the value under `key`, `None` if absent
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.shared.with_engine("get", |engine| engine.get(key))
    }

    /// Serialize `value` as JSON and write it under `key`
    pub fn put_json<T: Serialize>(&self, key: &[u8], value: &T) -> Result<()> {
        let data = serde_json::to_vec(value)
            .map_err(|e| Error::Serialization(format!("failed to encode value: {e}")))?;
        self.put(key, &data)
    }

    /// Read and deserialize a JSON value
    pub fn get_json<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        self.get(key)?
            .map(|data| {
                serde_json::from_slice(&data)
                    .map_err(|e| Error::Serialization(format!("failed to decode value: {e}")))
            })
            .transpose()
    }

    /// Number of records in the live store
    pub fn len(&self) -> Result<u64> {
        self.shared.with_engine("len", |engine| engine.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Rotate now, regardless of schedule
    pub fn rotate(&self) -> Result<RotationReport> {
        self.shared.rotate()
    }

    /// Start the rotation daemon; returns `false` if it is already running
    pub fn start_daemon(&self) -> Result<bool> {
        if self
            .daemon_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(false);
        }

        match RotationDaemon::spawn(Arc::clone(&self.shared)) {
            Ok(daemon) => {
                *self.daemon.lock() = Some(daemon);
                Ok(true)
            }
            Err(e) => {
                self.daemon_running.store(false, Ordering::Release);
                Err(e.into())
            }
        }
    }

    /// Stop the rotation daemon and wait for it to exit
    pub fn stop_daemon(&self) {
        let daemon = self.daemon.lock().take();
        if let Some(daemon) = daemon {
            daemon.stop();
            self.daemon_running.store(false, Ordering::Release);
        }
    }

    pub fn is_daemon_running(&self) -> bool {
        self.daemon_running.load(Ordering::Acquire)
    }

    /// `false` once a rotation failed to reopen the store
    pub fn is_available(&self) -> bool {
        !self.shared.is_poisoned()
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Path of the live store
    pub fn location(&self) -> PathBuf {
        self.shared.layout.live_store()
    }

    /// Path of the backup artifact for `label`
    pub fn backup_location(&self, label: &str) -> PathBuf {
        self.shared.layout.backup(label)
    }

    /// Copy of the current metadata record
    pub fn metadata(&self) -> MetadataRecord {
        self.shared.live.read().meta.clone()
    }

    pub fn stats(&self) -> StorageStats {
        self.shared.counters.snapshot(self.is_available())
    }

    /// Persist the metadata record and close the store for good.
    pub fn close(self) -> Result<()> {
        self.stop_daemon();
        self.shared.shutdown()
    }
}

/// Remove the store and metadata of a create that did not finish
fn discard_created(layout: &StoreLayout) {
    let metadata = layout.metadata_file();
    for path in [layout.live_store(), staging_path(&metadata), metadata] {
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

impl<E: KvEngine> Drop for WrappedStorage<E> {
    fn drop(&mut self) {
        self.stop_daemon();
    }
}
