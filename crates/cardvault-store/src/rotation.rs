//! Snapshot rotation.
//!
//! Rotation runs under the exclusive side of the instance lock:
//!
//! 1. Close the live store (one retry; on failure skip this cycle)
//! 2. Advance the label index, wrapping around the cycle
//! 3. Copy the closed store to `<live>.<label>`, replacing any earlier copy
//! 4. Reopen the live store
//! 5. Stamp the rotation time and persist the metadata record
//!
//! If step 4 fails the instance is poisoned and never serves access again.

use crate::engine::{KvEngine, close_with_retry};
use crate::layout::staging_path;
use crate::metadata::unix_now;
use crate::storage::Shared;
use cardvault_common::{Error, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Outcome of a successful rotation
#[derive(Debug, Clone)]
pub struct RotationReport {
    /// Label the backup was written under
    pub label: String,
    /// Index of `label` in the snapshot name cycle
    pub index: usize,
    pub backup_path: PathBuf,
    pub bytes_copied: u64,
    /// Time spent holding the exclusive lock
    pub duration: Duration,
    /// `false` if the advanced label index only lives in memory; until the
    /// record is saved again a restart resumes from the previous index.
    pub metadata_persisted: bool,
}

/// Rotation counters of one instance
#[derive(Debug, Default)]
pub(crate) struct RotationCounters {
    completed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    last_duration_ms: AtomicU64,
}

impl RotationCounters {
    pub(crate) fn snapshot(&self, available: bool) -> StorageStats {
        StorageStats {
            rotations_completed: self.completed.load(Ordering::Relaxed),
            rotations_skipped: self.skipped.load(Ordering::Relaxed),
            rotations_failed: self.failed.load(Ordering::Relaxed),
            last_rotation_ms: self.last_duration_ms.load(Ordering::Relaxed),
            available,
        }
    }
}

/// Storage statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    /// Rotations that produced a backup and reopened the store
    pub rotations_completed: u64,
    /// Rotations abandoned because the live store would not close
    pub rotations_skipped: u64,
    /// Rotations whose backup copy or reopen failed
    pub rotations_failed: u64,
    /// Duration of the last completed rotation
    pub last_rotation_ms: u64,
    /// `false` once the instance is poisoned
    pub available: bool,
}

/// Copy a closed store to `dst` through a staging file.
fn copy_store(src: &Path, dst: &Path) -> std::io::Result<u64> {
    let staged = staging_path(dst);
    let result = (|| -> std::io::Result<u64> {
        let bytes = std::fs::copy(src, &staged)?;
        File::open(&staged)?.sync_all()?;
        std::fs::rename(&staged, dst)?;
        Ok(bytes)
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&staged);
    }
    result
}

impl<E: KvEngine> Shared<E> {
    /// Run one rotation
    pub(crate) fn rotate(&self) -> Result<RotationReport> {
        self.log.in_scope(|| self.rotate_locked())
    }

    fn rotate_locked(&self) -> Result<RotationReport> {
        if self.is_poisoned() {
            return Err(self.unavailable());
        }

        debug!(storage = %self.name, "Starting rotation, acquiring lock");
        let mut live = self.live.write();
        let started = Instant::now();

        let Some(engine) = live.engine.take() else {
            return Err(self.unavailable());
        };
        if let Err(failure) = close_with_retry(engine) {
            live.engine = Some(failure.engine);
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            warn!(
                storage = %self.name,
                "Failed to close live store, skipping rotation: {}", failure.source
            );
            return Err(Error::CloseFailed(failure.source.to_string()));
        }

        let live_path = self.layout.live_store();
        let previous = live.meta.last_journal_snapshot;
        let label = live.meta.advance().to_string();
        let index = live.meta.last_journal_snapshot;
        let backup_path = self.layout.backup(&label);

        let copied = copy_store(&live_path, &backup_path);
        if copied.is_err() {
            live.meta.last_journal_snapshot = previous;
        }

        match E::open(&live_path) {
            Ok(fresh) => live.engine = Some(fresh),
            Err(e) => {
                // Fail-stop: the handle stays gone and the flag turns callers away
                self.poisoned.store(true, Ordering::SeqCst);
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    storage = %self.name,
                    "Failed to reopen store after rotation, storage is unavailable: {}", e
                );
                return Err(self.unavailable());
            }
        }

        let bytes_copied = match copied {
            Ok(bytes) => bytes,
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    storage = %self.name,
                    label = %label,
                    "Failed to write backup: {}", e
                );
                return Err(Error::BackupFailed(format!(
                    "{}: {e}",
                    backup_path.display()
                )));
            }
        };

        live.meta.last_snapshot_rotation = unix_now();
        let metadata_persisted = match live.meta.save(&self.layout.metadata_file()) {
            Ok(()) => true,
            Err(e) => {
                error!(
                    storage = %self.name,
                    "Rotation finished but metadata was not persisted: {}", e
                );
                false
            }
        };
        drop(live);

        let duration = started.elapsed();
        let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.counters.completed.fetch_add(1, Ordering::Relaxed);
        self.counters
            .last_duration_ms
            .store(duration_ms, Ordering::Relaxed);

        info!(
            storage = %self.name,
            label = %label,
            bytes = bytes_copied,
            elapsed_ms = duration_ms,
            "Rotation complete, lock released"
        );

        Ok(RotationReport {
            label,
            index,
            backup_path,
            bytes_copied,
            duration,
            metadata_persisted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_copy_store_replaces_target() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("s.redb");
        let dst = dir.path().join("s.redb.alpha");

        std::fs::write(&src, b"first").unwrap();
        assert_eq!(copy_store(&src, &dst).unwrap(), 5);
        std::fs::write(&src, b"second image").unwrap();
        assert_eq!(copy_store(&src, &dst).unwrap(), 12);

        assert_eq!(std::fs::read(&dst).unwrap(), b"second image");
        assert!(!staging_path(&dst).exists());
    }

    #[test]
    fn test_copy_store_missing_source() {
        let dir = tempdir().unwrap();
        let dst = dir.path().join("s.redb.alpha");

        assert!(copy_store(&dir.path().join("absent"), &dst).is_err());
        assert!(!dst.exists());
        assert!(!staging_path(&dst).exists());
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = RotationCounters::default();
        counters.completed.fetch_add(2, Ordering::Relaxed);
        counters.skipped.fetch_add(1, Ordering::Relaxed);

        let stats = counters.snapshot(true);
        assert_eq!(stats.rotations_completed, 2);
        assert_eq!(stats.rotations_skipped, 1);
        assert_eq!(stats.rotations_failed, 0);
        assert!(stats.available);
    }
}
