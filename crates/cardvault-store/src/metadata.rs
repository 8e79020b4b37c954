//! Persisted metadata record of a storage instance.
//!
//! The record is a small JSON document kept next to the live store. It is
//! everything needed to reacquire an instance after a restart: its
//! identity, the snapshot label cycle and where the cycle currently
//! stands, and the rotation schedule.

use crate::labels::{self, SNAPSHOT_LABELS};
use crate::layout::staging_path;
use cardvault_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Configuration and rotation state of one storage instance
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetadataRecord {
    /// Unique identifier and root of every on-disk name
    pub name: String,
    /// Cyclic list of labels naming backup artifacts
    pub snapshot_names: Vec<String>,
    /// Index into `snapshot_names` of the label used by the latest rotation
    pub last_journal_snapshot: usize,
    /// Unix seconds when the current rotation window started
    pub last_snapshot_rotation: i64,
    /// Seconds between rotations
    pub snapshot_rotation_time: u64,
}

impl MetadataRecord {
    pub fn new(name: &str, retention: usize, rotation_secs: u64, now: i64) -> Result<Self> {
        labels::validate_name(name)?;
        if rotation_secs == 0 {
            return Err(Error::InvalidInterval(
                "rotation interval must be at least one second".into(),
            ));
        }
        Ok(Self {
            name: name.to_string(),
            snapshot_names: labels::select(retention)?,
            last_journal_snapshot: 0,
            last_snapshot_rotation: now,
            snapshot_rotation_time: rotation_secs,
        })
    }

    /// Label at the current index
    pub fn current_label(&self) -> &str {
        &self.snapshot_names[self.last_journal_snapshot]
    }

    /// Move to the next label, wrapping around the cycle, and return it
    pub fn advance(&mut self) -> &str {
        self.last_journal_snapshot = (self.last_journal_snapshot + 1) % self.snapshot_names.len();
        self.current_label()
    }

    /// Interval between rotations
    pub const fn rotation_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_rotation_time)
    }

    /// Unix seconds at which the next rotation becomes due
    pub fn next_rotation_due(&self) -> i64 {
        let interval = i64::try_from(self.snapshot_rotation_time).unwrap_or(i64::MAX);
        self.last_snapshot_rotation.saturating_add(interval)
    }

    pub fn is_rotation_due(&self, now: i64) -> bool {
        now >= self.next_rotation_due()
    }

    fn check_invariants(&self) -> std::result::Result<(), String> {
        labels::validate_name(&self.name).map_err(|e| e.to_string())?;
        if self.snapshot_names.is_empty() || self.snapshot_names.len() > SNAPSHOT_LABELS.len() {
            return Err(format!(
                "{} snapshot names, expected 1 to {}",
                self.snapshot_names.len(),
                SNAPSHOT_LABELS.len()
            ));
        }
        if self.last_journal_snapshot >= self.snapshot_names.len() {
            return Err(format!(
                "snapshot index {} out of range for {} names",
                self.last_journal_snapshot,
                self.snapshot_names.len()
            ));
        }
        if self.snapshot_rotation_time == 0 {
            return Err("rotation time is zero".into());
        }
        Ok(())
    }

    /// Write the record atomically: stage, sync, then rename over the target
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| Error::Serialization(format!("failed to encode metadata: {e}")))?;

        let staged = staging_path(path);
        {
            let mut file = File::create(&staged)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        std::fs::rename(&staged, path)?;
        Ok(())
    }

    /// Read a record and check that it describes `expected_name`
    pub fn load(path: &Path, expected_name: &str) -> Result<Self> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::MetadataNotFound(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };

        let record: Self = serde_json::from_slice(&data)
            .map_err(|e| Error::metadata_corrupt(path, e.to_string()))?;
        record
            .check_invariants()
            .map_err(|reason| Error::metadata_corrupt(path, reason))?;
        if record.name != expected_name {
            return Err(Error::metadata_corrupt(
                path,
                format!("record belongs to '{}'", record.name),
            ));
        }
        Ok(record)
    }
}

/// Current wall-clock time in unix seconds
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_new_validates() {
        let record = MetadataRecord::new("cache", 3, 60, 1_000).unwrap();
        assert_eq!(record.snapshot_names, vec!["alpha", "beta", "gamma"]);
        assert_eq!(record.last_journal_snapshot, 0);
        assert_eq!(record.last_snapshot_rotation, 1_000);

        assert!(MetadataRecord::new("cache", 0, 60, 0).is_err());
        assert!(MetadataRecord::new("cache", 18, 60, 0).is_err());
        assert!(matches!(
            MetadataRecord::new("cache", 3, 0, 0),
            Err(Error::InvalidInterval(_))
        ));
        assert!(MetadataRecord::new(&"n".repeat(41), 3, 60, 0).is_err());
    }

    #[test]
    fn test_advance_wraps() {
        let mut record = MetadataRecord::new("cache", 3, 60, 0).unwrap();
        assert_eq!(record.advance(), "beta");
        assert_eq!(record.advance(), "gamma");
        assert_eq!(record.advance(), "alpha");
        assert_eq!(record.last_journal_snapshot, 0);
        assert_eq!(record.advance(), "beta");
    }

    #[test]
    fn test_rotation_due() {
        let record = MetadataRecord::new("cache", 3, 60, 1_000).unwrap();
        assert_eq!(record.next_rotation_due(), 1_060);
        assert!(!record.is_rotation_due(1_059));
        assert!(record.is_rotation_due(1_060));
        assert!(record.is_rotation_due(5_000));
    }

    #[test]
    fn test_json_field_names() {
        let record = MetadataRecord::new("cache", 2, 3600, 42).unwrap();
        let value: serde_json::Value = serde_json::to_value(&record).unwrap();

        assert_eq!(value["Name"], "cache");
        assert_eq!(value["SnapshotNames"][1], "beta");
        assert_eq!(value["LastJournalSnapshot"], 0);
        assert_eq!(value["LastSnapshotRotation"], 42);
        assert_eq!(value["SnapshotRotationTime"], 3600);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.meta.json");

        let mut record = MetadataRecord::new("cache", 5, 30, 7).unwrap();
        record.advance();
        record.save(&path).unwrap();

        assert!(!staging_path(&path).exists());
        let loaded = MetadataRecord::load(&path, "cache").unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn test_load_missing_and_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.meta.json");

        assert!(matches!(
            MetadataRecord::load(&path, "cache"),
            Err(Error::MetadataNotFound(_))
        ));

        std::fs::write(&path, b"{\"Name\": \"cache\"").unwrap();
        assert!(matches!(
            MetadataRecord::load(&path, "cache"),
            Err(Error::MetadataCorrupt { .. })
        ));

        let mut record = MetadataRecord::new("cache", 3, 30, 0).unwrap();
        record.last_journal_snapshot = 3;
        std::fs::write(&path, serde_json::to_vec(&record).unwrap()).unwrap();
        assert!(matches!(
            MetadataRecord::load(&path, "cache"),
            Err(Error::MetadataCorrupt { .. })
        ));
    }

    #[test]
    fn test_load_rejects_foreign_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.meta.json");
        MetadataRecord::new("other", 3, 30, 0)
            .unwrap()
            .save(&path)
            .unwrap();

        let err = MetadataRecord::load(&path, "cache").unwrap_err();
        assert!(err.to_string().contains("other"));
    }
}
