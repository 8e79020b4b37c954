//! Embedded key-value engine behind a storage instance.
//!
//! The wrapper only needs point reads and writes plus an explicit close,
//! so the engine is a small trait. [`RedbEngine`] is the production
//! implementation: a redb database is one regular file, which makes a
//! plain file copy of a closed store a consistent backup.

use redb::{Builder, Database, Durability, ReadableTableMetadata, TableDefinition};
use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

const RECORDS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("records");

/// Error type for engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("store already exists at {}", .0.display())]
    AlreadyExists(PathBuf),
    #[error("redb error: {0}")]
    Redb(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redb::TransactionError> for EngineError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

impl From<EngineError> for cardvault_common::Error {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::AlreadyExists(path) => Self::AlreadyExists(path),
            EngineError::Io(e) => Self::Io(e),
            other => Self::Engine(other.to_string()),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// A close attempt that failed; the handle is still open and can be retried.
pub struct CloseFailure<E> {
    pub engine: E,
    pub source: EngineError,
}

impl<E> fmt::Debug for CloseFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseFailure")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Embedded, path-addressed key-value store.
///
/// Implementations must be safe for concurrent `get`/`put` callers.
pub trait KvEngine: Send + Sync + Sized + 'static {
    /// File extension of the live store
    const EXTENSION: &'static str;

    /// Create a store, failing if anything already exists at `path`.
    fn create_new(path: &Path) -> EngineResult<Self>;

    /// Open an existing store.
    fn open(path: &Path) -> EngineResult<Self>;

    fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>>;

    fn put(&self, key: &[u8], value: &[u8]) -> EngineResult<()>;

    /// Number of stored records
    fn len(&self) -> EngineResult<u64>;

    /// Flush and release the store.
    fn close(self) -> Result<(), CloseFailure<Self>>;
}

/// Key-value engine backed by a single redb file.
pub struct RedbEngine {
    db: Database,
}

impl RedbEngine {
    fn init(db: Database) -> EngineResult<Self> {
        // Create the table eagerly so later read txns don't fail
        let write_txn = db.begin_write()?;
        {
            let _t = write_txn.open_table(RECORDS)?;
        }
        write_txn.commit()?;
        Ok(Self { db })
    }

    fn sync(&self) -> EngineResult<()> {
        let mut write_txn = self.db.begin_write()?;
        write_txn.set_durability(Durability::Immediate);
        write_txn.commit()?;
        Ok(())
    }
}

impl KvEngine for RedbEngine {
    const EXTENSION: &'static str = "redb";

    fn create_new(path: &Path) -> EngineResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // create_new makes the existence check and the creation one step
        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(EngineError::AlreadyExists(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };

        Builder::new()
            .create_file(file)
            .map_err(EngineError::from)
            .and_then(Self::init)
            .inspect_err(|_| {
                let _ = std::fs::remove_file(path);
            })
    }

    fn open(path: &Path) -> EngineResult<Self> {
        Self::init(Database::open(path)?)
    }

    fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS)?;
        Ok(table.get(key)?.map(|v| v.value().to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> EngineResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(RECORDS)?;
            table.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn len(&self) -> EngineResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS)?;
        Ok(table.len()?)
    }

    fn close(self) -> Result<(), CloseFailure<Self>> {
        match self.sync() {
            Ok(()) => {
                drop(self.db);
                Ok(())
            }
            Err(source) => Err(CloseFailure {
                engine: self,
                source,
            }),
        }
    }
}

/// Close with a single retry, handing the handle back if both attempts fail.
pub(crate) fn close_with_retry<E: KvEngine>(engine: E) -> Result<(), CloseFailure<E>> {
    match engine.close() {
        Ok(()) => Ok(()),
        Err(failure) => {
            tracing::warn!("Close failed, retrying once: {}", failure.source);
            failure.engine.close()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_put_get() {
        let dir = tempdir().unwrap();
        let engine = RedbEngine::create_new(&dir.path().join("s/s.redb")).unwrap();

        engine.put(b"a", b"1").unwrap();
        engine.put(b"a", b"2").unwrap();
        engine.put(b"b", b"").unwrap();

        assert_eq!(engine.get(b"a").unwrap(), Some(b"2".to_vec()));
        assert_eq!(engine.get(b"b").unwrap(), Some(Vec::new()));
        assert_eq!(engine.get(b"missing").unwrap(), None);
        assert_eq!(engine.len().unwrap(), 2);
    }

    #[test]
    fn test_create_new_is_exclusive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.redb");

        let engine = RedbEngine::create_new(&path).unwrap();
        engine.close().unwrap();

        assert!(matches!(
            RedbEngine::create_new(&path),
            Err(EngineError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_create_new_never_adopts_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.redb");
        std::fs::write(&path, b"not a store").unwrap();

        assert!(matches!(
            RedbEngine::create_new(&path),
            Err(EngineError::AlreadyExists(_))
        ));
        assert_eq!(std::fs::read(&path).unwrap(), b"not a store");
    }

    #[test]
    fn test_create_new_races_have_one_winner() {
        let dir = tempdir().unwrap();
        let path = Arc::new(dir.path().join("s.redb"));

        let racers: Vec<_> = (0..8)
            .map(|_| {
                let path = Arc::clone(&path);
                std::thread::spawn(move || RedbEngine::create_new(&path).is_ok())
            })
            .collect();
        let winners = racers
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
    }

    #[test]
    fn test_close_failure_debug_omits_engine() {
        let dir = tempdir().unwrap();
        let failure = CloseFailure {
            engine: RedbEngine::create_new(&dir.path().join("s.redb")).unwrap(),
            source: EngineError::Io(std::io::Error::other("disk gone")),
        };
        let text = format!("{failure:?}");
        assert!(text.starts_with("CloseFailure"));
        assert!(text.contains("disk gone"));
    }

    #[test]
    fn test_open_requires_existing() {
        let dir = tempdir().unwrap();
        assert!(RedbEngine::open(&dir.path().join("absent.redb")).is_err());
    }

    #[test]
    fn test_close_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.redb");

        let engine = RedbEngine::create_new(&path).unwrap();
        engine.put(b"key", b"value").unwrap();
        close_with_retry(engine).unwrap();

        let engine = RedbEngine::open(&path).unwrap();
        assert_eq!(engine.get(b"key").unwrap(), Some(b"value".to_vec()));
    }

    #[test]
    fn test_closed_file_copy_is_openable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.redb");
        let copy = dir.path().join("s.redb.alpha");

        let engine = RedbEngine::create_new(&path).unwrap();
        engine.put(b"key", b"value").unwrap();
        engine.close().unwrap();
        std::fs::copy(&path, &copy).unwrap();

        let backup = RedbEngine::open(&copy).unwrap();
        assert_eq!(backup.get(b"key").unwrap(), Some(b"value".to_vec()));
    }

    #[test]
    fn test_error_conversion() {
        let err: cardvault_common::Error =
            EngineError::AlreadyExists(PathBuf::from("x.redb")).into();
        assert!(err.is_configuration());
    }
}
