//! On-disk layout of a storage instance.
//!
//! ```text
//! <data_dir>/<name>/
//!     <name>.<ext>            live store
//!     <name>.<ext>.<label>    backup artifact, one per used label
//!     <name>.meta.json        metadata record
//!     <name>.log              instance log
//! ```

use std::path::{Path, PathBuf};

/// Paths derived from a storage name.
#[derive(Clone, Debug)]
pub struct StoreLayout {
    dir: PathBuf,
    name: String,
    extension: &'static str,
}

impl StoreLayout {
    pub fn new(data_dir: impl AsRef<Path>, name: &str, extension: &'static str) -> Self {
        Self {
            dir: data_dir.as_ref().join(name),
            name: name.to_string(),
            extension,
        }
    }

    /// Instance directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Live embedded store
    pub fn live_store(&self) -> PathBuf {
        self.dir.join(format!("{}.{}", self.name, self.extension))
    }

    /// Backup artifact for a snapshot label
    pub fn backup(&self, label: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}.{}", self.name, self.extension, label))
    }

    /// Persisted metadata record
    pub fn metadata_file(&self) -> PathBuf {
        self.dir.join(format!("{}.meta.json", self.name))
    }

    /// Instance log
    pub fn log_file(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.name))
    }
}

/// Sibling path used to stage a file before it is renamed into place.
pub(crate) fn staging_path(path: &Path) -> PathBuf {
    let mut staged = path.as_os_str().to_owned();
    staged.push(".tmp");
    PathBuf::from(staged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let layout = StoreLayout::new("/data", "cache", "redb");

        assert_eq!(layout.dir(), Path::new("/data/cache"));
        assert_eq!(layout.live_store(), PathBuf::from("/data/cache/cache.redb"));
        assert_eq!(
            layout.backup("beta"),
            PathBuf::from("/data/cache/cache.redb.beta")
        );
        assert_eq!(
            layout.metadata_file(),
            PathBuf::from("/data/cache/cache.meta.json")
        );
        assert_eq!(layout.log_file(), PathBuf::from("/data/cache/cache.log"));
    }

    #[test]
    fn test_staging_path() {
        assert_eq!(
            staging_path(Path::new("/data/cache/cache.meta.json")),
            PathBuf::from("/data/cache/cache.meta.json.tmp")
        );
    }
}
