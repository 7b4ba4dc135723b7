//! Filesystem-backed key/value store.
//!
//! Each key is stored as `{data_dir}/{key}.json`. Writes are atomic (temp
//! file + fsync + rename) so a crash mid-write leaves the previous value.
//!
//! # Examples
//!
//! ```no_run
//! use concierge::storage::{FileKvStore, KeyValueStore};
//!
//! let store = FileKvStore::new("/tmp/concierge-state").unwrap();
//! store.set("theme", "\"dark\"").unwrap();
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};

use super::{KeyValueStore, StorageError};

/// Filesystem-backed key/value store.
#[derive(Debug, Clone)]
pub struct FileKvStore {
    data_dir: PathBuf,
}

impl FileKvStore {
    /// Create a store rooted at `data_dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the directory cannot be created.
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir).map_err(|e| {
            StorageError::Io(format!(
                "failed to create state directory {}: {e}",
                data_dir.display()
            ))
        })?;
        Ok(Self { data_dir })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", sanitize_key(key)))
    }
}

/// Map a key onto a safe file stem.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl KeyValueStore for FileKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.key_path(key);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.key_path(key);
        let tmp_path = self
            .data_dir
            .join(format!(".{}.tmp", sanitize_key(key)));

        let mut file = std::fs::File::create(&tmp_path).map_err(|e| {
            StorageError::Io(format!(
                "failed to create temp file {}: {e}",
                tmp_path.display()
            ))
        })?;
        file.write_all(value.as_bytes())
            .map_err(|e| StorageError::Io(format!("failed to write temp file: {e}")))?;
        file.sync_all()
            .map_err(|e| StorageError::Io(format!("failed to sync temp file: {e}")))?;

        std::fs::rename(&tmp_path, &path).map_err(|e| {
            StorageError::Io(format!(
                "failed to rename temp file to {}: {e}",
                path.display()
            ))
        })
    }
}
