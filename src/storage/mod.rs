//! Local persistent key/value storage.
//!
//! Every stateful component persists through the [`KeyValueStore`] trait.
//! Values are opaque strings; [`load_json`] and [`save_json`] add the JSON
//! (de)serialization layer on top.
//!
//! # Submodules
//!
//! - [`file`]: one-file-per-key store with atomic writes
//! - [`preferences`]: typed user preferences with per-key safe defaults

pub mod file;
pub mod preferences;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;

pub use file::FileKvStore;
pub use preferences::{Preferences, Theme};

/// Errors produced by persistent storage.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Underlying read/write failed.
    #[error("[STORAGE_IO] {0}")]
    Io(String),

    /// Stored value could not be parsed.
    #[error("[STORAGE_CORRUPT] key `{key}`: {reason}")]
    Corrupt {
        /// The key whose value failed to parse.
        key: String,
        /// Parser message.
        reason: String,
    },

    /// Value could not be serialized.
    #[error("[STORAGE_ENCODE] {0}")]
    Encode(String),
}

/// String key/value storage surviving process restarts.
pub trait KeyValueStore: Send + Sync {
    /// Read a value. Missing keys yield `Ok(None)`.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write (overwrite) a value.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// Read and parse a JSON value.
///
/// # Errors
///
/// Returns [`StorageError::Corrupt`] when the stored text is not valid JSON for `T`.
pub fn load_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| StorageError::Corrupt {
            key: key.to_owned(),
            reason: e.to_string(),
        })
}

/// Serialize a value as JSON and persist it.
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub fn save_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let json = serde_json::to_string(value).map_err(|e| StorageError::Encode(e.to_string()))?;
    store.set(key, &json)
}

/// In-memory store for tests and ephemeral sessions.
///
/// Cheaply cloneable; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryKvStore {
    values: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryKvStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.values.lock().map(|v| v.len()).unwrap_or(0)
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let values = self
            .values
            .lock()
            .map_err(|e| StorageError::Io(format!("store lock poisoned: {e}")))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| StorageError::Io(format!("store lock poisoned: {e}")))?;
        values.insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_missing_key_is_none() {
        let store = MemoryKvStore::new();
        assert!(matches!(store.get("nope"), Ok(None)));
        assert!(store.is_empty());
    }

    #[test]
    fn json_roundtrip_through_memory_store() {
        let store = MemoryKvStore::new();
        let saved = save_json(&store, "numbers", &vec![1, 2, 3]);
        assert!(saved.is_ok());
        let loaded: Option<Vec<i32>> = load_json(&store, "numbers").unwrap_or_default();
        assert_eq!(loaded, Some(vec![1, 2, 3]));
    }

    #[test]
    fn corrupt_json_reports_key() {
        let store = MemoryKvStore::new();
        let _ = store.set("broken", "{not json");
        let result: Result<Option<Vec<i32>>, _> = load_json(&store, "broken");
        match result {
            Err(StorageError::Corrupt { key, .. }) => assert_eq!(key, "broken"),
            other => unreachable!("expected corrupt error, got {other:?}"),
        }
    }

    #[test]
    fn clones_share_state() {
        let store = MemoryKvStore::new();
        let clone = store.clone();
        let _ = store.set("k", "v");
        assert_eq!(clone.get("k").ok().flatten().as_deref(), Some("v"));
    }
}
