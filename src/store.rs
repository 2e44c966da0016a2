//! Key-value stores standing in for the browser's `localStorage` and
//! `sessionStorage`.
//!
//! Values are plain strings, as in the browser. Reads never fail; a missing or
//! unreadable key is simply absent.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::StoreError;

pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;
}

/// In-process store. Optionally enforces a byte quota over keys plus values,
/// which mirrors the browser refusing writes once storage is full.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
    quota_bytes: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            quota_bytes: Some(quota_bytes),
        }
    }

    fn used_bytes_without(&self, key: &str) -> usize {
        self.entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        if let Some(quota) = self.quota_bytes {
            if self.used_bytes_without(key) + key.len() + value.len() > quota {
                return Err(StoreError::QuotaExceeded {
                    key: key.to_owned(),
                });
            }
        }
        self.entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Durable store persisted as a single JSON object. The whole file is
/// rewritten on every mutation.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl JsonFileStore {
    /// Open (or lazily create) the store at `path`. An unreadable or corrupt
    /// file starts the store empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "store file corrupt, starting empty");
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(&self.path, text)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        let previous = self.entries.insert(key.to_owned(), value.to_owned());
        if let Err(e) = self.flush() {
            // Keep memory consistent with what is on disk.
            match previous {
                Some(prev) => self.entries.insert(key.to_owned(), prev),
                None => self.entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        if self.entries.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }
}

/// The pair of stores a page sees: durable (`localStorage`) and
/// session-scoped (`sessionStorage`).
pub struct Storage {
    pub local: Box<dyn KeyValueStore>,
    pub session: Box<dyn KeyValueStore>,
}

impl Storage {
    pub fn new(local: Box<dyn KeyValueStore>, session: Box<dyn KeyValueStore>) -> Self {
        Self { local, session }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStore::new()), Box::new(MemoryStore::new()))
    }

    /// Durable store at `<dir>/local.json`, session store in memory.
    pub fn persistent(dir: &Path) -> Self {
        Self::new(
            Box::new(JsonFileStore::open(dir.join("local.json"))),
            Box::new(MemoryStore::new()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_roundtrip_and_remove() {
        let mut store = MemoryStore::new();
        assert_eq!(store.get("theme"), None);
        store.set("theme", "dark").unwrap();
        assert_eq!(store.get("theme").as_deref(), Some("dark"));
        store.remove("theme").unwrap();
        assert_eq!(store.get("theme"), None);
    }

    #[test]
    fn memory_store_quota_rejects_oversized_write() {
        let mut store = MemoryStore::with_quota(16);
        store.set("k", "small").unwrap();
        let err = store.set("big", "x".repeat(64).as_str()).unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { ref key } if key == "big"));
        assert_eq!(store.get("big"), None);
        assert_eq!(store.get("k").as_deref(), Some("small"));
    }

    #[test]
    fn memory_store_quota_counts_replacement_once() {
        let mut store = MemoryStore::with_quota(10);
        store.set("k", "12345678").unwrap();
        store.set("k", "87654321").unwrap();
        assert_eq!(store.get("k").as_deref(), Some("87654321"));
    }

    #[test]
    fn json_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("local.json");
        {
            let mut store = JsonFileStore::open(&path);
            store.set("fontSize", "120").unwrap();
        }
        let store = JsonFileStore::open(&path);
        assert_eq!(store.get("fontSize").as_deref(), Some("120"));
    }

    #[test]
    fn json_file_store_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = JsonFileStore::open(&path);
        assert_eq!(store.get("theme"), None);
    }
}
