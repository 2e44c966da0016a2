//! Best-effort content cache with a fixed time-to-live.
//!
//! Entries are `(content, timestamp)` pairs serialized as JSON. Expiry is
//! decided at read time only: a stale entry stays in the backend until it is
//! overwritten, but [`ContentCache::get`] reports it as absent. Every backend
//! or decode failure fails open (logged, treated as a miss).

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Separator between the parts of a composite cache key. Not expected in URLs.
pub const KEY_DELIMITER: char = '|';

/// Default entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// A stored content value and the instant it was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub content: Value,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl CacheEntry {
    /// An entry is valid while `now - timestamp <= ttl`.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let age = now.signed_duration_since(self.timestamp);
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => age > ttl,
            // TTL too large to represent: nothing ever expires.
            Err(_) => false,
        }
    }
}

/// A request for remote content, as declared on a content container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentRequest {
    pub url: String,
    pub cache_key: Option<String>,
    pub template: Option<String>,
}

impl ContentRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_cache_key(mut self, cache_key: impl Into<String>) -> Self {
        self.cache_key = Some(cache_key.into());
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// `url`, then `|cache_key`, then `|template`, each only when present.
    pub fn cache_key(&self) -> String {
        let mut key = self.url.clone();
        for part in [&self.cache_key, &self.template].into_iter().flatten() {
            key.push(KEY_DELIMITER);
            key.push_str(part);
        }
        key
    }
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>>;
    async fn write(&self, key: &str, bytes: Vec<u8>) -> io::Result<()>;
}

/// One JSON file per key, named by the SHA-256 digest of the key.
#[derive(Debug, Clone)]
pub struct DirBackend {
    dir: PathBuf,
}

impl DirBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{}.json", hex::encode(digest)))
    }
}

#[async_trait]
impl CacheBackend for DirBackend {
    async fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.entry_path(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write(&self, key: &str, bytes: Vec<u8>) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.entry_path(key), bytes).await
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| io::Error::other("cache lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    async fn write(&self, key: &str, bytes: Vec<u8>) -> io::Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| io::Error::other("cache lock poisoned"))?;
        entries.insert(key.to_owned(), bytes);
        Ok(())
    }
}

#[derive(Clone)]
pub struct ContentCache {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl ContentCache {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), ttl)
    }

    pub fn on_disk(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self::new(Arc::new(DirBackend::new(dir)), ttl)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.get_at(key, Utc::now()).await
    }

    pub async fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<Value> {
        let bytes = match self.backend.read(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::debug!(key, "cache miss");
                return None;
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "cache read failed");
                return None;
            }
        };
        let entry: CacheEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache entry undecodable");
                return None;
            }
        };
        if entry.is_expired(now, self.ttl) {
            tracing::debug!(key, stored = %entry.timestamp, "cache entry expired");
            return None;
        }
        tracing::debug!(key, "cache hit");
        Some(entry.content)
    }

    pub async fn put(&self, key: &str, content: Value) {
        self.put_at(key, content, Utc::now()).await
    }

    pub async fn put_at(&self, key: &str, content: Value, now: DateTime<Utc>) {
        let entry = CacheEntry {
            content,
            timestamp: now,
        };
        let bytes = match serde_json::to_vec(&entry) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache entry unencodable");
                return;
            }
        };
        if let Err(e) = self.backend.write(key, bytes).await {
            tracing::warn!(key, error = %e, "cache write failed");
        }
    }
}
