//! Pluggable key-value storage
//!
//! The session cache only needs get/set/remove by string key plus an
//! availability check, so any persistence technology can sit behind
//! [`KeyValueStore`]. Three backends ship with the crate:
//!
//! - [`MemoryStore`]: process-local map with an optional byte quota
//! - [`FileStore`]: one file per key inside a directory
//! - [`NullStore`]: storage that is never available
//!
//! # Example
//!
//! ```rust
//! use safesf_replay::storage::{KeyValueStore, MemoryStore};
//!
//! let store = MemoryStore::new();
//! store.set("greeting", "hello").unwrap();
//! assert_eq!(store.get("greeting").unwrap().as_deref(), Some("hello"));
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use thiserror::Error;

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Storage faults
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Storage cannot be used in this execution context
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Writing would exceed the configured quota
    #[error("Quota exceeded writing {key}: {needed} bytes needed, limit {limit}")]
    QuotaExceeded {
        key: String,
        needed: usize,
        limit: usize,
    },

    /// Lock poisoned
    #[error("Storage lock poisoned")]
    Locked,

    /// Underlying I/O failure
    #[error("Storage I/O error: {0}")]
    Io(String),
}

/// Key-value storage capability
///
/// All methods take `&self`; implementations use interior mutability.
pub trait KeyValueStore: Send + Sync {
    /// Backend name (for logging)
    fn name(&self) -> &'static str;

    /// Whether the backend can be used at all
    fn is_available(&self) -> bool;

    /// Read a value; `Ok(None)` when the key is absent
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write a value, replacing any previous one
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Remove a value; removing an absent key succeeds
    fn remove(&self, key: &str) -> StoreResult<()>;

    /// All keys currently stored
    fn keys(&self) -> StoreResult<Vec<String>>;
}

/// In-memory storage
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit the total size of keys plus values, in bytes
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Bytes currently used by keys and values
    pub fn used_bytes(&self) -> usize {
        self.entries
            .read()
            .map(|e| e.iter().map(|(k, v)| k.len() + v.len()).sum())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn is_available(&self) -> bool {
        self.entries.read().is_ok()
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let entries = self.entries.read().map_err(|_| StoreError::Locked)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Locked)?;

        if let Some(limit) = self.quota_bytes {
            let used: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = used + key.len() + value.len();
            if needed > limit {
                return Err(StoreError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    limit,
                });
            }
        }

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Locked)?;
        entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        let entries = self.entries.read().map_err(|_| StoreError::Locked)?;
        Ok(entries.keys().cloned().collect())
    }
}

/// File-based storage, one `<key>.json` file per key
#[derive(Debug)]
pub struct FileStore {
    directory: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `directory`
    pub fn new<P: Into<PathBuf>>(directory: P) -> StoreResult<Self> {
        let dir = directory.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            StoreError::Io(format!("Failed to create storage directory: {}", e))
        })?;
        Ok(Self { directory: dir })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn key_file(&self, key: &str) -> PathBuf {
        self.directory.join(format!("{}.json", sanitize_key(key)))
    }
}

/// Map a key onto a safe file stem
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

impl KeyValueStore for FileStore {
    fn name(&self) -> &'static str {
        "file"
    }

    fn is_available(&self) -> bool {
        self.directory.is_dir()
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let path = self.key_file(key);
        match std::fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(format!("Failed to read {}: {}", path.display(), e))),
        }
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let path = self.key_file(key);
        // write-then-rename so a crash never leaves a torn entry behind
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)
            .map_err(|e| StoreError::Io(format!("Failed to write {}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| StoreError::Io(format!("Failed to replace {}: {}", path.display(), e)))
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let path = self.key_file(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(format!("Failed to delete {}: {}", path.display(), e))),
        }
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        let dir = std::fs::read_dir(&self.directory)
            .map_err(|e| StoreError::Io(format!("Failed to list directory: {}", e)))?;

        let mut keys = Vec::new();
        for entry in dir {
            let entry = entry.map_err(|e| StoreError::Io(e.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.push(stem.to_string());
                }
            }
        }
        Ok(keys)
    }
}

/// Storage that is never available
///
/// Stands in for execution contexts without persistence; every call fails
/// with [`StoreError::Unavailable`].
#[derive(Debug, Default, Clone)]
pub struct NullStore;

impl NullStore {
    pub fn new() -> Self {
        Self
    }
}

impl KeyValueStore for NullStore {
    fn name(&self) -> &'static str {
        "null"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn get(&self, _key: &str) -> StoreResult<Option<String>> {
        Err(StoreError::Unavailable("null store".to_string()))
    }

    fn set(&self, _key: &str, _value: &str) -> StoreResult<()> {
        Err(StoreError::Unavailable("null store".to_string()))
    }

    fn remove(&self, _key: &str) -> StoreResult<()> {
        Err(StoreError::Unavailable("null store".to_string()))
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        Err(StoreError::Unavailable("null store".to_string()))
    }
}
