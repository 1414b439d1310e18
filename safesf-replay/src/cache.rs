//! Session cache keyed by prompt hash
//!
//! Recordings are stored whole under `<prefix><hash>`; a secondary index
//! (JSON array of hashes under a fixed key) lists every hash ever saved so
//! that listing and clearing work on stores without key enumeration.
//!
//! No operation here returns an error. Storage faults, corrupt JSON and
//! invalid recordings degrade to a miss / no-op / empty list with a logged
//! diagnostic, and the caller falls back to the live path. A store that
//! reports itself unavailable is not touched at all; that is logged once.
//!
//! The index is read-modify-write on every save. Two writers saving
//! different hashes at the same moment from separate processes can lose an
//! index update; one session at a time per store is assumed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::CacheConfig;
use crate::event::{RecordingSummary, SessionRecording};
use crate::hash::prompt_hash;
use crate::storage::{KeyValueStore, StoreError};

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups answered with a valid recording
    pub hits: u64,

    /// Lookups that found nothing usable
    pub misses: u64,

    /// Recordings written
    pub saves: u64,

    /// Storage or parse faults swallowed at the boundary
    pub faults: u64,
}

/// Prompt-keyed recording cache
pub struct SessionCache {
    config: CacheConfig,
    store: Arc<dyn KeyValueStore>,

    hits: AtomicU64,
    misses: AtomicU64,
    saves: AtomicU64,
    faults: AtomicU64,
    unavailable_reported: AtomicBool,
}

impl SessionCache {
    pub fn new(config: CacheConfig, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            config,
            store,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            saves: AtomicU64::new(0),
            faults: AtomicU64::new(0),
            unavailable_reported: AtomicBool::new(false),
        }
    }

    /// Whether caching is switched on
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Name of the underlying store
    pub fn backend_name(&self) -> &'static str {
        self.store.name()
    }

    /// Look up a recording for a prompt (normalized before hashing)
    pub fn get(&self, prompt: &str) -> Option<SessionRecording> {
        self.get_by_hash(&prompt_hash(prompt))
    }

    /// Look up a recording by its prompt hash
    pub fn get_by_hash(&self, hash: &str) -> Option<SessionRecording> {
        if !self.is_enabled() || !self.store_ready("read recording") {
            self.misses.fetch_add(1, Ordering::SeqCst);
            return None;
        }

        match self.load(hash) {
            Some(recording) => {
                tracing::debug!(
                    prompt_hash = %hash,
                    events = recording.events.len(),
                    "Session cache hit"
                );
                self.hits.fetch_add(1, Ordering::SeqCst);
                Some(recording)
            }
            None => {
                self.misses.fetch_add(1, Ordering::SeqCst);
                None
            }
        }
    }

    /// Whether a usable recording exists for a prompt
    ///
    /// Does not touch the hit/miss counters.
    pub fn contains(&self, prompt: &str) -> bool {
        self.is_enabled()
            && self.store_ready("read recording")
            && self.load(&prompt_hash(prompt)).is_some()
    }

    /// Persist a recording, replacing any entry under the same hash
    ///
    /// Returns whether the entry was written.
    pub fn save(&self, recording: &SessionRecording) -> bool {
        if !self.is_enabled() {
            tracing::debug!(prompt_hash = %recording.prompt_hash, "Cache disabled, not saving");
            return false;
        }
        if !self.store_ready("save recording") {
            return false;
        }

        let serialized = match serde_json::to_string(recording) {
            Ok(s) => s,
            Err(e) => {
                self.fault("serialize recording", &e.to_string());
                return false;
            }
        };

        if let Err(e) = self.store.set(&self.entry_key(&recording.prompt_hash), &serialized) {
            self.store_fault("save recording", &e);
            return false;
        }

        let mut index = self.read_index();
        if !index.iter().any(|h| h == &recording.prompt_hash) {
            index.push(recording.prompt_hash.clone());
            self.write_index(&index);
        }

        self.saves.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
            prompt_hash = %recording.prompt_hash,
            events = recording.events.len(),
            total_duration_ms = recording.total_duration,
            "Session cached"
        );
        true
    }

    /// Remove every indexed recording, then the index itself
    pub fn clear_all(&self) {
        if !self.store_ready("clear") {
            return;
        }

        let index = self.read_index();
        for hash in &index {
            if let Err(e) = self.store.remove(&self.entry_key(hash)) {
                self.store_fault("remove recording", &e);
            }
        }
        if let Err(e) = self.store.remove(&self.config.index_key) {
            self.store_fault("remove index", &e);
        }
        tracing::info!(removed = index.len(), "Session cache cleared");
    }

    /// Original prompts of every loadable recording, in index order
    pub fn list_prompts(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .map(|entry| entry.prompt)
            .filter(|prompt| !prompt.is_empty())
            .collect()
    }

    /// Summaries of every loadable recording, in index order
    pub fn entries(&self) -> Vec<RecordingSummary> {
        if !self.store_ready("list entries") {
            return Vec::new();
        }

        self.read_index()
            .iter()
            .filter_map(|hash| self.load(hash))
            .map(|recording| recording.summary())
            .collect()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::SeqCst),
            misses: self.misses.load(Ordering::SeqCst),
            saves: self.saves.load(Ordering::SeqCst),
            faults: self.faults.load(Ordering::SeqCst),
        }
    }

    fn entry_key(&self, hash: &str) -> String {
        format!("{}{}", self.config.key_prefix, hash)
    }

    /// Read and validate one entry; anything unusable is `None`
    fn load(&self, hash: &str) -> Option<SessionRecording> {
        let raw = match self.store.get(&self.entry_key(hash)) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                self.store_fault("read recording", &e);
                return None;
            }
        };

        let recording: SessionRecording = match serde_json::from_str(&raw) {
            Ok(r) => r,
            Err(e) => {
                self.fault("parse recording", &e.to_string());
                return None;
            }
        };

        if !recording.is_valid() {
            tracing::warn!(
                prompt_hash = %hash,
                is_complete = recording.is_complete,
                events = recording.events.len(),
                "Ignoring incomplete cached recording"
            );
            return None;
        }

        Some(recording)
    }

    fn read_index(&self) -> Vec<String> {
        let raw = match self.store.get(&self.config.index_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                self.store_fault("read index", &e);
                return Vec::new();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(index) => index,
            Err(e) => {
                self.fault("parse index", &e.to_string());
                Vec::new()
            }
        }
    }

    fn write_index(&self, index: &[String]) {
        match serde_json::to_string(index) {
            Ok(serialized) => {
                if let Err(e) = self.store.set(&self.config.index_key, &serialized) {
                    self.store_fault("write index", &e);
                }
            }
            Err(e) => self.fault("serialize index", &e.to_string()),
        }
    }

    /// False when the store reports itself unavailable; counted as a fault
    fn store_ready(&self, operation: &str) -> bool {
        if self.store.is_available() {
            return true;
        }

        self.faults.fetch_add(1, Ordering::SeqCst);
        if self.unavailable_reported.swap(true, Ordering::SeqCst) {
            tracing::debug!(backend = self.store.name(), operation, "Session cache storage unavailable");
        } else {
            tracing::warn!(
                backend = self.store.name(),
                operation,
                "Session cache storage unavailable, skipping cache operations"
            );
        }
        false
    }

    fn store_fault(&self, operation: &str, error: &StoreError) {
        self.fault(operation, &error.to_string());
    }

    fn fault(&self, operation: &str, message: &str) {
        self.faults.fetch_add(1, Ordering::SeqCst);
        tracing::warn!(
            backend = self.store.name(),
            operation,
            error = %message,
            "Session cache fault"
        );
    }
}
