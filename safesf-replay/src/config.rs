//! Configuration for the SafeSF session recorder/replayer

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ReplayError, ReplayResult};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// URL of the live event source
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Session cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Replay pacing
    #[serde(default)]
    pub timing: ReplayTiming,

    /// How long to keep listening after `session_complete` for a trailing
    /// `final_result` before closing the live session
    #[serde(default = "default_complete_grace")]
    pub complete_grace_ms: u64,
}

fn default_true() -> bool { true }
fn default_endpoint() -> String { "ws://localhost:8765".to_string() }
fn default_complete_grace() -> u64 { 250 }

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            cache: CacheConfig::default(),
            timing: ReplayTiming::default(),
            complete_grace_ms: default_complete_grace(),
        }
    }
}

impl ReplayConfig {
    /// Defaults overlaid with `SAFESF_*` environment variables
    pub fn from_env() -> Self {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> ReplayResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup
    ///
    /// Unparseable values are ignored with a warning and the current value
    /// is kept.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("SAFESF_WS_URL").filter(|u| !u.trim().is_empty()) {
            self.endpoint = url.trim().to_string();
        }

        if let Some(raw) = lookup("SAFESF_CACHE_ENABLED") {
            match parse_flag(&raw) {
                Some(enabled) => self.cache.enabled = enabled,
                None => tracing::warn!(value = %raw, "Ignoring unparseable SAFESF_CACHE_ENABLED"),
            }
        }

        if let Some(dir) = lookup("SAFESF_CACHE_DIR").filter(|d| !d.trim().is_empty()) {
            self.cache.backend = CacheBackendType::File;
            self.cache.directory = Some(PathBuf::from(dir));
        }

        if let Some(raw) = lookup("SAFESF_REPLAY_SPEED") {
            match raw.trim().parse::<f64>() {
                Ok(speed) => self.timing.speed = speed,
                Err(_) => tracing::warn!(value = %raw, "Ignoring unparseable SAFESF_REPLAY_SPEED"),
            }
        }

        self
    }

    /// Check invariants the rest of the crate relies on
    pub fn validate(&self) -> ReplayResult<()> {
        if self.endpoint.trim().is_empty() {
            return Err(ReplayError::Config("endpoint must not be empty".to_string()));
        }
        self.timing.validate()?;
        if self.cache.backend == CacheBackendType::File && self.cache.directory.is_none() {
            return Err(ReplayError::Config(
                "file cache backend requires a directory".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Session cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether cached sessions are served and saved
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Storage backend
    #[serde(default)]
    pub backend: CacheBackendType,

    /// Directory for the file backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,

    /// Prefix for per-recording keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Key of the secondary index (list of known prompt hashes)
    #[serde(default = "default_index_key")]
    pub index_key: String,
}

fn default_key_prefix() -> String { "safesf_cache_".to_string() }
fn default_index_key() -> String { "safesf_cache_index".to_string() }

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackendType::Memory,
            directory: None,
            key_prefix: default_key_prefix(),
            index_key: default_index_key(),
        }
    }
}

/// Cache backend type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendType {
    #[default]
    Memory,
    File,
}

/// Replay pacing
///
/// Each stored gap is multiplied by `speed`, rounded, then clamped into
/// `[min_delay_ms, max_delay_ms]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReplayTiming {
    #[serde(default = "default_speed")]
    pub speed: f64,

    #[serde(default = "default_min_delay")]
    pub min_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

fn default_speed() -> f64 { 0.15 }
fn default_min_delay() -> u64 { 50 }
fn default_max_delay() -> u64 { 800 }

impl Default for ReplayTiming {
    fn default() -> Self {
        Self {
            speed: default_speed(),
            min_delay_ms: default_min_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

impl ReplayTiming {
    pub fn validate(&self) -> ReplayResult<()> {
        if !self.speed.is_finite() || self.speed <= 0.0 {
            return Err(ReplayError::Config(format!(
                "replay speed must be a positive number, got {}",
                self.speed
            )));
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(ReplayError::Config(format!(
                "min delay {}ms exceeds max delay {}ms",
                self.min_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ReplayConfig::default();
        assert_eq!(config.endpoint, "ws://localhost:8765");
        assert!(config.cache.enabled);
        assert_eq!(config.cache.backend, CacheBackendType::Memory);
        assert_eq!(config.timing.speed, 0.15);
        assert_eq!(config.timing.min_delay_ms, 50);
        assert_eq!(config.timing.max_delay_ms, 800);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let config = ReplayConfig::default().with_overrides(lookup(&[
            ("SAFESF_WS_URL", "ws://backend:9000"),
            ("SAFESF_CACHE_ENABLED", "off"),
            ("SAFESF_CACHE_DIR", "/tmp/safesf"),
            ("SAFESF_REPLAY_SPEED", "0.5"),
        ]));

        assert_eq!(config.endpoint, "ws://backend:9000");
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.backend, CacheBackendType::File);
        assert_eq!(config.cache.directory, Some(PathBuf::from("/tmp/safesf")));
        assert_eq!(config.timing.speed, 0.5);
    }

    #[test]
    fn test_bad_env_values_are_ignored() {
        let config = ReplayConfig::default().with_overrides(lookup(&[
            ("SAFESF_CACHE_ENABLED", "maybe"),
            ("SAFESF_REPLAY_SPEED", "fast"),
        ]));

        assert!(config.cache.enabled);
        assert_eq!(config.timing.speed, 0.15);
    }

    #[test]
    fn test_validate_rejects_bad_timing() {
        let mut config = ReplayConfig::default();
        config.timing.speed = 0.0;
        assert!(matches!(config.validate(), Err(ReplayError::Config(_))));

        let mut config = ReplayConfig::default();
        config.timing.min_delay_ms = 900;
        assert!(matches!(config.validate(), Err(ReplayError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_file_backend_without_dir() {
        let mut config = ReplayConfig::default();
        config.cache.backend = CacheBackendType::File;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ReplayConfig =
            serde_json::from_str(r#"{"cache": {"enabled": false}}"#).unwrap();
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.key_prefix, "safesf_cache_");
        assert_eq!(config.endpoint, "ws://localhost:8765");
        assert_eq!(config.timing, ReplayTiming::default());
    }
}
