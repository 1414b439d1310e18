//! Live session recorder
//!
//! Accumulates inbound events with the gap since the previous event, then
//! seals them into a [`SessionRecording`] and hands it to the cache. Sealing
//! is one-way: appends after [`EventRecorder::finalize`] are ignored and a
//! second finalize returns the first snapshot without saving again.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::cache::SessionCache;
use crate::clock::Clock;
use crate::event::{CacheEvent, EventData, EventType, SessionRecording};
use crate::hash::prompt_hash;

/// In-memory accumulator for one live session
pub struct EventRecorder {
    prompt_hash: String,
    prompt: String,
    events: Vec<CacheEvent>,
    start_time: i64,
    last_event_time: i64,
    sealed: Option<SessionRecording>,
    persisted: bool,

    clock: Arc<dyn Clock>,
    cache: Arc<SessionCache>,
}

impl EventRecorder {
    /// Start recording a session for `prompt`
    pub fn new(prompt: &str, cache: Arc<SessionCache>, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_ms();
        let prompt_hash = prompt_hash(prompt);
        tracing::debug!(prompt_hash = %prompt_hash, "Recorder created");

        Self {
            prompt_hash,
            prompt: prompt.to_string(),
            events: Vec::new(),
            start_time: now,
            last_event_time: now,
            sealed: None,
            persisted: false,
            clock,
            cache,
        }
    }

    pub fn prompt_hash(&self) -> &str {
        &self.prompt_hash
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Events captured so far
    pub fn events(&self) -> &[CacheEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn is_finalized(&self) -> bool {
        self.sealed.is_some()
    }

    /// Whether the sealed recording actually reached the cache
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    /// Append an event stamped with the current time
    pub fn append(&mut self, event_type: EventType, data: EventData) {
        if self.is_finalized() {
            tracing::debug!(
                prompt_hash = %self.prompt_hash,
                event_type = %event_type,
                "Recorder already finalized, dropping event"
            );
            return;
        }

        let now = self.clock.now_ms();
        // a clock stepping backwards records a zero gap, never a negative one
        let delay = u64::try_from(now - self.last_event_time).unwrap_or(0);
        let timestamp = now.max(self.last_event_time);

        self.events.push(CacheEvent {
            event_type,
            data,
            timestamp,
            delay,
        });
        self.last_event_time = timestamp;
    }

    /// Seal the recording and persist it
    pub fn finalize(&mut self) -> SessionRecording {
        if let Some(sealed) = &self.sealed {
            tracing::debug!(prompt_hash = %self.prompt_hash, "Recorder already finalized");
            return sealed.clone();
        }

        let now = self.clock.now_ms();
        let recording = SessionRecording {
            prompt_hash: self.prompt_hash.clone(),
            prompt: self.prompt.clone(),
            events: self.events.clone(),
            recorded_at: iso_timestamp(now),
            total_duration: u64::try_from(now - self.start_time).unwrap_or(0),
            is_complete: true,
        };
        self.sealed = Some(recording.clone());

        tracing::info!(
            prompt_hash = %self.prompt_hash,
            events = recording.events.len(),
            total_duration_ms = recording.total_duration,
            "Recorder finalized"
        );
        self.persisted = self.cache.save(&recording);

        recording
    }
}

/// Render epoch milliseconds as `YYYY-MM-DDTHH:MM:SS.mmmZ`
fn iso_timestamp(epoch_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(epoch_ms)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso_timestamp_format() {
        assert_eq!(iso_timestamp(1_704_067_200_123), "2024-01-01T00:00:00.123Z");
        assert_eq!(iso_timestamp(0), "1970-01-01T00:00:00.000Z");
    }
}
