//! Accelerated replay of cached sessions
//!
//! The player walks a recording in stored order, sleeping a scaled copy of
//! each recorded gap before re-applying the event through the same
//! [`EventDispatcher`] the live path uses. The first event is applied
//! immediately; every later wait is clamped into
//! `[min_delay_ms, max_delay_ms]` so that bursts stay visible and long
//! backend stalls do not stall the replay.
//!
//! Replay is one sequential task: the waits between events are its only
//! suspension points, and the `&mut` sink borrow keeps a second replay off
//! the same state while one is running.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ReplayTiming;
use crate::dispatch::{EventDispatcher, SessionSink};
use crate::event::{EventType, InboundEvent, SessionRecording};

/// Wait before an event that was recorded `delay_ms` after its predecessor
pub fn scaled_delay(delay_ms: u64, timing: &ReplayTiming) -> u64 {
    let scaled = (delay_ms as f64 * timing.speed).round();
    // `as` saturates on overflow and maps NaN to 0; the clamp does the rest
    (scaled as u64).clamp(timing.min_delay_ms, timing.max_delay_ms)
}

/// One entry of a replay schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedStep {
    pub index: usize,
    pub event_type: EventType,
    /// Gap as recorded
    pub recorded_delay_ms: u64,
    /// Wait before applying during replay
    pub wait_ms: u64,
}

/// Outcome of a replay
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayStats {
    /// Events applied to the sink
    pub events_applied: usize,

    /// Events whose payload could not be decoded
    pub events_skipped: usize,

    /// Sum of all waits
    pub total_wait_ms: u64,
}

/// Replays recordings into a [`SessionSink`]
#[derive(Clone)]
pub struct EventPlayer {
    timing: ReplayTiming,
    dispatcher: EventDispatcher,
}

impl EventPlayer {
    pub fn new(timing: ReplayTiming, dispatcher: EventDispatcher) -> Self {
        Self { timing, dispatcher }
    }

    pub fn timing(&self) -> &ReplayTiming {
        &self.timing
    }

    /// The wait schedule for a recording, without sleeping
    pub fn plan(&self, recording: &SessionRecording) -> Vec<PlannedStep> {
        recording
            .events
            .iter()
            .enumerate()
            .map(|(index, event)| PlannedStep {
                index,
                event_type: event.event_type,
                recorded_delay_ms: event.delay,
                wait_ms: if index == 0 { 0 } else { scaled_delay(event.delay, &self.timing) },
            })
            .collect()
    }

    /// Replay every event of `recording` into `sink`
    ///
    /// The recording is not re-validated: an empty one replays as a no-op.
    pub async fn replay<S>(&self, recording: &SessionRecording, sink: &mut S) -> ReplayStats
    where
        S: SessionSink + ?Sized,
    {
        tracing::info!(
            prompt_hash = %recording.prompt_hash,
            events = recording.events.len(),
            "Replaying cached session"
        );

        let mut stats = ReplayStats::default();

        for (step, event) in self.plan(recording).into_iter().zip(&recording.events) {
            if step.wait_ms > 0 {
                tokio::time::sleep(Duration::from_millis(step.wait_ms)).await;
                stats.total_wait_ms += step.wait_ms;
            }

            tracing::debug!(
                index = step.index,
                event_type = %step.event_type,
                wait_ms = step.wait_ms,
                "Replay step"
            );

            if self.dispatcher.apply(&InboundEvent::from(event), sink) {
                stats.events_applied += 1;
            } else {
                stats.events_skipped += 1;
            }
        }

        tracing::info!(
            prompt_hash = %recording.prompt_hash,
            applied = stats.events_applied,
            skipped = stats.events_skipped,
            total_wait_ms = stats.total_wait_ms,
            "Replay finished"
        );

        stats
    }
}
