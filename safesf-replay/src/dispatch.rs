//! Event dispatch: one state-update contract for live and replayed events
//!
//! [`SessionSink`] is the set of discrete updates application state accepts.
//! [`EventDispatcher`] turns an [`InboundEvent`] into exactly one of those
//! calls, whether it came off the wire or out of the cache, so a consumer
//! cannot tell a replay from a live session except by its timing.
//!
//! [`LiveSession`] is the message-callback side of the live path. Every
//! message of a known type is appended to the session's recorder verbatim,
//! whether or not its payload decodes, and then applied to the sink. The
//! recorder is sealed on the first successful terminal event.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::clock::Clock;
use crate::event::{
    AgentComplete, AgentProgress, AgentSpawned, DataReceived, EventType, InboundEvent,
    InboundRejection, SessionError, SessionEvent, SessionResult, SessionStarted, ToolCalled,
    ToolResult,
};
use crate::event::SessionRecording;
use crate::recorder::EventRecorder;

/// Terminal success payload shared by `session_complete` and `final_result`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionOutcome {
    pub request_id: Option<String>,
    pub duration_ms: Option<u64>,
    pub flow_trace: Vec<String>,
    pub result: Option<SessionResult>,
}

/// Discrete application-state updates
///
/// `at` is the time the update is applied, in epoch milliseconds.
pub trait SessionSink: Send {
    /// Drop all session state before a new session starts
    fn reset(&mut self);

    fn session_started(&mut self, event: &SessionStarted, at: i64);

    fn agent_spawned(&mut self, event: &AgentSpawned, at: i64);

    /// Progress is diagnostic; sinks may ignore it
    fn agent_progress(&mut self, _event: &AgentProgress, _at: i64) {}

    fn tool_called(&mut self, event: &ToolCalled, at: i64);

    fn tool_result(&mut self, event: &ToolResult, at: i64);

    /// Raw data arrival is diagnostic; sinks may ignore it
    fn data_received(&mut self, _event: &DataReceived, _at: i64) {}

    fn agent_complete(&mut self, event: &AgentComplete, at: i64);

    fn session_complete(&mut self, outcome: &SessionOutcome, at: i64);

    fn session_error(&mut self, message: &str, at: i64);
}

/// Routes typed events to a [`SessionSink`]
#[derive(Clone)]
pub struct EventDispatcher {
    clock: Arc<dyn Clock>,
}

impl EventDispatcher {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Parse a raw wire message and apply it
    ///
    /// Returns the normalized event when it was applied; rejected messages
    /// are logged and dropped.
    pub fn dispatch_raw<S>(&self, raw: &str, sink: &mut S) -> Option<InboundEvent>
    where
        S: SessionSink + ?Sized,
    {
        match InboundEvent::parse(raw) {
            Ok(event) => self.apply(&event, sink).then_some(event),
            Err(rejection) => {
                log_rejection(&rejection);
                None
            }
        }
    }

    /// Apply one event; returns false when its payload could not be decoded
    pub fn apply<S>(&self, event: &InboundEvent, sink: &mut S) -> bool
    where
        S: SessionSink + ?Sized,
    {
        let typed = match SessionEvent::decode(event.event_type, &event.data) {
            Ok(typed) => typed,
            Err(e) => {
                tracing::warn!(
                    event_type = %event.event_type,
                    error = %e,
                    "Dropping event with undecodable payload"
                );
                return false;
            }
        };

        self.apply_typed(&typed, sink);
        true
    }

    /// Apply an already decoded event
    pub fn apply_typed<S>(&self, event: &SessionEvent, sink: &mut S)
    where
        S: SessionSink + ?Sized,
    {
        let at = self.clock.now_ms();
        tracing::debug!(event_type = %event.event_type(), "Applying session event");

        match event {
            SessionEvent::SessionStarted(e) => sink.session_started(e, at),
            SessionEvent::AgentSpawned(e) => sink.agent_spawned(e, at),
            SessionEvent::AgentProgress(e) => sink.agent_progress(e, at),
            SessionEvent::ToolCalled(e) => sink.tool_called(e, at),
            SessionEvent::ToolResult(e) => sink.tool_result(e, at),
            SessionEvent::DataReceived(e) => sink.data_received(e, at),
            SessionEvent::AgentComplete(e) => sink.agent_complete(e, at),
            SessionEvent::SessionComplete(e) => {
                let outcome = SessionOutcome {
                    request_id: e.request_id.clone(),
                    duration_ms: e.duration_ms,
                    flow_trace: e.flow_trace.clone(),
                    result: e.final_response.clone(),
                };
                sink.session_complete(&outcome, at);
            }
            SessionEvent::FinalResult(e) => {
                if e.success == Some(false) {
                    let message = e.error.as_deref().unwrap_or("Session failed");
                    sink.session_error(message, at);
                } else {
                    let outcome = SessionOutcome {
                        request_id: e.request_id.clone(),
                        duration_ms: e.duration_ms,
                        flow_trace: e.flow_trace.clone(),
                        result: Some(e.result.clone()),
                    };
                    sink.session_complete(&outcome, at);
                }
            }
            SessionEvent::SessionError(e) => {
                let message = e.error.as_deref().unwrap_or("Unknown error");
                sink.session_error(message, at);
            }
        }
    }
}

fn log_rejection(rejection: &InboundRejection) {
    match rejection {
        InboundRejection::UnknownType(t) => {
            tracing::debug!(event_type = %t, "Ignoring unknown event type");
        }
        other => tracing::warn!(reason = %other, "Ignoring malformed inbound message"),
    }
}

/// Where a live session stands after a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivePhase {
    /// No terminal event yet
    Streaming,
    /// A successful terminal event sealed the recording; a trailing
    /// `final_result` may still follow
    Completed,
    /// `final_result` or `session_error` arrived; nothing more is expected
    Settled,
}

/// Drives one live session from inbound messages
pub struct LiveSession {
    id: Uuid,
    prompt: String,
    dispatcher: EventDispatcher,
    recorder: Option<EventRecorder>,
    recording: Option<SessionRecording>,
    phase: LivePhase,
    applied: usize,
    persisted: bool,
}

impl LiveSession {
    pub fn new(prompt: &str, dispatcher: EventDispatcher, recorder: EventRecorder) -> Self {
        let id = Uuid::new_v4();
        tracing::info!(session_id = %id, prompt_hash = %recorder.prompt_hash(), "Live session started");

        Self {
            id,
            prompt: prompt.to_string(),
            dispatcher,
            recorder: Some(recorder),
            recording: None,
            phase: LivePhase::Streaming,
            applied: 0,
            persisted: false,
        }
    }

    /// Session id for log correlation
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn phase(&self) -> LivePhase {
        self.phase
    }

    /// Number of messages applied to the sink
    pub fn applied(&self) -> usize {
        self.applied
    }

    /// Recorder still attached to this session (until it is sealed or
    /// abandoned)
    pub fn recorder(&self) -> Option<&EventRecorder> {
        self.recorder.as_ref()
    }

    /// The sealed recording, once a successful terminal event arrived
    pub fn recording(&self) -> Option<&SessionRecording> {
        self.recording.as_ref()
    }

    /// Whether the sealed recording was written to the cache
    pub fn persisted(&self) -> bool {
        self.persisted
    }

    /// Handle one raw wire message
    pub fn handle_message<S>(&mut self, raw: &str, sink: &mut S) -> LivePhase
    where
        S: SessionSink + ?Sized,
    {
        match InboundEvent::parse(raw) {
            Ok(event) => self.handle_event(event, sink),
            Err(rejection) => {
                log_rejection(&rejection);
                self.phase
            }
        }
    }

    /// Handle one normalized event
    pub fn handle_event<S>(&mut self, event: InboundEvent, sink: &mut S) -> LivePhase
    where
        S: SessionSink + ?Sized,
    {
        let event_type = event.event_type;
        let failed_final = event_type == EventType::FinalResult
            && event.data.get("success") == Some(&Value::Bool(false));

        match (&mut self.recorder, &self.recording) {
            (Some(recorder), _) => recorder.append(event_type, event.data.clone()),
            (None, Some(_)) => {
                tracing::debug!(
                    session_id = %self.id,
                    event_type = %event_type,
                    "Event after finalization, not recorded"
                );
            }
            (None, None) => {}
        }

        if self.dispatcher.apply(&event, sink) {
            self.applied += 1;
        }

        if event_type == EventType::SessionError || failed_final {
            self.abandon("session error");
            self.phase = LivePhase::Settled;
        } else if event_type.is_success_terminal() {
            if let Some(mut recorder) = self.recorder.take() {
                self.recording = Some(recorder.finalize());
                self.persisted = recorder.is_persisted();
            }
            self.phase = if event_type == EventType::FinalResult {
                LivePhase::Settled
            } else {
                LivePhase::Completed
            };
        }

        self.phase
    }

    /// Drop the recorder without persisting anything
    pub fn abandon(&mut self, reason: &str) {
        if let Some(recorder) = self.recorder.take() {
            tracing::info!(
                session_id = %self.id,
                reason,
                events = recorder.len(),
                "Live session recording discarded"
            );
        }
    }

    /// End a session that is still streaming because its transport failed
    ///
    /// The sink sees a session error and the partial recording is dropped.
    /// Does nothing once a terminal event has arrived.
    pub fn fail<S>(&mut self, message: &str, sink: &mut S)
    where
        S: SessionSink + ?Sized,
    {
        if self.phase != LivePhase::Streaming {
            return;
        }

        self.abandon(message);
        let error = SessionError {
            request_id: None,
            error: Some(message.to_string()),
        };
        self.dispatcher.apply_typed(&SessionEvent::SessionError(error), sink);
        self.phase = LivePhase::Settled;
    }

    /// Seal-or-drop on shutdown; returns the sealed recording if any
    pub fn close(mut self) -> Option<SessionRecording> {
        self.abandon("connection closed before completion");
        self.recording
    }
}
