//! SessionController tests

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use safesf_replay::clock::ManualClock;
use safesf_replay::source::{query_message, ChannelSource, LiveEventSource};
use safesf_replay::state::{SessionState, SessionStatus};
use safesf_replay::storage::{KeyValueStore, MemoryStore};
use safesf_replay::{
    CacheBackendType, QueryOutcome, ReplayConfig, ReplayError, ReplayResult, SessionController,
};
use serde_json::json;
use tokio::sync::mpsc;

const PROMPT: &str = "Is Union Square safe at night?";

fn session_messages() -> Vec<String> {
    vec![
        json!({"type": "session_started", "request_id": "REQ-1", "query": PROMPT}),
        json!({"type": "agent_spawned", "agent_id": "LOC-001", "agent_type": "location-resolver"}),
        json!({"type": "tool_called", "agent_id": "LOC-001", "tool_name": "geocode"}),
        json!({"type": "tool_result", "agent_id": "LOC-001", "row_count": 1}),
        json!({"type": "agent_complete", "agent_id": "LOC-001", "status": "completed"}),
        json!({"type": "agent_spawned", "agent_id": "DATA-002", "agent_type": "data-agent"}),
        json!({"type": "tool_called", "agent_id": "DATA-002", "tool_name": "sql_query"}),
        json!({"type": "tool_result", "agent_id": "DATA-002", "row_count": 42}),
        json!({"type": "data_received", "agent_id": "DATA-002", "row_count": 42, "coordinates": [[37.78, -122.40]]}),
        json!({"type": "agent_complete", "agent_id": "DATA-002", "status": "completed"}),
        json!({
            "type": "session_complete",
            "request_id": "REQ-1",
            "duration_ms": 3200,
            "flow_trace": ["REQ-1", "LOC-001", "DATA-002"],
            "final_response": {"safety_score": 7.2, "rating": "moderate"}
        }),
        json!({"type": "final_result", "success": true, "request_id": "REQ-1", "safety_score": 7.2}),
    ]
    .into_iter()
    .map(|v| v.to_string())
    .collect()
}

fn controller() -> (Arc<MemoryStore>, SessionController) {
    let store = Arc::new(MemoryStore::new());
    let controller = SessionController::with_parts(
        ReplayConfig::default(),
        store.clone(),
        Arc::new(ManualClock::default()),
    );
    (store, controller)
}

async fn fed_source(messages: Vec<String>) -> ChannelSource {
    let (tx, source) = ChannelSource::new(messages.len().max(1));
    for message in messages {
        tx.send(message).await.unwrap();
    }
    source
}

/// Yields scripted messages, then fails
struct FlakySource {
    messages: VecDeque<String>,
    disconnected: bool,
}

#[async_trait]
impl LiveEventSource for FlakySource {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn connect(&mut self, _endpoint: &str) -> ReplayResult<()> {
        Ok(())
    }

    async fn send_query(&mut self, _query: &str) -> ReplayResult<()> {
        Ok(())
    }

    async fn next_message(&mut self) -> ReplayResult<Option<String>> {
        match self.messages.pop_front() {
            Some(message) => Ok(Some(message)),
            None => Err(ReplayError::Transport("connection reset".to_string())),
        }
    }

    async fn disconnect(&mut self) -> ReplayResult<()> {
        self.disconnected = true;
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_miss_goes_live_then_hit_replays() {
    let (_, controller) = controller();

    let mut source = fed_source(session_messages()).await;
    let mut state = SessionState::new();
    let outcome = controller.submit_query(PROMPT, &mut state, &mut source).await.unwrap();

    match outcome {
        QueryOutcome::Live {
            events_applied,
            persisted,
            ..
        } => {
            assert_eq!(events_applied, 12);
            assert!(persisted);
        }
        other => panic!("expected live outcome, got {:?}", other),
    }
    assert_eq!(state.status, SessionStatus::Complete);
    let live_state = state.clone();

    // a source that would fail proves the second run never touches it
    let mut dead = FlakySource {
        messages: VecDeque::new(),
        disconnected: false,
    };
    let outcome = controller
        .submit_query("  is union square safe at NIGHT? ", &mut state, &mut dead)
        .await
        .unwrap();

    match outcome {
        QueryOutcome::Replayed { stats, .. } => {
            // the trailing final_result arrived after sealing
            assert_eq!(stats.events_applied, 11);
            assert_eq!(stats.events_skipped, 0);
        }
        other => panic!("expected replay, got {:?}", other),
    }
    assert!(!dead.disconnected);
    assert_eq!(state.status, SessionStatus::Complete);
    assert_eq!(state.agents, live_state.agents);
    assert_eq!(state.flow_trace, live_state.flow_trace);
}

#[tokio::test(start_paused = true)]
async fn test_submit_resets_sink_first() {
    let (_, controller) = controller();
    let mut state = SessionState::new();
    state.error = Some("left over".to_string());
    state.status = SessionStatus::Error;

    let mut source = fed_source(session_messages()).await;
    controller.submit_query(PROMPT, &mut state, &mut source).await.unwrap();

    assert!(state.error.is_none());
    assert_eq!(state.status, SessionStatus::Complete);
}

#[tokio::test(start_paused = true)]
async fn test_query_request_is_sent_on_miss() {
    let (_, controller) = controller();
    let (out_tx, mut out_rx) = mpsc::channel(4);
    let (tx, source) = ChannelSource::new(16);
    let mut source = source.with_outbound(out_tx);
    for message in session_messages() {
        tx.send(message).await.unwrap();
    }

    let mut state = SessionState::new();
    controller.submit_query(PROMPT, &mut state, &mut source).await.unwrap();

    assert_eq!(out_rx.recv().await.unwrap(), query_message(PROMPT));
}

#[tokio::test(start_paused = true)]
async fn test_source_closing_early_persists_nothing() {
    let (_, controller) = controller();
    let messages: Vec<String> = session_messages().into_iter().take(5).collect();

    let mut source = fed_source(messages).await;
    let mut state = SessionState::new();
    let outcome = controller.submit_query(PROMPT, &mut state, &mut source).await.unwrap();

    assert!(matches!(
        outcome,
        QueryOutcome::Live {
            events_applied: 5,
            persisted: false,
            ..
        }
    ));
    assert!(!controller.cache().contains(PROMPT));
    assert_eq!(state.status, SessionStatus::Error);
    assert_eq!(
        state.error.as_deref(),
        Some("Connection closed before the session completed")
    );
}

#[tokio::test(start_paused = true)]
async fn test_session_error_persists_nothing() {
    let (store, controller) = controller();
    let mut messages: Vec<String> = session_messages().into_iter().take(3).collect();
    messages.push(json!({"type": "session_error", "error": "upstream timeout"}).to_string());

    let mut source = fed_source(messages).await;
    let mut state = SessionState::new();
    let outcome = controller.submit_query(PROMPT, &mut state, &mut source).await.unwrap();

    assert!(matches!(outcome, QueryOutcome::Live { persisted: false, .. }));
    assert_eq!(state.status, SessionStatus::Error);
    assert_eq!(state.error.as_deref(), Some("upstream timeout"));
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_grace_period_ends_session_without_final_result() {
    let (_, controller) = controller();
    let (tx, mut source) = ChannelSource::new(16);
    for message in session_messages().into_iter().take(11) {
        tx.send(message).await.unwrap();
    }

    let mut state = SessionState::new();
    // tx stays alive: only the grace timeout can end the loop
    let outcome = controller.submit_query(PROMPT, &mut state, &mut source).await.unwrap();
    drop(tx);

    assert!(matches!(
        outcome,
        QueryOutcome::Live {
            events_applied: 11,
            persisted: true,
            ..
        }
    ));
    assert!(controller.cache().contains(PROMPT));
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure_mid_session_is_an_error() {
    let (_, controller) = controller();
    let mut source = FlakySource {
        messages: session_messages().into_iter().take(4).collect(),
        disconnected: false,
    };

    let mut state = SessionState::new();
    let result = controller.submit_query(PROMPT, &mut state, &mut source).await;

    assert!(matches!(result, Err(ReplayError::Transport(_))));
    assert!(source.disconnected);
    assert!(!controller.cache().contains(PROMPT));
    assert_eq!(state.status, SessionStatus::Error);
    assert_eq!(state.error.as_deref(), Some("Transport error: connection reset"));
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure_after_completion_keeps_recording() {
    let (_, controller) = controller();
    let mut source = FlakySource {
        messages: session_messages().into_iter().take(11).collect(),
        disconnected: false,
    };

    let mut state = SessionState::new();
    let outcome = controller.submit_query(PROMPT, &mut state, &mut source).await.unwrap();

    assert!(matches!(outcome, QueryOutcome::Live { persisted: true, .. }));
    assert!(controller.cache().contains(PROMPT));
    assert_eq!(state.status, SessionStatus::Complete);
}

#[tokio::test(start_paused = true)]
async fn test_second_session_is_rejected_while_one_is_active() {
    let (_, controller) = controller();
    let controller = Arc::new(controller);

    // a source that never delivers anything keeps the first session open
    let (tx, mut source) = ChannelSource::new(1);
    let running = {
        let controller = controller.clone();
        tokio::spawn(async move {
            let mut state = SessionState::new();
            controller.submit_query(PROMPT, &mut state, &mut source).await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let mut other_source = fed_source(session_messages()).await;
    let mut state = SessionState::new();
    let result = controller
        .submit_query("Is SoMa safe?", &mut state, &mut other_source)
        .await;
    assert!(matches!(result, Err(ReplayError::SessionActive)));

    drop(tx);
    let first = running.await.unwrap().unwrap();
    assert!(matches!(first, QueryOutcome::Live { events_applied: 0, .. }));

    // gate released
    let mut other_source = fed_source(session_messages()).await;
    assert!(controller
        .submit_query("Is SoMa safe?", &mut state, &mut other_source)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_disabled_cache_always_goes_live() {
    let store = Arc::new(MemoryStore::new());
    let mut config = ReplayConfig::default();
    config.cache.enabled = false;
    let controller =
        SessionController::with_parts(config, store.clone(), Arc::new(ManualClock::default()));

    for _ in 0..2 {
        let mut source = fed_source(session_messages()).await;
        let mut state = SessionState::new();
        let outcome = controller.submit_query(PROMPT, &mut state, &mut source).await.unwrap();
        assert!(matches!(outcome, QueryOutcome::Live { persisted: false, .. }));
        assert_eq!(state.status, SessionStatus::Complete);
    }
    assert!(store.keys().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_full_store_reports_nothing_persisted() {
    let store = Arc::new(MemoryStore::with_quota(64));
    let controller = SessionController::with_parts(
        ReplayConfig::default(),
        store.clone(),
        Arc::new(ManualClock::default()),
    );

    let mut source = fed_source(session_messages()).await;
    let mut state = SessionState::new();
    let outcome = controller.submit_query(PROMPT, &mut state, &mut source).await.unwrap();

    assert!(matches!(
        outcome,
        QueryOutcome::Live {
            events_applied: 12,
            persisted: false,
            ..
        }
    ));
    assert_eq!(state.status, SessionStatus::Complete);
    assert!(!controller.cache().contains(PROMPT));
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_mistyped_result_fields_still_complete_and_cache() {
    let (_, controller) = controller();
    let mut messages: Vec<String> = session_messages().into_iter().take(10).collect();
    messages.push(
        json!({
            "type": "session_complete",
            "request_id": "REQ-1",
            "duration_ms": 3200,
            "flow_trace": ["REQ-1", "LOC-001", "DATA-002"],
            "final_response": {
                "safety_score": 7.2,
                "analysis": {"overview": "ok"},
                "recommendations": "Stay on lit streets"
            }
        })
        .to_string(),
    );

    let mut source = fed_source(messages).await;
    let mut state = SessionState::new();
    let outcome = controller.submit_query(PROMPT, &mut state, &mut source).await.unwrap();

    assert!(matches!(
        outcome,
        QueryOutcome::Live {
            events_applied: 11,
            persisted: true,
            ..
        }
    ));
    assert_eq!(state.status, SessionStatus::Complete);
    let result = state.result.clone().unwrap();
    assert_eq!(result.safety_score, Some(7.2));
    assert_eq!(result.recommendations, vec!["Stay on lit streets"]);
    assert_eq!(result.analysis.as_deref(), Some(r#"{"overview":"ok"}"#));

    let cached = controller.cache().get(PROMPT).unwrap();
    assert_eq!(cached.events.len(), 11);
    assert_eq!(
        cached.events[10].data["final_response"]["recommendations"],
        "Stay on lit streets"
    );

    // the replay lands on the same state
    let mut replayed = SessionState::new();
    let stats = controller.replay_cached(PROMPT, &mut replayed).await.unwrap().unwrap();
    assert_eq!(stats.events_skipped, 0);
    assert_eq!(replayed.status, SessionStatus::Complete);
    assert_eq!(replayed.result, state.result);
}

#[test]
fn test_new_with_file_backend_requires_directory() {
    let mut config = ReplayConfig::default();
    config.cache.backend = CacheBackendType::File;

    assert!(matches!(
        SessionController::new(config),
        Err(ReplayError::Config(_))
    ));
}

#[test]
fn test_new_with_file_backend() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ReplayConfig::default();
    config.cache.backend = CacheBackendType::File;
    config.cache.directory = Some(dir.path().to_path_buf());

    let controller = SessionController::new(config).unwrap();
    assert_eq!(controller.cache().backend_name(), "file");
}
