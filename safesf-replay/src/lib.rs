//! SafeSF session recorder and replayer
//!
//! The SafeSF client shows a multi-agent backend answering a safety question
//! as a live graph of agents and tool calls. This crate is the part of the
//! client that makes repeat questions instant:
//!
//! - Live sessions are recorded event by event, with the gap between events
//! - Finished sessions are cached under a hash of the normalized prompt
//! - Cached sessions are replayed at accelerated, bounded pace
//! - Live and replayed events drive the same state-update contract
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    SESSION CONTROLLER                       │
//! │                                                             │
//! │   query ──► SessionCache ──hit──► EventPlayer ──┐           │
//! │                  │                              │           │
//! │                 miss                            ▼           │
//! │                  │                       EventDispatcher    │
//! │                  ▼                              │           │
//! │           LiveEventSource ──► LiveSession ──────┤           │
//! │                                   │             ▼           │
//! │                             EventRecorder   SessionSink     │
//! │                                   │        (SessionState)   │
//! │                                   ▼                         │
//! │                             SessionCache                    │
//! │                                   │                         │
//! │                            KeyValueStore                    │
//! │                      (memory / file / null)                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use safesf_replay::{ReplayConfig, SessionController, SessionState};
//! use safesf_replay::source::ChannelSource;
//!
//! let controller = SessionController::new(ReplayConfig::from_env())?;
//! let (feed, mut source) = ChannelSource::new(64);
//! let mut state = SessionState::new();
//!
//! // First run goes live and records; the same question later replays.
//! let outcome = controller
//!     .submit_query("Is Union Square safe at night?", &mut state, &mut source)
//!     .await?;
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod hash;
pub mod player;
pub mod recorder;
pub mod source;
pub mod state;
pub mod storage;

pub use cache::{CacheStats, SessionCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheBackendType, CacheConfig, ReplayConfig, ReplayTiming};
pub use dispatch::{EventDispatcher, LivePhase, LiveSession, SessionOutcome, SessionSink};
pub use error::{ReplayError, ReplayResult};
pub use event::{CacheEvent, EventType, InboundEvent, RecordingSummary, SessionEvent, SessionRecording};
pub use hash::{hash_text, normalize_prompt, prompt_hash};
pub use player::{scaled_delay, EventPlayer, ReplayStats};
pub use recorder::EventRecorder;
pub use source::LiveEventSource;
pub use state::SessionState;
pub use storage::{FileStore, KeyValueStore, MemoryStore, NullStore, StoreError};

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// How a query was answered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum QueryOutcome {
    /// Served from cache
    Replayed {
        prompt_hash: String,
        stats: ReplayStats,
    },
    /// Answered by the live backend
    Live {
        prompt_hash: String,
        /// Messages applied to the sink
        events_applied: usize,
        /// Whether a sealed recording was written to the cache
        persisted: bool,
    },
}

/// Entry point tying cache, recorder, player and live source together
pub struct SessionController {
    config: ReplayConfig,
    cache: Arc<SessionCache>,
    clock: Arc<dyn Clock>,
    dispatcher: EventDispatcher,
    player: EventPlayer,

    /// Held for the whole of a session, live or replayed
    active: Mutex<()>,
}

impl SessionController {
    /// Create a controller with the store selected by `config.cache`
    pub fn new(config: ReplayConfig) -> ReplayResult<Self> {
        config.validate()?;

        let store: Arc<dyn KeyValueStore> = match config.cache.backend {
            CacheBackendType::Memory => Arc::new(MemoryStore::new()),
            CacheBackendType::File => {
                let dir = config.cache.directory.clone().ok_or_else(|| {
                    ReplayError::Config("file cache backend requires a directory".to_string())
                })?;
                match FileStore::new(dir) {
                    Ok(store) => Arc::new(store),
                    Err(e) => {
                        // storage is optional; run uncached rather than fail
                        tracing::warn!(error = %e, "File cache unavailable, continuing without cache");
                        Arc::new(NullStore::new())
                    }
                }
            }
        };

        Ok(Self::with_parts(config, store, Arc::new(SystemClock)))
    }

    /// Create with an explicit store and clock
    pub fn with_parts(
        config: ReplayConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = Arc::new(SessionCache::new(config.cache.clone(), store));
        let dispatcher = EventDispatcher::new(clock.clone());
        let player = EventPlayer::new(config.timing, dispatcher.clone());

        Self {
            config,
            cache,
            clock,
            dispatcher,
            player,
            active: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<SessionCache> {
        &self.cache
    }

    pub fn player(&self) -> &EventPlayer {
        &self.player
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Start a live session for a host that delivers messages itself
    pub fn live_session(&self, prompt: &str) -> LiveSession {
        let recorder = EventRecorder::new(prompt, self.cache.clone(), self.clock.clone());
        LiveSession::new(prompt, self.dispatcher.clone(), recorder)
    }

    /// Answer a query from cache if possible, otherwise from `source`
    ///
    /// The sink is reset first. Fails with [`ReplayError::SessionActive`]
    /// when another session is running on this controller.
    pub async fn submit_query<S, E>(
        &self,
        query: &str,
        sink: &mut S,
        source: &mut E,
    ) -> ReplayResult<QueryOutcome>
    where
        S: SessionSink + ?Sized,
        E: LiveEventSource + ?Sized,
    {
        let _guard = self.active.try_lock().map_err(|_| ReplayError::SessionActive)?;
        sink.reset();

        if let Some(recording) = self.cache.get(query) {
            let stats = self.player.replay(&recording, sink).await;
            return Ok(QueryOutcome::Replayed {
                prompt_hash: recording.prompt_hash,
                stats,
            });
        }

        self.run_live(query, sink, source).await
    }

    /// Replay whatever is cached for `query`, if anything
    pub async fn replay_cached<S>(&self, query: &str, sink: &mut S) -> ReplayResult<Option<ReplayStats>>
    where
        S: SessionSink + ?Sized,
    {
        let _guard = self.active.try_lock().map_err(|_| ReplayError::SessionActive)?;

        let Some(recording) = self.cache.get(query) else {
            return Ok(None);
        };
        sink.reset();
        Ok(Some(self.player.replay(&recording, sink).await))
    }

    async fn run_live<S, E>(&self, query: &str, sink: &mut S, source: &mut E) -> ReplayResult<QueryOutcome>
    where
        S: SessionSink + ?Sized,
        E: LiveEventSource + ?Sized,
    {
        source.connect(&self.config.endpoint).await?;
        tracing::info!(source = source.name(), endpoint = %self.config.endpoint, "Running live query");

        let mut session = self.live_session(query);
        let prompt_hash = prompt_hash(query);

        if let Err(e) = source.send_query(query).await {
            session.fail(&e.to_string(), sink);
            let _ = source.disconnect().await;
            return Err(e);
        }

        let grace = Duration::from_millis(self.config.complete_grace_ms);
        loop {
            let next = match session.phase() {
                LivePhase::Streaming => source.next_message().await,
                LivePhase::Completed => {
                    match tokio::time::timeout(grace, source.next_message()).await {
                        Ok(next) => next,
                        Err(_) => break,
                    }
                }
                LivePhase::Settled => break,
            };

            match next {
                Ok(Some(raw)) => {
                    session.handle_message(&raw, sink);
                }
                Ok(None) => {
                    if session.phase() == LivePhase::Streaming {
                        tracing::warn!(session_id = %session.id(), "Live source closed before completion");
                        session.fail("Connection closed before the session completed", sink);
                    }
                    break;
                }
                Err(e) => {
                    tracing::warn!(session_id = %session.id(), error = %e, "Live source failed");
                    if session.phase() == LivePhase::Streaming {
                        session.fail(&e.to_string(), sink);
                        let _ = source.disconnect().await;
                        return Err(e);
                    }
                    break;
                }
            }
        }

        if let Err(e) = source.disconnect().await {
            tracing::debug!(error = %e, "Disconnect failed");
        }

        let events_applied = session.applied();
        let persisted = session.persisted();
        session.close();

        Ok(QueryOutcome::Live {
            prompt_hash,
            events_applied,
            persisted,
        })
    }
}
