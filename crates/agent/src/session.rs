//! Session Store (§4.7): process-wide mapping from call id to Call
//! Session. Reads are lock-free snapshots via `dashmap`; writes serialize
//! on the per-session lock each `CallSession` carries internally.
//!
//! Grounded in the teacher's `SessionManager`
//! (`server/src/session.rs`): sharded map, capacity ceiling, a background
//! cleanup task gated by a `watch::Sender<bool>` shutdown signal.

use crate::playback::PlaybackManager;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use voxrelay_core::{ConversationHistory, Error, Provider, Result, TurnIndex};

/// One active call (§3 "Call Session"). Owns its provider handle,
/// conversation history, and playback handles exclusively; the audio
/// transport is owned by the call lifecycle controller that created this
/// session and is not modeled here to keep this crate free of the
/// transport dependency.
pub struct CallSession {
    pub id: String,
    pub caller_number: Option<String>,
    pub callee_number: Option<String>,
    pub provider: Arc<dyn Provider>,
    pub playback: Arc<PlaybackManager>,
    history: RwLock<ConversationHistory>,
    turn: AtomicU64,
    created_at: Instant,
    last_activity: RwLock<Instant>,
    active: AtomicBool,
}

impl CallSession {
    pub fn new(id: impl Into<String>, provider: Arc<dyn Provider>, system_prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            caller_number: None,
            callee_number: None,
            provider,
            playback: Arc::new(PlaybackManager::new()),
            history: RwLock::new(ConversationHistory::new(system_prompt, 64)),
            turn: AtomicU64::new(0),
            created_at: Instant::now(),
            last_activity: RwLock::new(Instant::now()),
            active: AtomicBool::new(true),
        }
    }

    pub fn history(&self) -> ConversationHistory {
        self.history.read().clone()
    }

    pub fn with_history_mut<R>(&self, f: impl FnOnce(&mut ConversationHistory) -> R) -> R {
        f(&mut self.history.write())
    }

    pub fn current_turn(&self) -> TurnIndex {
        TurnIndex(self.turn.load(Ordering::SeqCst))
    }

    /// Advance to the next turn. Turns are strictly ordered per session
    /// (§3); this is the only way the turn counter moves forward.
    pub fn advance_turn(&self) -> TurnIndex {
        let next = self.turn.fetch_add(1, Ordering::SeqCst) + 1;
        TurnIndex(next)
    }

    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.last_activity.read().elapsed() > timeout
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Terminate the session: no new playbacks may be enqueued after this
    /// returns (§3 invariant).
    pub fn terminate(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.playback.terminate();
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Process-wide session map (§4.7). Sharded via `dashmap` for lock-free
/// reads; `create`/`remove` pay the per-shard lock dashmap already uses.
pub struct SessionManager {
    sessions: DashMap<String, Arc<CallSession>>,
    max_sessions: usize,
    session_timeout: Duration,
    cleanup_interval: Duration,
}

impl SessionManager {
    pub fn new(max_sessions: usize) -> Self {
        Self::with_config(max_sessions, Duration::from_secs(3600), Duration::from_secs(300))
    }

    pub fn with_config(max_sessions: usize, session_timeout: Duration, cleanup_interval: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            max_sessions,
            session_timeout,
            cleanup_interval,
        }
    }

    /// Start a background task that periodically evicts expired sessions.
    /// Returns a shutdown sender; dropping it does not stop the task, it
    /// must be sent `true` explicitly.
    pub fn start_cleanup_task(self: &Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let manager = Arc::clone(self);
        let interval = manager.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let before = manager.count();
                        manager.cleanup_expired();
                        let after = manager.count();
                        if before != after {
                            tracing::info!(removed = before - after, remaining = after, "session cleanup");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("session cleanup task shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }

    pub fn insert(&self, session: Arc<CallSession>) -> Result<()> {
        if self.sessions.len() >= self.max_sessions {
            self.cleanup_expired();
            if self.sessions.len() >= self.max_sessions {
                return Err(Error::Invariant("session store at capacity".into()));
            }
        }
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<CallSession>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: &str) {
        if let Some((_, session)) = self.sessions.remove(id) {
            session.terminate();
            tracing::info!(call_id = %id, "session removed");
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn cleanup_expired(&self) {
        let timeout = self.session_timeout;
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_expired(timeout))
            .map(|entry| entry.key().clone())
            .collect();
        for id in expired {
            self.remove(&id);
        }
    }

    pub fn list(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use voxrelay_core::{AudioFrame, ProviderCapabilities, ToolCallingPolicy};

    struct NullProvider(ProviderCapabilities);

    #[async_trait]
    impl Provider for NullProvider {
        async fn send_audio(&self, _frame: AudioFrame) -> Result<()> {
            Ok(())
        }
        async fn commit_turn(&self) -> Result<()> {
            Ok(())
        }
        async fn submit_tool_result(&self, _id: &str, _output: serde_json::Value) -> Result<()> {
            Ok(())
        }
        async fn cancel_turn(&self) -> Result<()> {
            Ok(())
        }
        fn capabilities(&self) -> &ProviderCapabilities {
            &self.0
        }
        fn tool_calling_policy(&self) -> ToolCallingPolicy {
            ToolCallingPolicy::Strict
        }
    }

    fn provider() -> Arc<dyn Provider> {
        Arc::new(NullProvider(ProviderCapabilities {
            supports_streaming_transcript: true,
            supports_tool_calls: true,
            supported_input_rates_hz: vec![8_000],
            supported_output_rates_hz: vec![8_000],
        }))
    }

    #[test]
    fn turn_index_advances_monotonically() {
        let session = CallSession::new("call-1", provider(), "you are a voice agent");
        assert_eq!(session.current_turn(), TurnIndex(0));
        assert_eq!(session.advance_turn(), TurnIndex(1));
        assert_eq!(session.advance_turn(), TurnIndex(2));
    }

    #[test]
    fn manager_enforces_capacity() {
        let manager = SessionManager::new(1);
        let s1 = Arc::new(CallSession::new("a", provider(), "p"));
        let s2 = Arc::new(CallSession::new("b", provider(), "p"));
        manager.insert(s1).unwrap();
        assert!(manager.insert(s2).is_err());
    }

    #[test]
    fn remove_terminates_the_session() {
        let manager = SessionManager::new(10);
        let session = Arc::new(CallSession::new("a", provider(), "p"));
        manager.insert(session.clone()).unwrap();
        manager.remove("a");
        assert!(!session.is_active());
        assert!(manager.get("a").is_none());
    }
}
