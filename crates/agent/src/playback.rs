//! Playback Manager (§4.7): tracks every outstanding playback handle for
//! one session and enforces the at-most-one-active-playback invariant.
//!
//! Grounded in the teacher's `SessionManager` shutdown idiom
//! (`server/src/session.rs::start_cleanup_task`, a `watch`-gated
//! background loop) generalized from "stop accepting new sessions" to
//! "stop accepting new playbacks once `terminate()` has run."

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use voxrelay_core::{Error, PlaybackHandle, PlaybackState, Result};

/// Per-session playback tracker. `allocate`/`mark_started`/etc. are the
/// only mutation entry points; everything else is a read.
pub struct PlaybackManager {
    handles: RwLock<HashMap<String, PlaybackHandle>>,
    terminated: AtomicBool,
}

impl Default for PlaybackManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackManager {
    pub fn new() -> Self {
        Self {
            handles: RwLock::new(HashMap::new()),
            terminated: AtomicBool::new(false),
        }
    }

    /// Allocate a new playback handle. Rejected once `terminate()` has run.
    pub fn allocate(&self, estimated_duration: Duration) -> Result<String> {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(Error::Invariant(
                "playback allocated after session terminate()".into(),
            ));
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.handles
            .write()
            .insert(id.clone(), PlaybackHandle::new(id.clone(), estimated_duration));
        Ok(id)
    }

    /// Mark a handle as started. Enforces at most one "started, not
    /// completed, not cancelled" handle per session (§4.7 invariant).
    pub fn mark_started(&self, id: &str) -> Result<()> {
        let mut handles = self.handles.write();
        let already_active = handles
            .values()
            .any(|h| h.id != id && matches!(h.state, PlaybackState::Playing));
        if already_active {
            return Err(Error::Invariant(format!(
                "cannot start playback '{id}': another playback is already active"
            )));
        }
        let handle = handles
            .get_mut(id)
            .ok_or_else(|| Error::Invariant(format!("unknown playback handle '{id}'")))?;
        handle.state = PlaybackState::Playing;
        Ok(())
    }

    pub fn mark_bytes_sent(&self, id: &str, bytes: usize) -> Result<()> {
        let mut handles = self.handles.write();
        let handle = handles
            .get_mut(id)
            .ok_or_else(|| Error::Invariant(format!("unknown playback handle '{id}'")))?;
        handle.bytes_sent += bytes;
        Ok(())
    }

    pub fn complete(&self, id: &str) -> Result<()> {
        self.transition(id, PlaybackState::Completed)
    }

    pub fn cancel(&self, id: &str) -> Result<()> {
        self.transition(id, PlaybackState::Cancelled)
    }

    fn transition(&self, id: &str, state: PlaybackState) -> Result<()> {
        let mut handles = self.handles.write();
        let handle = handles
            .get_mut(id)
            .ok_or_else(|| Error::Invariant(format!("unknown playback handle '{id}'")))?;
        handle.state = state;
        Ok(())
    }

    /// Cancel every outstanding handle. The only operation permitted after
    /// `terminate()`; guarantees every handle reaches a terminal state
    /// before returning.
    pub fn cancel_all(&self) {
        let mut handles = self.handles.write();
        for handle in handles.values_mut() {
            if handle.is_active() {
                handle.state = PlaybackState::Cancelled;
            }
        }
    }

    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
        self.cancel_all();
    }

    pub fn active_handle(&self) -> Option<PlaybackHandle> {
        self.handles.read().values().find(|h| h.is_active()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_a_second_concurrent_active_playback() {
        let manager = PlaybackManager::new();
        let first = manager.allocate(Duration::from_millis(500)).unwrap();
        let second = manager.allocate(Duration::from_millis(500)).unwrap();

        manager.mark_started(&first).unwrap();
        assert!(manager.mark_started(&second).is_err());
    }

    #[test]
    fn terminate_cancels_every_outstanding_handle() {
        let manager = PlaybackManager::new();
        let a = manager.allocate(Duration::from_millis(100)).unwrap();
        let b = manager.allocate(Duration::from_millis(100)).unwrap();
        manager.mark_started(&a).unwrap();

        manager.terminate();

        assert!(manager.allocate(Duration::from_millis(100)).is_err());
        assert!(manager.active_handle().is_none());
        let _ = b;
    }
}
