//! Playback handle data (§4.7 "Playback Manager"). The manager that owns
//! the at-most-one-active-playback invariant lives in `voxrelay-agent`;
//! this module only defines the handle shape that crosses crate boundaries.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Pending,
    Playing,
    Completed,
    Cancelled,
}

/// One egress audio playback (one TTS turn's worth of audio), tracked from
/// allocation through completion or cancellation.
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    pub id: String,
    pub state: PlaybackState,
    pub estimated_duration: Duration,
    pub bytes_sent: usize,
}

impl PlaybackHandle {
    pub fn new(id: impl Into<String>, estimated_duration: Duration) -> Self {
        Self {
            id: id.into(),
            state: PlaybackState::Pending,
            estimated_duration,
            bytes_sent: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, PlaybackState::Pending | PlaybackState::Playing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_handle_is_active() {
        let handle = PlaybackHandle::new("p1", Duration::from_millis(500));
        assert!(handle.is_active());
    }

    #[test]
    fn completed_handle_is_not_active() {
        let mut handle = PlaybackHandle::new("p1", Duration::from_millis(500));
        handle.state = PlaybackState::Completed;
        assert!(!handle.is_active());
    }
}
