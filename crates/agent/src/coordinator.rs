//! Conversation Coordinator (§4.6): enforces single-speaker, prevents
//! self-echo, and schedules barge-in. The single writer of egress frames
//! and the single authority for gate open/close transitions — callers act
//! on the decisions this returns rather than mutating gate state directly.
//!
//! Grounded in the teacher's barge-in handling
//! (`pipeline/src/orchestrator.rs::VoicePipeline::check_barge_in` and
//! `BargeInConfig`), generalized into a standalone component since no
//! single teacher file isolates this as its own unit.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BargeInDecision {
    /// Agent isn't speaking; nothing to interrupt.
    NotSpeaking,
    /// Within the self-trigger guard window after speech onset; ignored.
    Guarded,
    /// Below threshold; keep playing.
    BelowThreshold,
    /// Caller spoke over the agent; cancel playback and start listening.
    BargeIn,
}

/// What the caller must do once the post-playback tail has elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RearmAction {
    /// Open the gate; nothing else required.
    None,
    /// Open the gate and inject a synthetic segment-close first, so the
    /// STT backend begins a clean new segment (Whisper-family STT only).
    InjectSyntheticSegmentClose,
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub barge_in_vad_threshold: f32,
    /// Barge-in is ignored for this long after agent speech onset, to
    /// avoid self-triggering on TTS onset (§4.6 rule 4), typically 300-500ms.
    pub barge_in_guard: Duration,
    /// Tail appended after `playback_deadline` before the gate reopens,
    /// typically 150-250ms.
    pub playback_tail: Duration,
    /// Whether the active STT backend is Whisper-family and needs the
    /// synthetic segment-close rearm after the tail (§4.6 rule 3).
    pub rearm_whisper_family: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            barge_in_vad_threshold: 0.6,
            barge_in_guard: Duration::from_millis(400),
            playback_tail: Duration::from_millis(200),
            rearm_whisper_family: false,
        }
    }
}

/// Per-session coordinator state (§4.6).
pub struct ConversationCoordinator {
    config: CoordinatorConfig,
    gate: RwLock<Gate>,
    agent_speaking: AtomicBool,
    playback_deadline: RwLock<Option<Instant>>,
    speech_started_at: RwLock<Option<Instant>>,
    vad_score: RwLock<f32>,
}

impl ConversationCoordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            gate: RwLock::new(Gate::Open),
            agent_speaking: AtomicBool::new(false),
            playback_deadline: RwLock::new(None),
            speech_started_at: RwLock::new(None),
            vad_score: RwLock::new(0.0),
        }
    }

    pub fn gate(&self) -> Gate {
        *self.gate.read()
    }

    pub fn is_agent_speaking(&self) -> bool {
        self.agent_speaking.load(Ordering::SeqCst)
    }

    /// Called for each outbound `AssistantAudio` chunk (§4.6 rule 1):
    /// closes the gate and extends the playback deadline by the chunk's
    /// estimated duration.
    pub fn on_assistant_audio(&self, chunk_duration: Duration) {
        *self.gate.write() = Gate::Closed;
        self.agent_speaking.store(true, Ordering::SeqCst);

        let now = Instant::now();
        let mut deadline = self.playback_deadline.write();
        let base = (*deadline).unwrap_or(now).max(now);
        *deadline = Some(base + chunk_duration);

        let mut started = self.speech_started_at.write();
        if started.is_none() {
            *started = Some(now);
        }
    }

    /// Called on `AssistantAudioDone` (§4.6 rule 2-3). Sleeps until the
    /// later of the playback deadline or the configured tail, then opens
    /// the gate and reports whether the caller must rearm STT segments.
    pub async fn on_assistant_audio_done(&self) -> RearmAction {
        let now = Instant::now();
        let tail_target = now + self.config.playback_tail;
        let target = match *self.playback_deadline.read() {
            Some(deadline) => deadline.max(tail_target),
            None => tail_target,
        };

        if target > now {
            tokio::time::sleep(target - now).await;
        }

        *self.gate.write() = Gate::Open;
        self.agent_speaking.store(false, Ordering::SeqCst);
        *self.playback_deadline.write() = None;
        *self.speech_started_at.write() = None;

        if self.config.rearm_whisper_family {
            RearmAction::InjectSyntheticSegmentClose
        } else {
            RearmAction::None
        }
    }

    /// Called on every ingress VAD observation (§4.6 rule 4).
    pub fn observe_vad(&self, score: f32) -> BargeInDecision {
        *self.vad_score.write() = score;

        if !self.is_agent_speaking() {
            return BargeInDecision::NotSpeaking;
        }
        if let Some(started) = *self.speech_started_at.read() {
            if started.elapsed() < self.config.barge_in_guard {
                return BargeInDecision::Guarded;
            }
        }
        if score >= self.config.barge_in_vad_threshold {
            BargeInDecision::BargeIn
        } else {
            BargeInDecision::BelowThreshold
        }
    }

    /// Force the gate open and clear speaking state, e.g. after a
    /// confirmed barge-in has cancelled playback and drained egress.
    pub fn force_open_for_barge_in(&self) {
        *self.gate.write() = Gate::Open;
        self.agent_speaking.store(false, Ordering::SeqCst);
        *self.playback_deadline.write() = None;
        *self.speech_started_at.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_audio_closes_gate_and_sets_speaking() {
        let coordinator = ConversationCoordinator::new(CoordinatorConfig::default());
        assert_eq!(coordinator.gate(), Gate::Open);
        coordinator.on_assistant_audio(Duration::from_millis(200));
        assert_eq!(coordinator.gate(), Gate::Closed);
        assert!(coordinator.is_agent_speaking());
    }

    #[test]
    fn barge_in_is_guarded_immediately_after_speech_onset() {
        let coordinator = ConversationCoordinator::new(CoordinatorConfig::default());
        coordinator.on_assistant_audio(Duration::from_millis(500));
        assert_eq!(coordinator.observe_vad(0.9), BargeInDecision::Guarded);
    }

    #[test]
    fn barge_in_below_threshold_does_not_trigger() {
        let coordinator = ConversationCoordinator::new(CoordinatorConfig {
            barge_in_guard: Duration::from_millis(0),
            ..CoordinatorConfig::default()
        });
        coordinator.on_assistant_audio(Duration::from_millis(500));
        assert_eq!(coordinator.observe_vad(0.1), BargeInDecision::BelowThreshold);
    }

    #[test]
    fn barge_in_triggers_once_guard_elapsed_and_above_threshold() {
        let coordinator = ConversationCoordinator::new(CoordinatorConfig {
            barge_in_guard: Duration::from_millis(0),
            ..CoordinatorConfig::default()
        });
        coordinator.on_assistant_audio(Duration::from_millis(500));
        assert_eq!(coordinator.observe_vad(0.95), BargeInDecision::BargeIn);
    }

    #[tokio::test]
    async fn audio_done_reopens_gate_after_tail() {
        let coordinator = ConversationCoordinator::new(CoordinatorConfig {
            playback_tail: Duration::from_millis(10),
            ..CoordinatorConfig::default()
        });
        coordinator.on_assistant_audio(Duration::from_millis(5));
        let action = coordinator.on_assistant_audio_done().await;
        assert_eq!(action, RearmAction::None);
        assert_eq!(coordinator.gate(), Gate::Open);
        assert!(!coordinator.is_agent_speaking());
    }

    #[tokio::test]
    async fn whisper_family_rearm_is_reported() {
        let coordinator = ConversationCoordinator::new(CoordinatorConfig {
            playback_tail: Duration::from_millis(1),
            rearm_whisper_family: true,
            ..CoordinatorConfig::default()
        });
        coordinator.on_assistant_audio(Duration::from_millis(1));
        let action = coordinator.on_assistant_audio_done().await;
        assert_eq!(action, RearmAction::InjectSyntheticSegmentClose);
    }
}
