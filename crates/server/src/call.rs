//! Call Lifecycle Controller (§4.9): the per-call task group and state
//! machine that owns one telephony channel from `StasisStart` to
//! `StasisEnd` — negotiating the transport and provider, relaying audio
//! in both directions, dispatching tool calls, and writing the closing
//! call record.
//!
//! Grounded in the teacher's per-session task shape
//! (`pipeline/src/orchestrator.rs`: one spawned task per connection, a
//! root cancellation handle, bounded drain on shutdown) and
//! `ConversationCoordinator`'s gate; generalized here into the six-state
//! call lifecycle layered on top of the turn-level state machine the
//! provider already drives.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use voxrelay_agent::{BargeInDecision, CallSession, ConversationCoordinator, CoordinatorConfig, SessionManager};
use voxrelay_config::document::TransportKind;
use voxrelay_config::{ContextSpec, Settings};
use voxrelay_core::audio::{AudioEncoding, AudioFrame, AudioProfile, Direction};
use voxrelay_core::{ProviderEvent, ToolCallingPolicy, ToolDefinition, ToolInvocation, ToolPhase};
use voxrelay_persistence::{CallOutcome, CallRecord, CallRecordWriter, ToolInvocationRecord};
use voxrelay_tools::{
    AttendedTransferTool, BlindTransferTool, CancelTransferTool, ExtensionStatusTool, GuardrailConfig, HangupTool,
    RequestTranscriptTool, SendEmailSummaryTool, ToolExecutor, ToolRegistry, VoicemailDropTool,
};
use voxrelay_transport::audiosocket::AudioSocketTransport;
use voxrelay_transport::resampler::Resampler;
use voxrelay_transport::rtp::RtpTransport;
use voxrelay_transport::Transport;

use crate::ari::AriClient;
use crate::call_control::AriCallControl;
use crate::error::{Result, ServerError};
use crate::metrics;
use crate::negotiator::{self, NamedProfile};
use crate::providers;
use crate::transport_broker::TransportBroker;

/// §4.9: `Inbound → Answered → TransportNegotiated → GreetingSpeaking →
/// Conversing → {Transferring | Hanging | Draining} → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CallState {
    Inbound,
    Answered,
    TransportNegotiated,
    GreetingSpeaking,
    Conversing,
    Transferring,
    Hanging,
    Draining,
    Closed,
}

impl CallState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => CallState::Inbound,
            1 => CallState::Answered,
            2 => CallState::TransportNegotiated,
            3 => CallState::GreetingSpeaking,
            4 => CallState::Conversing,
            5 => CallState::Transferring,
            6 => CallState::Hanging,
            7 => CallState::Draining,
            _ => CallState::Closed,
        }
    }
}

/// Why a call ended, for the outcome recorded in the call record.
enum CallFailure {
    Transport(String),
    Provider(String),
    Invariant(String),
    CallerHangupEarly,
}

impl CallFailure {
    fn outcome(&self) -> CallOutcome {
        match self {
            CallFailure::Transport(_) => CallOutcome::TransportUnavailable,
            CallFailure::Provider(_) => CallOutcome::ProviderFatal,
            CallFailure::Invariant(_) => CallOutcome::InvariantViolation,
            CallFailure::CallerHangupEarly => CallOutcome::CallerHangupEarly,
        }
    }
}

/// Per-call timeouts (§5): transport/provider open deadlines, the
/// farewell drain before a guardrail-approved hangup, and the watchdog
/// window a non-`Conversing` state may occupy before being forced to drain.
#[derive(Debug, Clone)]
pub struct CallTimeouts {
    pub transport_open: Duration,
    pub provider_open: Duration,
    pub farewell_drain: Duration,
    pub watchdog_non_conversing: Duration,
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self {
            transport_open: Duration::from_secs(3),
            provider_open: Duration::from_secs(5),
            farewell_drain: voxrelay_tools::FAREWELL_HANGUP_DELAY,
            watchdog_non_conversing: Duration::from_secs(30),
        }
    }
}

/// Shared dependencies every call needs, assembled once in `AppState`.
pub struct CallDeps {
    pub settings: Arc<RwLock<Settings>>,
    pub ari: AriClient,
    pub sessions: Arc<SessionManager>,
    pub transport_broker: Arc<TransportBroker>,
    pub record_writer: CallRecordWriter,
    pub timeouts: CallTimeouts,
}

/// What the shared ARI event dispatch loop needs to route events back
/// into a running call: a cancellation handle for `StasisEnd`/hangup, and
/// the `AriCallControl` so DTMF can resolve an in-progress attended
/// transfer.
pub struct CallHandle {
    pub cancel: CancellationToken,
    pub control: Arc<AriCallControl>,
}

pub type CallRegistry = DashMap<String, CallHandle>;

fn resolve_context<'a>(settings: &'a Settings, callee_number: &str) -> Option<(&'a str, &'a ContextSpec)> {
    settings
        .contexts
        .get(callee_number)
        .map(|ctx| (callee_number, ctx))
        .or_else(|| settings.contexts.get("default").map(|ctx| ("default", ctx)))
        .or_else(|| settings.contexts.iter().next().map(|(k, v)| (k.as_str(), v)))
}

fn provider_candidate_profiles(settings: &Settings) -> Vec<NamedProfile<'_>> {
    // The concrete provider shapes are rate-configurable endpoints, not
    // fixed-capability devices probed at connect time; until a call is
    // live there is no narrower capability set to intersect against than
    // "every profile this deployment has declared."
    settings
        .audio_profiles
        .iter()
        .map(|(name, profile)| NamedProfile { name, profile })
        .collect()
}

fn transport_candidate_profiles(settings: &Settings) -> Vec<NamedProfile<'_>> {
    settings
        .audio_profiles
        .iter()
        .filter(|(_, profile)| match settings.telephony.transport {
            TransportKind::Rtp => {
                matches!(profile.transport_output_encoding, AudioEncoding::Mulaw8k | AudioEncoding::Alaw8k)
            }
            TransportKind::AudioSocket => profile.transport_output_encoding == AudioEncoding::Pcm16,
        })
        .map(|(name, profile)| NamedProfile { name, profile })
        .collect()
}

/// Crude energy-based proxy for the ingress VAD score the conversation
/// coordinator expects. Not a real voice activity detector; good enough
/// to drive the barge-in gate without depending on a model.
fn rms_vad_score(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    let rms = (sum_sq / samples.len() as f64).sqrt();
    (rms / i16::MAX as f64).clamp(0.0, 1.0) as f32
}

/// Tracks speech/silence so ingress audio can be segmented into turns
/// without a dedicated VAD model: a sustained run of low-energy frames
/// after speech was seen ends the utterance.
struct UtteranceDetector {
    speaking: bool,
    silence_since: Option<Instant>,
    speech_threshold: f32,
    silence_commit_after: Duration,
}

impl UtteranceDetector {
    fn new() -> Self {
        Self {
            speaking: false,
            silence_since: None,
            speech_threshold: 0.08,
            silence_commit_after: Duration::from_millis(700),
        }
    }

    /// Returns `true` exactly once per utterance, when silence has
    /// persisted long enough after speech to finalize the turn.
    fn observe(&mut self, score: f32) -> bool {
        if score >= self.speech_threshold {
            self.speaking = true;
            self.silence_since = None;
            return false;
        }
        if !self.speaking {
            return false;
        }
        let since = *self.silence_since.get_or_insert_with(Instant::now);
        if since.elapsed() >= self.silence_commit_after {
            self.speaking = false;
            self.silence_since = None;
            return true;
        }
        false
    }
}

fn build_tool_registry(control: Arc<AriCallControl>, guardrail: GuardrailConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(BlindTransferTool::new(control.clone())));
    registry.register(Arc::new(AttendedTransferTool::new(control.clone())));
    registry.register(Arc::new(CancelTransferTool::new(control.clone())));
    registry.register(Arc::new(VoicemailDropTool::new(control.clone())));
    registry.register(Arc::new(HangupTool::new(control.clone(), guardrail)));
    registry.register(Arc::new(ExtensionStatusTool::new(control.clone())));
    registry.register(Arc::new(SendEmailSummaryTool::new(control.clone())));
    registry.register(Arc::new(RequestTranscriptTool::new(control)));
    registry
}

async fn open_transport(
    deps: &CallDeps,
    settings: &Settings,
    channel_id: &str,
    negotiated: &AudioProfile,
) -> Result<Arc<dyn Transport>> {
    let timeout = deps.timeouts.transport_open;
    match settings.telephony.transport {
        TransportKind::AudioSocket => {
            let transport = tokio::time::timeout(
                timeout,
                deps.transport_broker
                    .wait_for_audiosocket(channel_id, negotiated.internal_rate_hz, timeout),
            )
            .await
            .map_err(|_| ServerError::Core(voxrelay_core::Error::TransportUnavailable("audiosocket open timed out".into())))?
            .map_err(ServerError::from)?;
            Ok(transport as Arc<dyn Transport>)
        }
        TransportKind::Rtp => {
            let ssrc = rand::random::<u32>();
            let wire_rate_hz = negotiated
                .transport_output_encoding
                .implied_rate_hz()
                .unwrap_or(negotiated.internal_rate_hz);
            let (transport, _advertise_addr) = tokio::time::timeout(
                timeout,
                deps.transport_broker
                    .bind_rtp(negotiated.transport_output_encoding, wire_rate_hz, ssrc),
            )
            .await
            .map_err(|_| ServerError::Core(voxrelay_core::Error::TransportUnavailable("rtp bind timed out".into())))?
            .map_err(ServerError::from)?;
            Ok(transport as Arc<dyn Transport>)
        }
    }
}

/// Entry point: spawned once per `StasisStart`.
pub async fn handle_inbound_call(
    deps: Arc<CallDeps>,
    registry: Arc<CallRegistry>,
    channel_id: String,
    caller_number: String,
    callee_number: String,
) {
    let started_at = Utc::now();
    let cancel = CancellationToken::new();
    metrics::record_call_started();

    let result = run_call(&deps, &registry, &channel_id, &caller_number, &callee_number, cancel).await;

    let (outcome, turn_count, tool_invocations) = match result {
        Ok((turns, tools)) => (CallOutcome::Completed, turns, tools),
        Err((failure, turns, tools)) => (failure.outcome(), turns, tools),
    };

    metrics::record_call_ended(match outcome {
        CallOutcome::Completed => "completed",
        CallOutcome::ProviderFatal => "provider_fatal",
        CallOutcome::TransportUnavailable => "transport_unavailable",
        CallOutcome::InvariantViolation => "invariant_violation",
        CallOutcome::CallerHangupEarly => "caller_hangup_early",
    });

    let mut record = CallRecord::new(channel_id.clone(), started_at, Utc::now(), outcome, turn_count);
    record.tool_invocations = tool_invocations;
    if let Err(e) = deps.record_writer.append(&record).await {
        tracing::error!(%e, call_id = %channel_id, "failed to persist call record");
    }

    registry.remove(&channel_id);
    deps.sessions.remove(&channel_id);
}

type RunOutcome = std::result::Result<(u32, Vec<ToolInvocationRecord>), (CallFailure, u32, Vec<ToolInvocationRecord>)>;

async fn run_call(
    deps: &Arc<CallDeps>,
    registry: &Arc<CallRegistry>,
    channel_id: &str,
    caller_number: &str,
    callee_number: &str,
    cancel: CancellationToken,
) -> RunOutcome {
    let tool_log: Arc<Mutex<Vec<ToolInvocationRecord>>> = Arc::new(Mutex::new(Vec::new()));

    let settings_snapshot = deps.settings.read().clone();

    let Some((_context_name, context)) = resolve_context(&settings_snapshot, callee_number) else {
        return Err((CallFailure::Invariant("no context configured to answer this call".into()), 0, Vec::new()));
    };
    let context = context.clone();

    if let Err(e) = deps.ari.answer(channel_id).await {
        return Err((CallFailure::Transport(e.to_string()), 0, Vec::new()));
    }

    let Some(audio_profile) = settings_snapshot.audio_profiles.get(&context.audio_profile) else {
        return Err((CallFailure::Invariant(format!("context names unresolved audio profile '{}'", context.audio_profile)), 0, Vec::new()));
    };

    let provider_profiles = provider_candidate_profiles(&settings_snapshot);
    let transport_profiles = transport_candidate_profiles(&settings_snapshot);
    let negotiated = match negotiator::negotiate(&provider_profiles, &transport_profiles, &context.audio_profile) {
        Ok(named) => named.profile.clone(),
        Err(e) => return Err((CallFailure::Invariant(e.to_string()), 0, Vec::new())),
    };
    let _ = audio_profile;

    let transport = match open_transport(deps, &settings_snapshot, channel_id, &negotiated).await {
        Ok(t) => t,
        Err(e) => return Err((CallFailure::Transport(e.to_string()), 0, Vec::new())),
    };

    let history = Arc::new(RwLock::new(voxrelay_core::ConversationHistory::new(context.system_prompt.clone(), 64)));
    let control = Arc::new(AriCallControl::new(
        deps.ari.clone(),
        channel_id.to_string(),
        settings_snapshot.telephony.moh_class.clone(),
        history.clone(),
        vec!["goodbye".into(), "bye".into(), "have a great day".into()],
    ));

    registry.insert(
        channel_id.to_string(),
        CallHandle { cancel: cancel.clone(), control: control.clone() },
    );

    let guardrail = GuardrailConfig::default();
    let tool_registry = Arc::new(build_tool_registry(control.clone(), guardrail));
    let tool_catalog: Vec<ToolDefinition> = tool_registry.definitions();

    let (event_tx, mut event_rx) = mpsc::channel(256);

    let system_prompt = match &context.greeting {
        Some(greeting) if !greeting.is_empty() => {
            format!("{}\n\nBegin the call by saying, verbatim: \"{greeting}\"", context.system_prompt)
        }
        _ => context.system_prompt.clone(),
    };
    let context_with_greeting = ContextSpec { system_prompt, ..context.clone() };

    let provider = match tokio::time::timeout(
        deps.timeouts.provider_open,
        providers::build_provider(
            &settings_snapshot,
            &context_with_greeting,
            &negotiated,
            tool_catalog,
            ToolCallingPolicy::Strict,
            event_tx,
        ),
    )
    .await
    {
        Ok(Ok(provider)) => provider,
        Ok(Err(e)) => return Err((CallFailure::Provider(e.to_string()), 0, Vec::new())),
        Err(_) => return Err((CallFailure::Provider("provider connect timed out".into()), 0, Vec::new())),
    };

    let session = Arc::new(CallSession::new(channel_id.to_string(), provider.clone(), context.system_prompt.clone()));
    if let Err(e) = deps.sessions.insert(session.clone()) {
        return Err((CallFailure::Invariant(e.to_string()), 0, Vec::new()));
    }

    control.set_state(CallState::Conversing);
    let coordinator = Arc::new(ConversationCoordinator::new(CoordinatorConfig::default()));

    let ingress_resampler = Mutex::new(Resampler::new(negotiated.ingress_rate_hz, negotiated.internal_rate_hz));
    let egress_resampler = Mutex::new(Resampler::new(negotiated.internal_rate_hz, negotiated.egress_rate_hz));

    let ingress_task = tokio::spawn(ingress_loop(
        transport.clone(),
        session.clone(),
        coordinator.clone(),
        control.clone(),
        ingress_resampler,
        cancel.clone(),
    ));

    let turn_count = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let watchdog_deadline = Arc::new(RwLock::new(Instant::now() + deps.timeouts.watchdog_non_conversing));
    let watchdog_cancel = cancel.clone();
    let watchdog_deadline_clone = watchdog_deadline.clone();
    let watchdog_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = watchdog_cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if Instant::now() > *watchdog_deadline_clone.read() {
                        tracing::warn!("call watchdog forcing drain: non-conversing state exceeded its deadline");
                        watchdog_cancel.cancel();
                        break;
                    }
                }
            }
        }
    });

    let event_loop_result = event_loop(
        &mut event_rx,
        transport.clone(),
        session.clone(),
        coordinator.clone(),
        control.clone(),
        tool_registry.clone(),
        tool_log.clone(),
        turn_count.clone(),
        watchdog_deadline.clone(),
        &deps.timeouts,
        egress_resampler,
        cancel.clone(),
    )
    .await;

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(3), ingress_task).await;
    watchdog_task.abort();
    let _ = transport.close().await;
    session.terminate();

    let tool_records = tool_log.lock().clone();
    let final_turns = turn_count.load(std::sync::atomic::Ordering::SeqCst);

    match event_loop_result {
        Ok(()) => Ok((final_turns, tool_records)),
        Err(failure) => Err((failure, final_turns, tool_records)),
    }
}

async fn ingress_loop(
    transport: Arc<dyn Transport>,
    session: Arc<CallSession>,
    coordinator: Arc<ConversationCoordinator>,
    control: Arc<AriCallControl>,
    resampler: Mutex<Resampler>,
    cancel: CancellationToken,
) {
    let mut detector = UtteranceDetector::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = transport.recv_ingress() => {
                let frame = match frame {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(%e, call_id = %session.id, "ingress transport error");
                        break;
                    }
                };
                session.touch();

                if control.is_transferring() {
                    continue;
                }

                let score = rms_vad_score(&frame.samples);
                if coordinator.observe_vad(score) == BargeInDecision::BargeIn {
                    session.playback.cancel_all();
                    let _ = session.provider.cancel_turn().await;
                    coordinator.force_open_for_barge_in();
                }

                let resampled = resampler.lock().process(&frame.samples);
                if resampled.is_empty() {
                    continue;
                }
                let up = AudioFrame::new(resampled, session.provider.capabilities().supported_input_rates_hz.first().copied().unwrap_or(frame.sample_rate_hz), frame.sequence, Direction::Ingress);
                if let Err(e) = session.provider.send_audio(up).await {
                    tracing::warn!(%e, call_id = %session.id, "provider rejected ingress audio");
                }

                if detector.observe(score) {
                    if let Err(e) = session.provider.commit_turn().await {
                        tracing::warn!(%e, call_id = %session.id, "commit_turn failed");
                    }
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn event_loop(
    event_rx: &mut mpsc::Receiver<ProviderEvent>,
    transport: Arc<dyn Transport>,
    session: Arc<CallSession>,
    coordinator: Arc<ConversationCoordinator>,
    control: Arc<AriCallControl>,
    tool_registry: Arc<ToolRegistry>,
    tool_log: Arc<Mutex<Vec<ToolInvocationRecord>>>,
    turn_count: Arc<std::sync::atomic::AtomicU32>,
    watchdog_deadline: Arc<RwLock<Instant>>,
    timeouts: &CallTimeouts,
    egress_resampler: Mutex<Resampler>,
    cancel: CancellationToken,
) -> std::result::Result<(), CallFailure> {
    // A turn's `AssistantAudio` frames must finish draining before any
    // `InCall`-phase tool call emitted in that same turn executes
    // (§9 decision 1). `PreCall` tools skip the wait since they are
    // meant to run ahead of audio; anything not yet playing when a tool
    // call arrives has nothing to drain, so it also runs immediately.
    let mut audio_in_flight = false;
    let mut pending_tool_calls: VecDeque<ToolInvocation> = VecDeque::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            event = event_rx.recv() => {
                let Some(event) = event else {
                    return Ok(());
                };
                *watchdog_deadline.write() = Instant::now() + timeouts.watchdog_non_conversing;

                match event {
                    ProviderEvent::PartialTranscript { .. } => {}
                    ProviderEvent::FinalTranscript { text } => {
                        control.observe_caller_utterance(&text);
                        turn_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                    ProviderEvent::AssistantText { text } => {
                        control.observe_assistant_text(&text);
                        session.with_history_mut(|h| h.push(voxrelay_core::Message::assistant(text)));
                    }
                    ProviderEvent::AssistantAudio { frame } => {
                        if control.is_transferring() {
                            continue;
                        }
                        audio_in_flight = true;
                        coordinator.on_assistant_audio(Duration::from_millis(frame.duration_ms as u64));
                        let playback_id = match session.playback.allocate(Duration::from_millis(frame.duration_ms as u64)) {
                            Ok(id) => id,
                            Err(e) => {
                                tracing::warn!(%e, call_id = %session.id, "playback allocation rejected");
                                continue;
                            }
                        };
                        let _ = session.playback.mark_started(&playback_id);
                        let down = egress_resampler.lock().process(&frame.samples);
                        let byte_len = down.len() * 2;
                        let egress_frame = AudioFrame::new(down, frame.sample_rate_hz, frame.sequence, Direction::Egress);
                        if let Err(e) = transport.send_egress(egress_frame).await {
                            tracing::warn!(%e, call_id = %session.id, "egress transport error");
                        } else {
                            let _ = session.playback.mark_bytes_sent(&playback_id, byte_len);
                        }
                        let _ = session.playback.complete(&playback_id);
                    }
                    ProviderEvent::AssistantAudioDone => {
                        let _rearm = coordinator.on_assistant_audio_done().await;
                        audio_in_flight = false;
                        for invocation in pending_tool_calls.drain(..) {
                            dispatch_tool_call(invocation, &tool_registry, &session, &tool_log);
                        }
                    }
                    ProviderEvent::ToolCall(invocation) => {
                        let phase = tool_registry.get(&invocation.name).map(|t| t.definition().phase);
                        let waits_for_audio = audio_in_flight && !matches!(phase, Some(ToolPhase::PreCall));
                        if waits_for_audio {
                            pending_tool_calls.push_back(invocation);
                        } else {
                            dispatch_tool_call(invocation, &tool_registry, &session, &tool_log);
                        }
                    }
                    ProviderEvent::Error { message, retryable } => {
                        if !retryable {
                            return Err(CallFailure::Provider(message));
                        }
                        tracing::warn!(%message, call_id = %session.id, "transient provider error");
                    }
                }
            }
        }
    }
}

/// Runs one tool call to completion and reports the result back to the
/// provider, independent of the event loop so a slow tool never blocks
/// the next provider event from being read.
fn dispatch_tool_call(
    invocation: ToolInvocation,
    tool_registry: &Arc<ToolRegistry>,
    session: &Arc<CallSession>,
    tool_log: &Arc<Mutex<Vec<ToolInvocationRecord>>>,
) {
    let registry = tool_registry.clone();
    let provider = session.provider.clone();
    let tool_log = tool_log.clone();
    tokio::spawn(async move {
        let started = Instant::now();
        let name = invocation.name.clone();
        let id = invocation.id.clone();
        let output = registry
            .execute(invocation)
            .await
            .unwrap_or_else(|e| voxrelay_core::ToolOutput::error(e.to_string()));
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let status = if output.is_ok() { "ok" } else { "error" };
        metrics::record_tool_invocation(&name, status);
        tool_log.lock().push(ToolInvocationRecord { name, status: status.to_string(), duration_ms: elapsed_ms });
        let value = serde_json::to_value(&output).unwrap_or(serde_json::Value::Null);
        let _ = provider.submit_tool_result(&id, value).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utterance_detector_fires_once_after_sustained_silence() {
        let mut detector = UtteranceDetector {
            speaking: false,
            silence_since: None,
            speech_threshold: 0.1,
            silence_commit_after: Duration::from_millis(1),
        };
        assert!(!detector.observe(0.5));
        std::thread::sleep(Duration::from_millis(5));
        assert!(detector.observe(0.0));
        assert!(!detector.observe(0.0));
    }

    #[test]
    fn rms_score_is_zero_for_silence() {
        assert_eq!(rms_vad_score(&[0, 0, 0, 0]), 0.0);
    }

    #[test]
    fn rms_score_is_nonzero_for_tone() {
        let samples: Vec<i16> = (0..160).map(|i| ((i as f32 * 0.2).sin() * 20000.0) as i16).collect();
        assert!(rms_vad_score(&samples) > 0.1);
    }
}
