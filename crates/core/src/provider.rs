//! Provider abstraction (§4.3): one event-stream surface over the three
//! provider shapes (modular pipeline, full-agent duplex, local server).

use crate::audio::AudioFrame;
use crate::error::Result;
use crate::tool::ToolInvocation;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Whether and how a provider is allowed to emit tool calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallingPolicy {
    /// Provider's native tool-calling protocol; malformed calls are rejected.
    Strict,
    /// Accept the provider's native tool calls, but fall back to parsing a
    /// tool-call convention out of plain assistant text if the provider has
    /// none (e.g. a model that was not given function-calling support).
    Compatible,
    /// Tool calls are never dispatched; any emitted are logged and dropped.
    Off,
}

/// What a provider can do, discovered at connect time (§4.11 negotiates
/// against this before picking transport/audio parameters).
#[derive(Debug, Clone)]
pub struct ProviderCapabilities {
    pub supports_streaming_transcript: bool,
    pub supports_tool_calls: bool,
    pub supported_input_rates_hz: Vec<u32>,
    pub supported_output_rates_hz: Vec<u32>,
}

/// Events a provider emits while processing one turn's worth of audio/text.
///
/// Turn ordering invariant (§8): `FinalTranscript` precedes any
/// `AssistantText` for the same turn, which precedes any `AssistantAudio`,
/// which precedes `AssistantAudioDone`.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    PartialTranscript { text: String },
    FinalTranscript { text: String },
    AssistantText { text: String },
    AssistantAudio { frame: AudioFrame },
    AssistantAudioDone,
    ToolCall(ToolInvocation),
    Error { message: String, retryable: bool },
}

/// Unifies STT+LLM+TTS pipelines, full-duplex realtime agents, and local
/// multi-capability servers behind one interface (§4.3).
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stream one ingress audio frame in; the provider may emit zero or
    /// more `ProviderEvent`s asynchronously via its event channel in
    /// response, not necessarily synchronously with this call returning.
    async fn send_audio(&self, frame: AudioFrame) -> Result<()>;

    /// Signal that the caller's current utterance has ended (VAD-detected
    /// silence or an explicit commit), prompting the provider to finalize
    /// its transcript and begin generating a response.
    async fn commit_turn(&self) -> Result<()>;

    /// Feed a tool result back so the provider can continue the turn.
    async fn submit_tool_result(&self, invocation_id: &str, output: serde_json::Value) -> Result<()>;

    /// Cancel in-flight generation for the current turn (barge-in).
    async fn cancel_turn(&self) -> Result<()>;

    fn capabilities(&self) -> &ProviderCapabilities;

    fn tool_calling_policy(&self) -> ToolCallingPolicy;
}
