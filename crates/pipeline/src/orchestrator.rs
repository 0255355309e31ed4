//! Pipeline Orchestrator (§4.5): composes one STT adapter, one LLM
//! backend, and one TTS adapter into the per-turn state machine and
//! exposes the result as a `voxrelay_core::Provider` (the "modular
//! pipeline" shape of §4.3).
//!
//! Grounded in the teacher's `orchestrator.rs::VoicePipeline`, which
//! already has the Idle→Listening→Processing→Speaking shape and an
//! LLM auto-invoke path; generalized to the full six-state machine with
//! tool dispatch and bounded re-invocation depth. Tool execution itself
//! is not owned here: like the full-agent and local providers, this
//! provider only emits `ToolCall` events and waits for
//! `submit_tool_result`, so one Tool Registry can serve every provider
//! shape uniformly.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use voxrelay_core::{
    AudioFrame, ConversationHistory, Direction, Error, Message, Provider, ProviderCapabilities,
    ProviderEvent, Result, Role, ToolCallRef, ToolCallingPolicy, ToolDefinition,
};
use voxrelay_llm::LlmBackend;

use crate::stt::{SttAdapter, Transcript};
use crate::tts::{SynthesizedAudio, TtsAdapter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Listening,
    TranscriptFinalized,
    Thinking,
    ToolDispatch,
    Speaking,
}

pub struct ModularPipelineProvider {
    state: parking_lot::Mutex<PipelineState>,
    history: parking_lot::Mutex<ConversationHistory>,
    llm: Arc<dyn LlmBackend>,
    stt: Arc<dyn SttAdapter>,
    tts: Arc<dyn TtsAdapter>,
    event_tx: mpsc::Sender<ProviderEvent>,
    capabilities: ProviderCapabilities,
    tool_policy: ToolCallingPolicy,
    tool_catalog: Vec<ToolDefinition>,
    pending_tool_calls: parking_lot::Mutex<HashMap<String, Option<serde_json::Value>>>,
    reinvocation_depth: AtomicU8,
    max_reinvocation_depth: u8,
    egress_sequence: AtomicU64,
    /// Serializes `run_llm_turn` invocations so a slow re-invocation
    /// triggered by `submit_tool_result` can't race a fresh transcript.
    turn_lock: AsyncMutex<()>,
}

impl ModularPipelineProvider {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        stt: Arc<dyn SttAdapter>,
        stt_rx: mpsc::Receiver<Transcript>,
        llm: Arc<dyn LlmBackend>,
        tts: Arc<dyn TtsAdapter>,
        tts_rx: mpsc::Receiver<SynthesizedAudio>,
        tool_catalog: Vec<ToolDefinition>,
        tool_policy: ToolCallingPolicy,
        capabilities: ProviderCapabilities,
        event_tx: mpsc::Sender<ProviderEvent>,
        system_prompt: impl Into<String>,
        max_history_messages: usize,
        max_reinvocation_depth: u8,
    ) -> Arc<Self> {
        let provider = Arc::new(Self {
            state: parking_lot::Mutex::new(PipelineState::Idle),
            history: parking_lot::Mutex::new(ConversationHistory::new(system_prompt, max_history_messages)),
            llm,
            stt,
            tts,
            event_tx,
            capabilities,
            tool_policy,
            tool_catalog,
            pending_tool_calls: parking_lot::Mutex::new(HashMap::new()),
            reinvocation_depth: AtomicU8::new(0),
            max_reinvocation_depth,
            egress_sequence: AtomicU64::new(0),
            turn_lock: AsyncMutex::new(()),
        });

        provider.clone().spawn_transcript_loop(stt_rx);
        provider.clone().spawn_audio_loop(tts_rx);
        provider
    }

    fn spawn_transcript_loop(self: Arc<Self>, mut rx: mpsc::Receiver<Transcript>) {
        tokio::spawn(async move {
            while let Some(transcript) = rx.recv().await {
                self.on_transcript(transcript).await;
            }
        });
    }

    fn spawn_audio_loop(self: Arc<Self>, mut rx: mpsc::Receiver<SynthesizedAudio>) {
        tokio::spawn(async move {
            while let Some(audio) = rx.recv().await {
                self.on_synthesized_audio(audio).await;
            }
        });
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock()
    }

    async fn emit(&self, event: ProviderEvent) {
        let _ = self.event_tx.send(event).await;
    }

    async fn on_transcript(&self, transcript: Transcript) {
        if !transcript.is_final {
            self.emit(ProviderEvent::PartialTranscript { text: transcript.text }).await;
            return;
        }
        if transcript.text.trim().is_empty() {
            return;
        }

        *self.state.lock() = PipelineState::TranscriptFinalized;
        self.emit(ProviderEvent::FinalTranscript { text: transcript.text.clone() }).await;
        self.history.lock().push(Message::user(transcript.text));
        self.reinvocation_depth.store(0, Ordering::SeqCst);
        self.run_llm_turn().await;
    }

    async fn on_synthesized_audio(&self, audio: SynthesizedAudio) {
        let sequence = self.egress_sequence.fetch_add(1, Ordering::SeqCst);
        let frame = AudioFrame::new(audio.pcm16, audio.sample_rate_hz, sequence, Direction::Egress);
        self.emit(ProviderEvent::AssistantAudio { frame }).await;
    }

    async fn run_llm_turn(&self) {
        let _guard = self.turn_lock.lock().await;

        *self.state.lock() = PipelineState::Thinking;
        let messages = self.history.lock().messages().to_vec();

        let tools: &[ToolDefinition] = if self.tool_policy == ToolCallingPolicy::Off { &[] } else { &self.tool_catalog };

        let result = match self.llm.generate_with_tools(&messages, tools).await {
            Ok(r) => r,
            Err(e) => {
                self.emit(ProviderEvent::Error { message: e.to_string(), retryable: e.is_retryable() }).await;
                *self.state.lock() = PipelineState::Idle;
                return;
            }
        };

        if result.tool_calls.is_empty() || self.tool_policy == ToolCallingPolicy::Off {
            self.speak(&result.text).await;
            return;
        }

        let depth = self.reinvocation_depth.fetch_add(1, Ordering::SeqCst) + 1;
        if depth > self.max_reinvocation_depth {
            tracing::warn!(depth, max = self.max_reinvocation_depth, "tool re-invocation depth exceeded, answering with whatever text was produced");
            self.speak(&result.text).await;
            return;
        }

        *self.state.lock() = PipelineState::ToolDispatch;
        {
            let mut pending = self.pending_tool_calls.lock();
            pending.clear();
            for call in &result.tool_calls {
                pending.insert(call.id.clone(), None);
            }
        }
        self.history.lock().push(Message {
            role: Role::Assistant,
            content: result.text,
            tool_calls: result
                .tool_calls
                .iter()
                .map(|c| ToolCallRef { id: c.id.clone(), name: c.name.clone(), arguments: c.arguments.clone() })
                .collect(),
            tool_call_id: None,
        });

        for call in result.tool_calls {
            self.emit(ProviderEvent::ToolCall(call)).await;
        }
        // Suspends here; `submit_tool_result` resumes the turn once every
        // pending call in this batch has an answer.
    }

    async fn speak(&self, text: &str) {
        *self.state.lock() = PipelineState::Speaking;
        if !text.is_empty() {
            self.history.lock().push(Message::assistant(text));
            self.emit(ProviderEvent::AssistantText { text: text.to_string() }).await;
            if let Err(e) = self.tts.push_text(text).await {
                self.emit(ProviderEvent::Error { message: e.to_string(), retryable: e.is_retryable() }).await;
            }
        }
        if let Err(e) = self.tts.finish_turn().await {
            self.emit(ProviderEvent::Error { message: e.to_string(), retryable: e.is_retryable() }).await;
        }
        self.emit(ProviderEvent::AssistantAudioDone).await;
        *self.state.lock() = PipelineState::Idle;
    }
}

#[async_trait]
impl Provider for ModularPipelineProvider {
    async fn send_audio(&self, frame: AudioFrame) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state == PipelineState::Idle {
                *state = PipelineState::Listening;
            }
        }
        self.stt.push_audio(&frame.samples).await
    }

    async fn commit_turn(&self) -> Result<()> {
        self.stt.finalize().await
    }

    async fn submit_tool_result(&self, invocation_id: &str, output: serde_json::Value) -> Result<()> {
        self.history.lock().push(Message::tool_result(invocation_id, output.to_string()));

        let all_resolved = {
            let mut pending = self.pending_tool_calls.lock();
            match pending.get_mut(invocation_id) {
                Some(slot) => *slot = Some(output),
                None => {
                    return Err(Error::Invariant(format!(
                        "tool result submitted for unknown invocation id '{invocation_id}'"
                    )))
                }
            }
            pending.values().all(|v| v.is_some())
        };

        if all_resolved {
            self.run_llm_turn().await;
        }
        Ok(())
    }

    async fn cancel_turn(&self) -> Result<()> {
        *self.state.lock() = PipelineState::Idle;
        self.pending_tool_calls.lock().clear();
        self.tts.cancel().await
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    fn tool_calling_policy(&self) -> ToolCallingPolicy {
        self.tool_policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use voxrelay_llm::{FinishReason, GenerationResult, ToolAwareGeneration};

    struct EchoStt;
    #[async_trait]
    impl SttAdapter for EchoStt {
        async fn push_audio(&self, _pcm16: &[i16]) -> Result<()> {
            Ok(())
        }
        async fn finalize(&self) -> Result<()> {
            Ok(())
        }
        fn adapter_key(&self) -> &str {
            "echo_stt"
        }
    }

    struct SilentTts;
    #[async_trait]
    impl TtsAdapter for SilentTts {
        async fn push_text(&self, _delta: &str) -> Result<()> {
            Ok(())
        }
        async fn finish_turn(&self) -> Result<()> {
            Ok(())
        }
        async fn cancel(&self) -> Result<()> {
            Ok(())
        }
        fn adapter_key(&self) -> &str {
            "silent_tts"
        }
    }

    struct ScriptedLlm {
        calls: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl LlmBackend for ScriptedLlm {
        async fn generate(&self, _messages: &[Message]) -> Result<GenerationResult> {
            unreachable!("tests only exercise generate_with_tools")
        }
        async fn generate_stream(&self, _messages: &[Message], _tx: mpsc::Sender<String>) -> Result<GenerationResult> {
            unreachable!()
        }
        async fn is_available(&self) -> bool {
            true
        }
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn generate_with_tools(&self, _messages: &[Message], _tools: &[ToolDefinition]) -> Result<ToolAwareGeneration> {
            let n = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n == 0 {
                Ok(ToolAwareGeneration {
                    text: String::new(),
                    tool_calls: vec![voxrelay_core::ToolInvocation {
                        id: "call-1".into(),
                        name: "check_eligibility".into(),
                        arguments: serde_json::json!({}),
                    }],
                    finish_reason: FinishReason::ToolCall,
                })
            } else {
                Ok(ToolAwareGeneration { text: "you are eligible".into(), tool_calls: vec![], finish_reason: FinishReason::Stop })
            }
        }
    }

    fn test_capabilities() -> ProviderCapabilities {
        ProviderCapabilities {
            supports_streaming_transcript: true,
            supports_tool_calls: true,
            supported_input_rates_hz: vec![16_000],
            supported_output_rates_hz: vec![22_050],
        }
    }

    #[tokio::test]
    async fn final_transcript_drives_assistant_text_to_idle() {
        let (stt_tx, stt_rx) = mpsc::channel(8);
        let (tts_audio_tx, _tts_audio_rx) = mpsc::channel(8);
        let (event_tx, mut event_rx) = mpsc::channel(32);

        let llm = Arc::new(ScriptedLlm { calls: std::sync::atomic::AtomicU32::new(1) });
        let provider = ModularPipelineProvider::spawn(
            Arc::new(EchoStt),
            stt_rx,
            llm,
            Arc::new(SilentTts),
            tts_audio_tx.clone(),
            vec![],
            ToolCallingPolicy::Strict,
            test_capabilities(),
            event_tx,
            "you are a voice agent",
            50,
            3,
        );
        drop(tts_audio_tx);

        stt_tx.send(Transcript { text: "hello".into(), is_final: true, confidence: 1.0 }).await.unwrap();

        let mut saw_final = false;
        let mut saw_done = false;
        for _ in 0..10 {
            match tokio::time::timeout(std::time::Duration::from_millis(200), event_rx.recv()).await {
                Ok(Some(ProviderEvent::FinalTranscript { .. })) => saw_final = true,
                Ok(Some(ProviderEvent::AssistantAudioDone)) => {
                    saw_done = true;
                    break;
                }
                Ok(Some(_)) => {}
                _ => break,
            }
        }

        assert!(saw_final);
        assert!(saw_done);
        assert_eq!(provider.state(), PipelineState::Idle);
    }

    #[tokio::test]
    async fn tool_call_suspends_until_submit_tool_result_resolves_it() {
        let (stt_tx, stt_rx) = mpsc::channel(8);
        let (tts_audio_tx, _tts_audio_rx) = mpsc::channel(8);
        let (event_tx, mut event_rx) = mpsc::channel(32);

        let llm = Arc::new(ScriptedLlm { calls: std::sync::atomic::AtomicU32::new(0) });
        let provider = ModularPipelineProvider::spawn(
            Arc::new(EchoStt),
            stt_rx,
            llm,
            Arc::new(SilentTts),
            tts_audio_tx.clone(),
            vec![ToolDefinition {
                name: "check_eligibility".into(),
                description: "check".into(),
                input_schema: serde_json::json!({"type": "object"}),
                phase: voxrelay_core::ToolPhase::InCall,
                timeout: std::time::Duration::from_secs(5),
            }],
            ToolCallingPolicy::Strict,
            test_capabilities(),
            event_tx,
            "system",
            50,
            3,
        );
        drop(tts_audio_tx);

        stt_tx.send(Transcript { text: "am I eligible".into(), is_final: true, confidence: 1.0 }).await.unwrap();

        let tool_call = loop {
            match tokio::time::timeout(std::time::Duration::from_millis(200), event_rx.recv()).await {
                Ok(Some(ProviderEvent::ToolCall(invocation))) => break invocation,
                Ok(Some(_)) => continue,
                _ => panic!("expected a ToolCall event"),
            }
        };

        assert_eq!(provider.state(), PipelineState::ToolDispatch);

        provider.submit_tool_result(&tool_call.id, serde_json::json!({"eligible": true})).await.unwrap();

        let mut saw_done = false;
        for _ in 0..10 {
            match tokio::time::timeout(std::time::Duration::from_millis(200), event_rx.recv()).await {
                Ok(Some(ProviderEvent::AssistantAudioDone)) => {
                    saw_done = true;
                    break;
                }
                Ok(Some(_)) => {}
                _ => break,
            }
        }
        assert!(saw_done);
        assert_eq!(provider.state(), PipelineState::Idle);
    }
}
