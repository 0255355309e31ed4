//! The `LlmBackend` trait every concrete language-model backend
//! implements, plus the shapes shared across backends.
//!
//! Grounded in the teacher's `backend.rs::LlmBackend`, stripped of the
//! Devanagari-aware token estimator (locale-specific to the teacher's
//! domain) in favor of a grapheme-count heuristic, and switched from a
//! per-crate `LlmError` to `voxrelay_core::Error` for consistency with
//! the rest of this workspace.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use voxrelay_core::{Message, Result, Role, ToolDefinition, ToolInvocation};

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub model: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub timeout: Duration,
    pub stream: bool,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    /// Passed through to Ollama-compatible servers to keep the model
    /// resident between calls; ignored by hosted backends.
    pub keep_alive: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            endpoint: "http://localhost:11434".to_string(),
            api_key: None,
            max_tokens: 256,
            temperature: 0.7,
            top_p: 0.9,
            timeout: Duration::from_secs(30),
            stream: true,
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            keep_alive: "5m".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub text: String,
    pub tokens: usize,
    pub time_to_first_token_ms: u64,
    pub total_time_ms: u64,
    pub tokens_per_second: f32,
    pub finish_reason: FinishReason,
    /// Opaque backend-specific context for KV-cache reuse across turns,
    /// if the backend supports it (Ollama-compatible servers do).
    pub context: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ToolCall,
    Error,
    Cancelled,
}

/// Outcome of one LLM turn, normalized across native tool-use backends and
/// text-injection backends so the pipeline orchestrator never has to care
/// which kind it is talking to.
#[derive(Debug, Clone)]
pub struct ToolAwareGeneration {
    pub text: String,
    pub tool_calls: Vec<ToolInvocation>,
    pub finish_reason: FinishReason,
}

#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResult>;

    async fn generate_stream(
        &self,
        messages: &[Message],
        tx: mpsc::Sender<String>,
    ) -> Result<GenerationResult>;

    async fn is_available(&self) -> bool;

    fn model_name(&self) -> &str;

    /// Whether this backend understands tool definitions natively
    /// (§4.8's `Strict`/`Compatible` distinction). Backends that return
    /// `false` never receive a tool catalog directly; the caller must
    /// use [`crate::prompt::render_tool_injection`] instead.
    fn supports_native_tools(&self) -> bool {
        false
    }

    fn estimate_tokens(&self, text: &str) -> usize {
        text.chars().count().max(1) / 4
    }

    /// One LLM turn with a tool catalog attached, normalized to
    /// `ToolAwareGeneration` regardless of how the concrete backend
    /// surfaces tool calls. The default implementation is the
    /// `Compatible` policy: it renders the catalog into the system
    /// message and parses a `[TOOL_CALL: {...}]` marker back out of the
    /// response text. Backends with native tool-call support (§4.8's
    /// `Strict` policy) override this.
    async fn generate_with_tools(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<ToolAwareGeneration> {
        let mut augmented = messages.to_vec();
        if !tools.is_empty() {
            if let Some(system) = augmented.iter_mut().find(|m| m.role == Role::System) {
                system.content.push_str("\n\n");
                system.content.push_str(&crate::prompt::render_tool_injection(tools));
            }
        }

        let result = self.generate(&augmented).await?;

        if let Some(parsed) = crate::prompt::parse_tool_call(&result.text) {
            Ok(ToolAwareGeneration {
                text: parsed.text_before,
                tool_calls: vec![ToolInvocation {
                    id: uuid::Uuid::new_v4().to_string(),
                    name: parsed.name,
                    arguments: parsed.arguments,
                }],
                finish_reason: FinishReason::ToolCall,
            })
        } else {
            Ok(ToolAwareGeneration { text: result.text, tool_calls: Vec::new(), finish_reason: result.finish_reason })
        }
    }
}
