//! HTTP backend against an Ollama-compatible chat completion endpoint
//! (the "local multi-capability server" shape of §4.3). Retries
//! transient network/5xx failures with exponential backoff and supports
//! KV-cache context reuse across turns within one session.
//!
//! Grounded closely on the teacher's `backend.rs::OllamaBackend`: same
//! `/api/chat` request shape, same retry-with-backoff loop, same
//! NDJSON-stream parsing. Session-scoped (not shared across calls), so
//! the `Mutex`-protected context the teacher used per-backend-instance
//! becomes one per `LocalBackend`, one per call.

use crate::backend::{FinishReason, GenerationResult, LlmBackend, LlmConfig};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use voxrelay_core::{Error, Message, Result, Role};

pub struct LocalBackend {
    client: Client,
    config: LlmConfig,
    session_context: Mutex<Option<Vec<i64>>>,
}

impl LocalBackend {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::provider_fatal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            session_context: Mutex::new(None),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.config.endpoint, path)
    }

    fn is_retryable(error: &Error) -> bool {
        error.is_retryable()
    }

    async fn execute_request(&self, request: &OllamaChatRequest) -> Result<OllamaChatResponse> {
        let response = self
            .client
            .post(self.api_url("/chat"))
            .json(request)
            .send()
            .await
            .map_err(|e| Error::provider_transient(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return if status.is_server_error() {
                Err(Error::provider_transient(format!("{status}: {body}")))
            } else {
                Err(Error::provider_fatal(format!("{status}: {body}")))
            };
        }

        response
            .json()
            .await
            .map_err(|e| Error::provider_fatal(format!("invalid response body: {e}")))
    }

    pub async fn generate_with_context(
        &self,
        messages: &[Message],
        context: Option<&[i64]>,
    ) -> Result<GenerationResult> {
        let start = std::time::Instant::now();
        let request = OllamaChatRequest {
            model: self.config.model.clone(),
            messages: messages.iter().map(OllamaMessage::from).collect(),
            stream: false,
            options: OllamaOptions {
                temperature: self.config.temperature,
                top_p: self.config.top_p,
                num_predict: self.config.max_tokens as i32,
            },
            keep_alive: self.config.keep_alive.clone(),
            context: context.map(|c| c.to_vec()),
        };

        let mut last_error = None;
        let mut backoff = self.config.initial_backoff;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tracing::warn!(attempt, ?backoff, "LLM request failed, retrying");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            match self.execute_request(&request).await {
                Ok(result) => {
                    let total_time = start.elapsed();
                    return Ok(GenerationResult {
                        text: result.message.content,
                        tokens: result.eval_count.unwrap_or(0) as usize,
                        time_to_first_token_ms: result.prompt_eval_duration.unwrap_or(0) / 1_000_000,
                        total_time_ms: total_time.as_millis() as u64,
                        tokens_per_second: result.eval_count.unwrap_or(0) as f32
                            / (result.eval_duration.unwrap_or(1) as f32 / 1e9),
                        finish_reason: if result.done { FinishReason::Stop } else { FinishReason::Length },
                        context: result.context,
                    });
                }
                Err(e) if Self::is_retryable(&e) => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| Error::provider_transient("max retries exceeded")))
    }

    pub fn clear_session(&self) {
        *self.session_context.lock() = None;
    }
}

#[async_trait]
impl LlmBackend for LocalBackend {
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResult> {
        let context = self.session_context.lock().clone();
        let result = self.generate_with_context(messages, context.as_deref()).await?;
        if let Some(ctx) = &result.context {
            *self.session_context.lock() = Some(ctx.clone());
        }
        Ok(result)
    }

    async fn generate_stream(&self, messages: &[Message], tx: mpsc::Sender<String>) -> Result<GenerationResult> {
        let start = std::time::Instant::now();
        let cached_context = self.session_context.lock().clone();

        let request = OllamaChatRequest {
            model: self.config.model.clone(),
            messages: messages.iter().map(OllamaMessage::from).collect(),
            stream: true,
            options: OllamaOptions {
                temperature: self.config.temperature,
                top_p: self.config.top_p,
                num_predict: self.config.max_tokens as i32,
            },
            keep_alive: self.config.keep_alive.clone(),
            context: cached_context,
        };

        let response = self
            .client
            .post(self.api_url("/chat"))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::provider_transient(e.to_string()))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::provider_fatal(body));
        }

        let mut stream = response.bytes_stream();
        let mut full_response = String::new();
        let mut final_context = None;
        let mut total_tokens = 0usize;
        let mut finish_reason = FinishReason::Stop;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::provider_transient(e.to_string()))?;
            let text = String::from_utf8_lossy(&chunk);

            for line in text.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let Ok(parsed) = serde_json::from_str::<OllamaChatResponse>(line) else {
                    continue;
                };
                if !parsed.message.content.is_empty() {
                    full_response.push_str(&parsed.message.content);
                    let _ = tx.send(parsed.message.content).await;
                }
                if parsed.done {
                    total_tokens = parsed.eval_count.unwrap_or(0) as usize;
                    final_context = parsed.context;
                    finish_reason = FinishReason::Stop;
                }
            }
        }

        if let Some(ctx) = &final_context {
            *self.session_context.lock() = Some(ctx.clone());
        }

        Ok(GenerationResult {
            text: full_response,
            tokens: total_tokens,
            time_to_first_token_ms: 0,
            total_time_ms: start.elapsed().as_millis() as u64,
            tokens_per_second: 0.0,
            finish_reason,
            context: final_context,
        })
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.config.endpoint))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn supports_native_tools(&self) -> bool {
        false
    }
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
    keep_alive: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<Vec<i64>>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    top_p: f32,
    num_predict: i32,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

impl From<&Message> for OllamaMessage {
    fn from(m: &Message) -> Self {
        Self {
            role: match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "user",
            }
            .to_string(),
            content: m.content.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
    done: bool,
    #[serde(default)]
    context: Option<Vec<i64>>,
    #[serde(default)]
    eval_count: Option<i64>,
    #[serde(default)]
    eval_duration: Option<i64>,
    #[serde(default)]
    prompt_eval_duration: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ollama_message_maps_tool_role_to_user() {
        let msg = Message::tool_result("call-1", "done");
        let mapped = OllamaMessage::from(&msg);
        assert_eq!(mapped.role, "user");
    }

    #[test]
    fn config_default_has_sane_retry_bounds() {
        let config = crate::backend::LlmConfig::default();
        assert!(config.max_retries > 0);
        assert!(config.initial_backoff.as_millis() > 0);
    }
}
