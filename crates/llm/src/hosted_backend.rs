//! Backend for a hosted Messages-API-shaped LLM service with native
//! tool-use blocks (the `Strict` tool-calling policy of §4.8). Supports
//! both non-streaming and SSE-streamed generation, including streamed
//! tool-call argument deltas.
//!
//! Grounded in the teacher's `claude.rs`: same request/response shape
//! (system prompt carried separately from the message list, `tool_use`
//! content blocks, `content_block_delta` SSE events for streamed tool
//! argument JSON), generalized away from one specific vendor's model
//! catalog to a plain configurable model string.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use voxrelay_core::{Error, Message, Result, Role, ToolDefinition, ToolInvocation};

use crate::backend::{FinishReason, GenerationResult, LlmBackend};

#[derive(Debug, Clone)]
pub struct HostedBackendConfig {
    pub api_key: String,
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub timeout: Duration,
    pub endpoint: String,
}

impl Default for HostedBackendConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "default".to_string(),
            max_tokens: 1024,
            temperature: 0.7,
            top_p: None,
            timeout: Duration::from_secs(60),
            endpoint: "https://api.example.com".to_string(),
        }
    }
}

/// A tool call emitted natively by the hosted backend, carried alongside
/// any accompanying text.
#[derive(Debug, Clone)]
pub struct HostedResponse {
    pub text: String,
    pub tool_calls: Vec<ToolInvocation>,
    pub finish_reason: FinishReason,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

pub struct HostedBackend {
    config: HostedBackendConfig,
    client: Client,
}

impl HostedBackend {
    pub fn new(config: HostedBackendConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(Error::ConfigInvalid("hosted LLM backend requires an API key".into()));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::provider_fatal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    fn system_prompt(messages: &[Message]) -> Option<String> {
        messages.iter().find(|m| m.role == Role::System).map(|m| m.content.clone())
    }

    fn to_hosted_messages(messages: &[Message]) -> Vec<HostedMessage> {
        messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| HostedMessage {
                role: match m.role {
                    Role::User | Role::Tool => "user",
                    Role::Assistant => "assistant",
                    Role::System => unreachable!("filtered above"),
                }
                .to_string(),
                content: m.content.clone(),
            })
            .collect()
    }

    fn to_hosted_tools(tools: &[ToolDefinition]) -> Vec<HostedTool> {
        tools
            .iter()
            .map(|t| HostedTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.input_schema.clone(),
            })
            .collect()
    }

    pub async fn generate_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<HostedResponse> {
        let request = HostedRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            messages: Self::to_hosted_messages(messages),
            system: Self::system_prompt(messages),
            tools: (!tools.is_empty()).then(|| Self::to_hosted_tools(tools)),
            temperature: Some(self.config.temperature),
            top_p: self.config.top_p,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.endpoint))
            .header("x-api-key", &self.config.api_key)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::provider_transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return if status.is_server_error() {
                Err(Error::provider_transient(format!("{status}: {body}")))
            } else {
                Err(Error::provider_fatal(format!("{status}: {body}")))
            };
        }

        let parsed: HostedApiResponse = response
            .json()
            .await
            .map_err(|e| Error::provider_fatal(format!("invalid response body: {e}")))?;

        Ok(parse_response(parsed))
    }

    pub async fn generate_with_tools_stream(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        tx: mpsc::Sender<String>,
    ) -> Result<HostedResponse> {
        let request = HostedRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            messages: Self::to_hosted_messages(messages),
            system: Self::system_prompt(messages),
            tools: (!tools.is_empty()).then(|| Self::to_hosted_tools(tools)),
            temperature: Some(self.config.temperature),
            top_p: self.config.top_p,
            stream: true,
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.endpoint))
            .header("x-api-key", &self.config.api_key)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::provider_transient(e.to_string()))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::provider_fatal(body));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut full_text = String::new();
        let mut tool_calls = Vec::new();
        let mut current_tool_id = String::new();
        let mut current_tool_name = String::new();
        let mut current_tool_input = String::new();
        let mut input_tokens = 0;
        let mut output_tokens = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::provider_transient(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].trim().to_string();
                buffer = buffer[line_end + 1..].to_string();
                if line.is_empty() {
                    continue;
                }

                let Some(json_str) = line.strip_prefix("data: ") else { continue };
                if json_str == "[DONE]" {
                    continue;
                }
                let Ok(event) = serde_json::from_str::<HostedStreamEvent>(json_str) else { continue };

                match event {
                    HostedStreamEvent::MessageStart { message } => {
                        if let Some(usage) = message.usage {
                            input_tokens = usage.input_tokens;
                        }
                    }
                    HostedStreamEvent::ContentBlockStart { content_block, .. } => {
                        if let HostedContentBlock::ToolUse { id, name, .. } = content_block {
                            current_tool_id = id;
                            current_tool_name = name;
                            current_tool_input.clear();
                        }
                    }
                    HostedStreamEvent::ContentBlockDelta { delta, .. } => match delta {
                        HostedDelta::TextDelta { text } => {
                            full_text.push_str(&text);
                            let _ = tx.send(text).await;
                        }
                        HostedDelta::InputJsonDelta { partial_json } => {
                            current_tool_input.push_str(&partial_json);
                        }
                    },
                    HostedStreamEvent::ContentBlockStop { .. } => {
                        if !current_tool_name.is_empty() {
                            let arguments = serde_json::from_str(&current_tool_input)
                                .unwrap_or(serde_json::Value::Object(Default::default()));
                            tool_calls.push(ToolInvocation {
                                id: current_tool_id.clone(),
                                name: current_tool_name.clone(),
                                arguments,
                            });
                            current_tool_name.clear();
                            current_tool_id.clear();
                            current_tool_input.clear();
                        }
                    }
                    HostedStreamEvent::MessageDelta { usage, .. } => {
                        if let Some(u) = usage {
                            output_tokens = u.output_tokens;
                        }
                    }
                    HostedStreamEvent::Other => {}
                }
            }
        }

        let finish_reason = if tool_calls.is_empty() { FinishReason::Stop } else { FinishReason::ToolCall };
        Ok(HostedResponse {
            text: full_text,
            tool_calls,
            finish_reason,
            input_tokens,
            output_tokens,
        })
    }
}

fn parse_response(response: HostedApiResponse) -> HostedResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in response.content {
        match block {
            HostedContentBlock::Text { text: t } => text.push_str(&t),
            HostedContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolInvocation { id, name, arguments: input });
            }
        }
    }

    let finish_reason = if tool_calls.is_empty() { FinishReason::Stop } else { FinishReason::ToolCall };
    HostedResponse {
        text,
        tool_calls,
        finish_reason,
        input_tokens: response.usage.input_tokens,
        output_tokens: response.usage.output_tokens,
    }
}

#[async_trait]
impl LlmBackend for HostedBackend {
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResult> {
        let response = self.generate_with_tools(messages, &[]).await?;
        Ok(GenerationResult {
            text: response.text,
            tokens: response.output_tokens as usize,
            time_to_first_token_ms: 0,
            total_time_ms: 0,
            tokens_per_second: 0.0,
            finish_reason: response.finish_reason,
            context: None,
        })
    }

    async fn generate_stream(&self, messages: &[Message], tx: mpsc::Sender<String>) -> Result<GenerationResult> {
        let response = self.generate_with_tools_stream(messages, &[], tx).await?;
        Ok(GenerationResult {
            text: response.text,
            tokens: response.output_tokens as usize,
            time_to_first_token_ms: 0,
            total_time_ms: 0,
            tokens_per_second: 0.0,
            finish_reason: response.finish_reason,
            context: None,
        })
    }

    async fn is_available(&self) -> bool {
        !self.config.api_key.is_empty()
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn supports_native_tools(&self) -> bool {
        true
    }

    async fn generate_with_tools(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<crate::backend::ToolAwareGeneration> {
        let response = HostedBackend::generate_with_tools(self, messages, tools).await?;
        Ok(crate::backend::ToolAwareGeneration {
            text: response.text,
            tool_calls: response.tool_calls,
            finish_reason: response.finish_reason,
        })
    }
}

#[derive(Debug, Serialize)]
struct HostedMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct HostedTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct HostedRequest {
    model: String,
    max_tokens: usize,
    messages: Vec<HostedMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<HostedTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct HostedUsage {
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum HostedContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: serde_json::Value },
}

#[derive(Debug, Deserialize)]
struct HostedApiResponse {
    content: Vec<HostedContentBlock>,
    usage: HostedUsage,
}

#[derive(Debug, Deserialize)]
struct HostedStreamMessageStart {
    #[serde(default)]
    usage: Option<HostedUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum HostedDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum HostedStreamEvent {
    MessageStart { message: HostedStreamMessageStart },
    ContentBlockStart { index: u32, content_block: HostedContentBlock },
    ContentBlockDelta { index: u32, delta: HostedDelta },
    ContentBlockStop { index: u32 },
    MessageDelta { #[serde(default)] usage: Option<HostedUsage> },
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_construction_without_an_api_key() {
        let result = HostedBackend::new(HostedBackendConfig::default());
        assert!(result.is_err());
    }

    #[test]
    fn parses_text_and_tool_use_blocks() {
        let response = HostedApiResponse {
            content: vec![
                HostedContentBlock::Text { text: "checking now".into() },
                HostedContentBlock::ToolUse {
                    id: "call-1".into(),
                    name: "check_eligibility".into(),
                    input: serde_json::json!({ "weight": 50 }),
                },
            ],
            usage: HostedUsage { input_tokens: 10, output_tokens: 20 },
        };
        let parsed = parse_response(response);
        assert_eq!(parsed.text, "checking now");
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.finish_reason, FinishReason::ToolCall);
    }
}
