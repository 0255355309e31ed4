//! Local multi-capability provider (§4.3 shape 3): a single WebSocket to
//! a locally-hosted inference server that answers a capability probe on
//! connect and then may run STT-only, TTS-only, or (if it advertises it)
//! full LLM turns, over the same wire event surface as
//! [`crate::full_agent`].
//!
//! Grounded the same way as `full_agent.rs` on the retrieval pack's
//! realtime event shapes, with a `status`/`capabilities` request-reply
//! pair prepended, since a local server (unlike a hosted full-agent
//! endpoint) cannot be assumed to support every mode.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_tungstenite::{tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};

use voxrelay_core::{AudioFrame, Direction, Error, ProviderCapabilities, ProviderEvent, Result, ToolCallingPolicy};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalMode {
    SttOnly,
    TtsOnly,
    SttTts,
    FullAgent,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalCapabilities {
    pub modes: Vec<LocalMode>,
    #[serde(default)]
    pub supports_tool_calls: bool,
    pub input_rates_hz: Vec<u32>,
    pub output_rates_hz: Vec<u32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
enum LocalClientEvent {
    #[serde(rename = "status")]
    Status,
    #[serde(rename = "mode.select")]
    ModeSelect { mode: LocalMode },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,
    #[serde(rename = "response.cancel")]
    ResponseCancel,
    #[serde(rename = "tool_result")]
    ToolResult { call_id: String, output: serde_json::Value },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum LocalServerEvent {
    #[serde(rename = "status.reply")]
    StatusReply { capabilities: LocalCapabilities },
    #[serde(rename = "transcript.partial")]
    TranscriptPartial { text: String },
    #[serde(rename = "transcript.final")]
    TranscriptFinal { text: String },
    #[serde(rename = "assistant.text")]
    AssistantText { text: String },
    #[serde(rename = "assistant.audio")]
    AssistantAudio { audio: String },
    #[serde(rename = "assistant.audio_done")]
    AssistantAudioDone,
    #[serde(rename = "tool_call")]
    ToolCall { call_id: String, name: String, arguments: serde_json::Value },
    #[serde(rename = "error")]
    Error { message: String, retryable: bool },
    #[serde(other)]
    Other,
}

/// Connects to a local inference server, probes its capabilities, and
/// selects the richest mode it advertises before handing back a
/// ready-to-use provider.
pub struct LocalProvider {
    sink: AsyncMutex<futures_util::stream::SplitSink<WsStream, WsMessage>>,
    capabilities: ProviderCapabilities,
    mode: LocalMode,
    egress_sequence: std::sync::atomic::AtomicU64,
    egress_rate_hz: u32,
}

impl LocalProvider {
    pub async fn connect(url: &str, event_tx: mpsc::Sender<ProviderEvent>) -> Result<Arc<Self>> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| Error::TransportUnavailable(format!("local provider websocket connect failed: {e}")))?;
        let (mut sink, mut source) = stream.split();

        let probe = LocalClientEvent::Status;
        sink.send(WsMessage::Text(serde_json::to_string(&probe)?))
            .await
            .map_err(|e| Error::TransportUnavailable(e.to_string()))?;

        let local_caps = loop {
            match source.next().await {
                Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<LocalServerEvent>(&text) {
                    Ok(LocalServerEvent::StatusReply { capabilities }) => break capabilities,
                    Ok(_) => continue,
                    Err(e) => return Err(Error::TransportUnavailable(format!("malformed status reply: {e}"))),
                },
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(Error::TransportUnavailable(e.to_string())),
                None => return Err(Error::TransportUnavailable("connection closed before status reply".to_string())),
            }
        };

        let mode = if local_caps.modes.contains(&LocalMode::FullAgent) {
            LocalMode::FullAgent
        } else if local_caps.modes.contains(&LocalMode::SttTts) {
            LocalMode::SttTts
        } else if local_caps.modes.contains(&LocalMode::SttOnly) {
            LocalMode::SttOnly
        } else if local_caps.modes.contains(&LocalMode::TtsOnly) {
            LocalMode::TtsOnly
        } else {
            return Err(Error::ConfigInvalid("local provider advertised no usable mode".to_string()));
        };

        sink.send(WsMessage::Text(serde_json::to_string(&LocalClientEvent::ModeSelect { mode })?))
            .await
            .map_err(|e| Error::TransportUnavailable(e.to_string()))?;

        let egress_rate_hz = local_caps.output_rates_hz.first().copied().unwrap_or(16_000);
        let capabilities = ProviderCapabilities {
            supports_streaming_transcript: true,
            supports_tool_calls: local_caps.supports_tool_calls,
            supported_input_rates_hz: local_caps.input_rates_hz,
            supported_output_rates_hz: local_caps.output_rates_hz,
        };

        let provider = Arc::new(Self {
            sink: AsyncMutex::new(sink),
            capabilities,
            mode,
            egress_sequence: std::sync::atomic::AtomicU64::new(0),
            egress_rate_hz,
        });

        let reader = provider.clone();
        tokio::spawn(async move {
            while let Some(message) = source.next().await {
                let message = match message {
                    Ok(m) => m,
                    Err(e) => {
                        let _ = event_tx.send(ProviderEvent::Error { message: e.to_string(), retryable: true }).await;
                        break;
                    }
                };
                let WsMessage::Text(text) = message else { continue };
                match serde_json::from_str::<LocalServerEvent>(&text) {
                    Ok(event) => reader.handle_server_event(event, &event_tx).await,
                    Err(e) => tracing::warn!(error = %e, "failed to parse local provider event"),
                }
            }
        });

        Ok(provider)
    }

    async fn handle_server_event(&self, event: LocalServerEvent, event_tx: &mpsc::Sender<ProviderEvent>) {
        match event {
            LocalServerEvent::TranscriptPartial { text } => {
                let _ = event_tx.send(ProviderEvent::PartialTranscript { text }).await;
            }
            LocalServerEvent::TranscriptFinal { text } => {
                let _ = event_tx.send(ProviderEvent::FinalTranscript { text }).await;
            }
            LocalServerEvent::AssistantText { text } => {
                let _ = event_tx.send(ProviderEvent::AssistantText { text }).await;
            }
            LocalServerEvent::AssistantAudio { audio } => match base64_decode(&audio) {
                Ok(bytes) => {
                    let samples: Vec<i16> = bytes.chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]])).collect();
                    let sequence = self.egress_sequence.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    let frame = AudioFrame::new(samples, self.egress_rate_hz, sequence, Direction::Egress);
                    let _ = event_tx.send(ProviderEvent::AssistantAudio { frame }).await;
                }
                Err(e) => tracing::warn!(error = %e, "dropping malformed local provider audio chunk"),
            },
            LocalServerEvent::AssistantAudioDone => {
                let _ = event_tx.send(ProviderEvent::AssistantAudioDone).await;
            }
            LocalServerEvent::ToolCall { call_id, name, arguments } => {
                let _ = event_tx.send(ProviderEvent::ToolCall(voxrelay_core::ToolInvocation { id: call_id, name, arguments })).await;
            }
            LocalServerEvent::Error { message, retryable } => {
                let _ = event_tx.send(ProviderEvent::Error { message, retryable }).await;
            }
            LocalServerEvent::StatusReply { .. } | LocalServerEvent::Other => {}
        }
    }

    async fn send(&self, event: &LocalClientEvent) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        self.sink
            .lock()
            .await
            .send(WsMessage::Text(payload))
            .await
            .map_err(|e| Error::provider_transient(e.to_string()))
    }

    pub fn mode(&self) -> LocalMode {
        self.mode
    }
}

#[async_trait]
impl voxrelay_core::Provider for LocalProvider {
    async fn send_audio(&self, frame: AudioFrame) -> Result<()> {
        let bytes: Vec<u8> = frame.samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        self.send(&LocalClientEvent::InputAudioBufferAppend { audio: base64_encode(&bytes) }).await
    }

    async fn commit_turn(&self) -> Result<()> {
        self.send(&LocalClientEvent::InputAudioBufferCommit).await
    }

    async fn submit_tool_result(&self, invocation_id: &str, output: serde_json::Value) -> Result<()> {
        if !self.capabilities.supports_tool_calls {
            return Err(Error::Invariant("local provider does not support tool calls".to_string()));
        }
        self.send(&LocalClientEvent::ToolResult { call_id: invocation_id.to_string(), output }).await
    }

    async fn cancel_turn(&self) -> Result<()> {
        self.send(&LocalClientEvent::ResponseCancel).await
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    fn tool_calling_policy(&self) -> ToolCallingPolicy {
        if self.capabilities.supports_tool_calls {
            ToolCallingPolicy::Strict
        } else {
            ToolCallingPolicy::Off
        }
    }
}

fn base64_encode(input: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity((input.len() + 2) / 3 * 4);
    for chunk in input.chunks(3) {
        let b0 = chunk[0];
        let b1 = *chunk.get(1).unwrap_or(&0);
        let b2 = *chunk.get(2).unwrap_or(&0);
        out.push(ALPHABET[(b0 >> 2) as usize] as char);
        out.push(ALPHABET[(((b0 & 0x03) << 4) | (b1 >> 4)) as usize] as char);
        out.push(if chunk.len() > 1 { ALPHABET[(((b1 & 0x0f) << 2) | (b2 >> 6)) as usize] as char } else { '=' });
        out.push(if chunk.len() > 2 { ALPHABET[(b2 & 0x3f) as usize] as char } else { '=' });
    }
    out
}

fn base64_decode(input: &str) -> std::result::Result<Vec<u8>, String> {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut reverse = [255u8; 256];
    for (i, &c) in ALPHABET.iter().enumerate() {
        reverse[c as usize] = i as u8;
    }

    let input = input.trim_end_matches('=');
    let mut out = Vec::with_capacity(input.len() * 3 / 4);
    let mut buffer = 0u32;
    let mut bits = 0u32;
    for byte in input.bytes() {
        let value = reverse[byte as usize];
        if value == 255 {
            return Err(format!("invalid base64 byte: {byte}"));
        }
        buffer = (buffer << 6) | value as u32;
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_reply_parses_capability_modes() {
        let raw = r#"{"type":"status.reply","capabilities":{"modes":["stt_only","tts_only"],"supports_tool_calls":false,"input_rates_hz":[16000],"output_rates_hz":[22050]}}"#;
        let event: LocalServerEvent = serde_json::from_str(raw).unwrap();
        match event {
            LocalServerEvent::StatusReply { capabilities } => {
                assert_eq!(capabilities.modes, vec![LocalMode::SttOnly, LocalMode::TtsOnly]);
                assert!(!capabilities.supports_tool_calls);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn mode_select_serializes_with_tagged_type() {
        let event = LocalClientEvent::ModeSelect { mode: LocalMode::SttTts };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "mode.select");
        assert_eq!(json["mode"], "stt_tts");
    }
}
