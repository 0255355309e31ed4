//! TTS adapter (§4.4): accepts assistant text (possibly streamed as
//! deltas), emits audio chunks and a single terminal done signal per
//! turn.
//!
//! Grounded in the same buffered-HTTP-request shape as [`crate::stt`],
//! applied to the TTS direction: text in, audio bytes out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use voxrelay_core::{AudioEncoding, Error, Result};

#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub pcm16: Vec<i16>,
    pub encoding: AudioEncoding,
    pub sample_rate_hz: u32,
}

#[async_trait]
pub trait TtsAdapter: Send + Sync {
    /// Queue a chunk of assistant text for synthesis. Implementations
    /// may buffer until a sentence boundary before emitting audio.
    async fn push_text(&self, delta: &str) -> Result<()>;

    /// Flush any buffered text and signal the turn is complete; the
    /// caller must observe exactly one `AssistantAudioDone`-equivalent
    /// after this resolves (enforced by the orchestrator, not here).
    async fn finish_turn(&self) -> Result<()>;

    /// Stop generating audio for the in-flight turn and discard any
    /// buffered text (barge-in, §4.5 "Cancelling `Speaking`").
    async fn cancel(&self) -> Result<()>;

    fn adapter_key(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct HttpTtsConfig {
    pub url: String,
    pub voice: String,
    pub timeout: Duration,
    pub sample_rate_hz: u32,
}

impl Default for HttpTtsConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8091".to_string(),
            voice: "default".to_string(),
            timeout: Duration::from_secs(15),
            sample_rate_hz: 22050,
        }
    }
}

#[derive(Debug, Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    voice: &'a str,
}

#[derive(Debug, Deserialize)]
struct TtsResponse {
    #[serde(default)]
    audio_base64: String,
}

const SENTENCE_TERMINATORS: &[char] = &['.', '?', '!'];

fn find_sentence_boundary(text: &str) -> Option<usize> {
    for (i, c) in text.char_indices() {
        if SENTENCE_TERMINATORS.contains(&c) {
            let after = &text[i + c.len_utf8()..];
            if after.is_empty() || after.starts_with(char::is_whitespace) {
                return Some(i);
            }
        }
    }
    None
}

pub struct HttpTtsAdapter {
    config: HttpTtsConfig,
    client: reqwest::Client,
    key: String,
    buffer: parking_lot::Mutex<String>,
    tx: tokio::sync::mpsc::Sender<SynthesizedAudio>,
}

impl HttpTtsAdapter {
    pub fn new(key: impl Into<String>, config: HttpTtsConfig, tx: tokio::sync::mpsc::Sender<SynthesizedAudio>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::provider_fatal(format!("failed to build TTS HTTP client: {e}")))?;
        Ok(Self { config, client, key: key.into(), buffer: parking_lot::Mutex::new(String::new()), tx })
    }

    async fn synthesize(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Ok(());
        }
        let response = self
            .client
            .post(format!("{}/synthesize", self.config.url))
            .json(&TtsRequest { text, voice: &self.config.voice })
            .send()
            .await
            .map_err(|e| Error::provider_transient(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            return if status.is_server_error() {
                Err(Error::provider_transient(status.to_string()))
            } else {
                Err(Error::provider_fatal(status.to_string()))
            };
        }

        let parsed: TtsResponse = response
            .json()
            .await
            .map_err(|e| Error::provider_fatal(format!("invalid TTS response body: {e}")))?;

        let bytes = base64_decode(&parsed.audio_base64)
            .map_err(|e| Error::provider_fatal(format!("invalid base64 audio payload: {e}")))?;
        let pcm16: Vec<i16> = bytes.chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]])).collect();

        let audio = SynthesizedAudio { pcm16, encoding: AudioEncoding::Pcm16, sample_rate_hz: self.config.sample_rate_hz };
        let _ = self.tx.send(audio).await;
        Ok(())
    }
}

#[async_trait]
impl TtsAdapter for HttpTtsAdapter {
    async fn push_text(&self, delta: &str) -> Result<()> {
        let sentences: Vec<String> = {
            let mut buf = self.buffer.lock();
            buf.push_str(delta);
            let mut out = Vec::new();
            while let Some(boundary) = find_sentence_boundary(&buf) {
                let sentence: String = buf[..=boundary].trim().to_string();
                *buf = buf[boundary + 1..].to_string();
                if !sentence.is_empty() {
                    out.push(sentence);
                }
            }
            out
        };

        for sentence in sentences {
            self.synthesize(&sentence).await?;
        }
        Ok(())
    }

    async fn finish_turn(&self) -> Result<()> {
        let remaining = {
            let mut buf = self.buffer.lock();
            std::mem::take(&mut *buf)
        };
        self.synthesize(remaining.trim()).await
    }

    async fn cancel(&self) -> Result<()> {
        self.buffer.lock().clear();
        Ok(())
    }

    fn adapter_key(&self) -> &str {
        &self.key
    }
}

/// Minimal base64 decoder so this crate does not need its own `base64`
/// dependency for what is otherwise a single call site.
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
    fn finds_a_sentence_boundary_at_terminal_punctuation() {
        assert_eq!(find_sentence_boundary("Hello there. How are"), Some(11));
    }

    #[test]
    fn no_boundary_mid_sentence() {
        assert_eq!(find_sentence_boundary("Hello there"), None);
    }

    #[test]
    fn base64_roundtrips_known_bytes() {
        let decoded = base64_decode("AAEC/w==").unwrap();
        assert_eq!(decoded, vec![0x00, 0x01, 0x02, 0xff]);
    }
}
