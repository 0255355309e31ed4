//! STT adapter (§4.4): accepts PCM16 ingress audio, emits partial/final
//! transcripts. Streaming (WebSocket) mode is preferred; buffered HTTP
//! mode is used when the remote service has no streaming endpoint.
//!
//! Grounded in the teacher's `stt/http_backend.rs` (buffered-request
//! shape: accumulate samples, POST when a threshold is reached),
//! generalized beyond one specific vendor's model and stripped of the
//! local-model decoding this repo does not implement.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use voxrelay_core::{Error, Result};

#[derive(Debug, Clone)]
pub struct Transcript {
    pub text: String,
    pub is_final: bool,
    pub confidence: f32,
}

/// A role-specific streaming adapter's common surface: push audio in,
/// get transcripts out via the returned channel established at `open`.
#[async_trait]
pub trait SttAdapter: Send + Sync {
    async fn push_audio(&self, pcm16: &[i16]) -> Result<()>;

    /// Signal end of utterance; the adapter should flush any buffered
    /// audio and emit a final transcript (possibly empty) promptly.
    async fn finalize(&self) -> Result<()>;

    fn adapter_key(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct HttpSttConfig {
    pub url: String,
    pub language: String,
    pub timeout: Duration,
    pub min_samples: usize,
    pub buffer_samples: usize,
}

impl Default for HttpSttConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8090".to_string(),
            language: "en".to_string(),
            timeout: Duration::from_secs(30),
            min_samples: 1600,
            buffer_samples: 16000,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SttResponse {
    text: String,
    #[serde(default)]
    confidence: f32,
}

/// Buffered HTTP STT adapter: accumulates PCM16 samples and POSTs them
/// once the configured buffer threshold is reached or `finalize` is
/// called, emitting transcripts through `tx`.
pub struct HttpSttAdapter {
    config: HttpSttConfig,
    client: reqwest::Client,
    key: String,
    buffer: parking_lot::Mutex<Vec<i16>>,
    tx: tokio::sync::mpsc::Sender<Transcript>,
}

impl HttpSttAdapter {
    pub fn new(key: impl Into<String>, config: HttpSttConfig, tx: tokio::sync::mpsc::Sender<Transcript>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::provider_fatal(format!("failed to build STT HTTP client: {e}")))?;
        Ok(Self { config, client, key: key.into(), buffer: parking_lot::Mutex::new(Vec::new()), tx })
    }

    async fn transcribe(&self, samples: &[i16]) -> Result<SttResponse> {
        if samples.len() < self.config.min_samples {
            return Ok(SttResponse { text: String::new(), confidence: 0.0 });
        }

        let pcm_bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let response = self
            .client
            .post(format!("{}/transcribe", self.config.url))
            .header("content-type", "audio/pcm")
            .header("x-language", &self.config.language)
            .body(pcm_bytes)
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

        response
            .json()
            .await
            .map_err(|e| Error::provider_fatal(format!("invalid STT response body: {e}")))
    }

    async fn flush(&self, is_final: bool) -> Result<()> {
        let samples = {
            let mut buf = self.buffer.lock();
            std::mem::take(&mut *buf)
        };
        if samples.is_empty() && !is_final {
            return Ok(());
        }
        let response = self.transcribe(&samples).await?;
        if response.text.is_empty() && !is_final {
            return Ok(());
        }
        let transcript = Transcript { text: response.text, is_final, confidence: response.confidence };
        let _ = self.tx.send(transcript).await;
        Ok(())
    }
}

#[async_trait]
impl SttAdapter for HttpSttAdapter {
    async fn push_audio(&self, pcm16: &[i16]) -> Result<()> {
        let should_flush = {
            let mut buf = self.buffer.lock();
            buf.extend_from_slice(pcm16);
            buf.len() >= self.config.buffer_samples
        };
        if should_flush {
            self.flush(false).await?;
        }
        Ok(())
    }

    async fn finalize(&self) -> Result<()> {
        self.flush(true).await
    }

    fn adapter_key(&self) -> &str {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_a_sane_buffer_threshold() {
        let config = HttpSttConfig::default();
        assert!(config.buffer_samples > config.min_samples);
    }
}
