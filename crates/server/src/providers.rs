//! Provider factory: turns a resolved context's `provider`/`pipeline`
//! reference into a live `Arc<dyn Provider>` (§4.3, §9 "Polymorphic
//! providers"). Lives in the server crate rather than `voxrelay-pipeline`
//! because only the call lifecycle controller knows the negotiated
//! audio profile and the per-call tool catalog needed to construct one.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use voxrelay_config::{ContextSpec, ProviderSpec, Settings};
use voxrelay_core::audio::AudioProfile;
use voxrelay_core::{Provider, ProviderCapabilities, ProviderEvent, ToolCallingPolicy, ToolDefinition};
use voxrelay_llm::{HostedBackend, HostedBackendConfig, LlmBackend, LlmConfig, LocalBackend};
use voxrelay_pipeline::{
    FullAgentProvider, HttpSttAdapter, HttpSttConfig, HttpTtsAdapter, HttpTtsConfig, LocalProvider, ModularPipelineProvider,
};

use crate::error::{Result, ServerError};

fn opt_str(opts: &serde_json::Value, key: &str) -> Option<String> {
    opts.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn opt_u64(opts: &serde_json::Value, key: &str, default: u64) -> u64 {
    opts.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
}

async fn build_llm_backend(spec: &ProviderSpec) -> Result<Arc<dyn LlmBackend>> {
    let ProviderSpec::Llm { backend, model, opts } = spec else {
        return Err(ServerError::ConfigInvalid("expected an llm provider".into()));
    };

    match backend.as_str() {
        "hosted" => {
            let config = HostedBackendConfig {
                api_key: opt_str(opts, "api_key").unwrap_or_default(),
                model: model.clone(),
                max_tokens: opts.get("max_tokens").and_then(|v| v.as_u64()).unwrap_or(1024) as usize,
                temperature: opts.get("temperature").and_then(|v| v.as_f64()).unwrap_or(0.7) as f32,
                top_p: opts.get("top_p").and_then(|v| v.as_f64()).map(|v| v as f32),
                timeout: Duration::from_secs(opt_u64(opts, "timeout_secs", 60)),
                endpoint: opt_str(opts, "endpoint").unwrap_or_else(|| "https://api.example.com".to_string()),
            };
            Ok(Arc::new(HostedBackend::new(config)?))
        }
        "local" | _ => {
            let config = LlmConfig {
                model: model.clone(),
                endpoint: opt_str(opts, "endpoint").unwrap_or_else(|| "http://localhost:11434".to_string()),
                api_key: opt_str(opts, "api_key"),
                max_tokens: opts.get("max_tokens").and_then(|v| v.as_u64()).unwrap_or(256) as usize,
                temperature: opts.get("temperature").and_then(|v| v.as_f64()).unwrap_or(0.7) as f32,
                top_p: opts.get("top_p").and_then(|v| v.as_f64()).unwrap_or(0.9) as f32,
                timeout: Duration::from_secs(opt_u64(opts, "timeout_secs", 30)),
                stream: opts.get("stream").and_then(|v| v.as_bool()).unwrap_or(true),
                max_retries: opts.get("max_retries").and_then(|v| v.as_u64()).unwrap_or(3) as u32,
                initial_backoff: Duration::from_millis(opt_u64(opts, "initial_backoff_ms", 100)),
                keep_alive: opt_str(opts, "keep_alive").unwrap_or_else(|| "5m".to_string()),
            };
            Ok(Arc::new(LocalBackend::new(config)?))
        }
    }
}

/// Builds the provider a context resolves to: either one `ProviderSpec`
/// named directly (full-agent or local), or a modular pipeline composed
/// from three separately-keyed providers.
pub async fn build_provider(
    settings: &Settings,
    context: &ContextSpec,
    profile: &AudioProfile,
    tool_catalog: Vec<ToolDefinition>,
    tool_policy: ToolCallingPolicy,
    event_tx: mpsc::Sender<ProviderEvent>,
) -> Result<Arc<dyn Provider>> {
    if let Some(key) = context.provider_ref() {
        let spec = settings
            .providers
            .get(key)
            .ok_or_else(|| ServerError::ConfigInvalid(format!("context names unresolved provider '{key}'")))?;

        return match spec {
            ProviderSpec::FullAgent { url, .. } => {
                let session_config = voxrelay_pipeline::full_agent::SessionConfig {
                    instructions: Some(context.system_prompt.clone()),
                    input_audio_format: "pcm16".to_string(),
                    output_audio_format: "pcm16".to_string(),
                };
                let provider = FullAgentProvider::connect(url, session_config, profile.internal_rate_hz, event_tx)
                    .await
                    .map_err(ServerError::from)?;
                Ok(provider as Arc<dyn Provider>)
            }
            ProviderSpec::Local { url, .. } => {
                let provider = LocalProvider::connect(url, event_tx).await.map_err(ServerError::from)?;
                Ok(provider as Arc<dyn Provider>)
            }
            other => Err(ServerError::ConfigInvalid(format!(
                "context names provider '{key}' of kind '{}', which settings.validate() should have rejected",
                other.kind_name()
            ))),
        };
    }

    let key = context
        .pipeline_ref()
        .ok_or_else(|| ServerError::ConfigInvalid("context names neither a provider nor a pipeline".into()))?;
    let pipeline = settings
        .pipelines
        .get(key)
        .ok_or_else(|| ServerError::ConfigInvalid(format!("context names unresolved pipeline '{key}'")))?;

    let stt_spec = settings.providers.get(&pipeline.stt);
    let llm_spec = settings
        .providers
        .get(&pipeline.llm)
        .ok_or_else(|| ServerError::ConfigInvalid(format!("pipeline '{key}' names unresolved llm provider")))?;
    let tts_spec = settings.providers.get(&pipeline.tts);

    let (stt_tx, stt_rx) = mpsc::channel(64);
    let (tts_tx, tts_rx) = mpsc::channel(64);

    let stt: Arc<dyn voxrelay_pipeline::SttAdapter> = match stt_spec {
        Some(ProviderSpec::Stt { url, opts }) => Arc::new(
            HttpSttAdapter::new(
                pipeline.stt.clone(),
                HttpSttConfig { url: url.clone(), timeout: Duration::from_secs(opt_u64(opts, "timeout_secs", 30)), ..Default::default() },
                stt_tx,
            )
            .map_err(ServerError::from)?,
        ),
        _ => return Err(ServerError::ConfigInvalid(format!("pipeline '{key}' names an unresolved or mistyped stt provider"))),
    };

    let tts: Arc<dyn voxrelay_pipeline::TtsAdapter> = match tts_spec {
        Some(ProviderSpec::Tts { url, opts }) => Arc::new(
            HttpTtsAdapter::new(
                pipeline.tts.clone(),
                HttpTtsConfig {
                    url: url.clone(),
                    sample_rate_hz: profile.internal_rate_hz,
                    timeout: Duration::from_secs(opt_u64(opts, "timeout_secs", 30)),
                    ..Default::default()
                },
                tts_tx,
            )
            .map_err(ServerError::from)?,
        ),
        _ => return Err(ServerError::ConfigInvalid(format!("pipeline '{key}' names an unresolved or mistyped tts provider"))),
    };

    let llm = build_llm_backend(llm_spec).await?;
    let native_tools = llm.supports_native_tools();

    let capabilities = ProviderCapabilities {
        supports_streaming_transcript: false,
        supports_tool_calls: tool_policy != ToolCallingPolicy::Off,
        supported_input_rates_hz: vec![profile.internal_rate_hz],
        supported_output_rates_hz: vec![profile.internal_rate_hz],
    };

    let effective_policy = if !native_tools && tool_policy == ToolCallingPolicy::Strict {
        ToolCallingPolicy::Compatible
    } else {
        tool_policy
    };

    let provider = ModularPipelineProvider::spawn(
        stt,
        stt_rx,
        llm,
        tts,
        tts_rx,
        tool_catalog,
        effective_policy,
        capabilities,
        event_tx,
        context.system_prompt.clone(),
        40,
        2,
    );

    Ok(provider as Arc<dyn Provider>)
}
