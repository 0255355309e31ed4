//! The provider/pipeline/context/tool/telephony document shape (§6
//! "Configuration", §9 "Dynamic configuration shape").
//!
//! Modeled as tagged variants per the source's design note: validate once
//! at load and hand the engine already-validated records, not a
//! loosely-typed document it has to re-interpret at call time.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use voxrelay_core::audio::AudioProfile;
use voxrelay_core::tool::ToolPhase;

/// One entry of the `providers` section. `Stt`/`Llm`/`Tts` are adapter-level
/// configs referenced by key from a `PipelineSpec`; `FullAgent`/`Local` are
/// complete providers referenced directly from a `ContextSpec`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderSpec {
    Stt {
        url: String,
        #[serde(default)]
        opts: serde_json::Value,
    },
    Llm {
        backend: String,
        model: String,
        #[serde(default)]
        opts: serde_json::Value,
    },
    Tts {
        url: String,
        #[serde(default)]
        opts: serde_json::Value,
    },
    FullAgent {
        url: String,
        #[serde(default)]
        opts: serde_json::Value,
    },
    Local {
        url: String,
        #[serde(default)]
        opts: serde_json::Value,
    },
}

impl ProviderSpec {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ProviderSpec::Stt { .. } => "stt",
            ProviderSpec::Llm { .. } => "llm",
            ProviderSpec::Tts { .. } => "tts",
            ProviderSpec::FullAgent { .. } => "full_agent",
            ProviderSpec::Local { .. } => "local",
        }
    }
}

/// A named composition of an STT, LLM, and TTS provider key into one
/// modular pipeline (§4.3 "Modular pipeline").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub stt: String,
    pub llm: String,
    pub tts: String,
    #[serde(default)]
    pub opts: serde_json::Value,
}

/// A conversation context: exactly one of `provider` or `pipeline` names an
/// entry from the corresponding section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSpec {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub pipeline: Option<String>,
    pub system_prompt: String,
    #[serde(default)]
    pub greeting: Option<String>,
    pub audio_profile: String,
}

impl ContextSpec {
    pub fn provider_ref(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    pub fn pipeline_ref(&self) -> Option<&str> {
        self.pipeline.as_deref()
    }
}

/// One entry of the `tools` section: built-in telephony tools or a
/// generically configured HTTP tool (§9 "Dynamic configuration shape").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolSpec {
    BuiltIn {
        name: String,
        #[serde(default)]
        opts: serde_json::Value,
    },
    HttpTool {
        phase: ToolPhase,
        url: String,
        #[serde(default = "default_http_method")]
        method: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        body: Option<serde_json::Value>,
        params: serde_json::Value,
        #[serde(default)]
        outputs: Option<serde_json::Value>,
        #[serde(default = "default_tool_timeout_secs")]
        timeout_secs: u64,
    },
}

fn default_http_method() -> String {
    "POST".to_string()
}

fn default_tool_timeout_secs() -> u64 {
    10
}

/// A tool's enabled flag plus its dispatch spec (§6 "tools (enabled set
/// with per-tool options)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEntry {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub spec: ToolSpec,
}

fn default_true() -> bool {
    true
}

/// Named audio profiles (§3 "Audio Profile"); reuses the runtime type
/// directly since the document shape and the runtime shape coincide.
pub type AudioProfileSpec = AudioProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Rtp,
    AudioSocket,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RtpPortRange {
    pub min: u16,
    pub max: u16,
}

/// Telephony transport selection (§6 "telephony (transport selection,
/// advertise host, RTP port range, MoH class)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelephonyConfig {
    pub transport: TransportKind,
    #[serde(default = "default_ari_url")]
    pub ari_url: String,
    #[serde(default = "default_ari_app")]
    pub app_name: String,
    pub advertise_host: String,
    #[serde(default = "default_rtp_port_range")]
    pub rtp_port_range: RtpPortRange,
    #[serde(default = "default_moh_class")]
    pub moh_class: String,
}

fn default_ari_url() -> String {
    "ws://127.0.0.1:8088/ari/events".to_string()
}

fn default_ari_app() -> String {
    "voxrelay".to_string()
}

fn default_rtp_port_range() -> RtpPortRange {
    RtpPortRange { min: 10_000, max: 20_000 }
}

fn default_moh_class() -> String {
    "default".to_string()
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Rtp,
            ari_url: default_ari_url(),
            app_name: default_ari_app(),
            advertise_host: "127.0.0.1".to_string(),
            rtp_port_range: default_rtp_port_range(),
            moh_class: default_moh_class(),
        }
    }
}
