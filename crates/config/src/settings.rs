//! Top-level settings document (§6 "Configuration"): loaded from
//! `config/default.{yaml,toml}`, an optional `config/{env}.{yaml,toml}`
//! overlay, and `VOXRELAY__` prefixed environment variables, in that
//! ascending priority order, then validated once before use.

use std::collections::HashMap;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::document::{ContextSpec, PipelineSpec, ProviderSpec, ToolEntry};
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Health/admission HTTP surface (§4.10, §6 "Health/metrics endpoints").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,
    /// Bearer token required on `POST /reload`; `None` accepts unauthenticated reloads.
    #[serde(default)]
    pub reload_token: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_max_concurrent_calls() -> usize {
    500
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_concurrent_calls: default_max_concurrent_calls(),
            reload_token: None,
        }
    }
}

/// Persisted call-record sink location (§6 "Persisted state layout").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_call_record_path")]
    pub call_record_path: String,
    /// Whether the per-call record retains the full transcript (§3 "CallRecord").
    #[serde(default)]
    pub retain_transcript: bool,
}

fn default_call_record_path() -> String {
    "data/calls.ndjson".to_string()
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            call_record_path: default_call_record_path(),
            retain_transcript: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_metrics_port() -> u16 {
    9090
}
fn default_true() -> bool {
    true
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
            metrics_port: default_metrics_port(),
        }
    }
}

/// The full configuration document (§6 "Configuration").
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub telephony: crate::document::TelephonyConfig,
    #[serde(default)]
    pub audio_profiles: HashMap<String, crate::document::AudioProfileSpec>,
    #[serde(default)]
    pub providers: HashMap<String, ProviderSpec>,
    #[serde(default)]
    pub pipelines: HashMap<String, PipelineSpec>,
    #[serde(default)]
    pub contexts: HashMap<String, ContextSpec>,
    #[serde(default)]
    pub tools: HashMap<String, ToolEntry>,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates cross-references between sections and value ranges.
    /// Called once at load and once per reload; never at call time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_telephony()?;
        self.validate_pipelines()?;
        self.validate_contexts()?;
        self.validate_tools()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "port cannot be 0".to_string(),
            });
        }
        if self.server.max_concurrent_calls == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.max_concurrent_calls".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.environment.is_production() && self.server.reload_token.is_none() {
            tracing::warn!("server.reload_token unset in production; /reload accepts any caller");
        }
        Ok(())
    }

    fn validate_telephony(&self) -> Result<(), ConfigError> {
        let range = &self.telephony.rtp_port_range;
        if range.min >= range.max {
            return Err(ConfigError::InvalidValue {
                field: "telephony.rtp_port_range".to_string(),
                message: format!("min ({}) must be less than max ({})", range.min, range.max),
            });
        }
        Ok(())
    }

    /// Every pipeline's `stt`/`llm`/`tts` key must resolve to a provider of
    /// the matching kind (§9 "Validate once at load").
    fn validate_pipelines(&self) -> Result<(), ConfigError> {
        for (name, pipeline) in &self.pipelines {
            self.require_provider_kind(&format!("pipelines.{name}.stt"), &pipeline.stt, "stt")?;
            self.require_provider_kind(&format!("pipelines.{name}.llm"), &pipeline.llm, "llm")?;
            self.require_provider_kind(&format!("pipelines.{name}.tts"), &pipeline.tts, "tts")?;
        }
        Ok(())
    }

    fn require_provider_kind(&self, field: &str, key: &str, kind: &str) -> Result<(), ConfigError> {
        match self.providers.get(key) {
            Some(spec) if spec.kind_name() == kind => Ok(()),
            Some(spec) => Err(ConfigError::InvalidValue {
                field: field.to_string(),
                message: format!("provider '{key}' is kind '{}', expected '{kind}'", spec.kind_name()),
            }),
            None => Err(ConfigError::UnresolvedReference {
                field: field.to_string(),
                reference: key.to_string(),
            }),
        }
    }

    /// Every context names exactly one of `provider`/`pipeline`, and both
    /// must resolve; `audio_profile` must resolve too.
    fn validate_contexts(&self) -> Result<(), ConfigError> {
        for (name, context) in &self.contexts {
            match (context.provider_ref(), context.pipeline_ref()) {
                (Some(_), Some(_)) => {
                    return Err(ConfigError::InvalidValue {
                        field: format!("contexts.{name}"),
                        message: "names both a provider and a pipeline; exactly one is required".to_string(),
                    })
                }
                (None, None) => {
                    return Err(ConfigError::InvalidValue {
                        field: format!("contexts.{name}"),
                        message: "names neither a provider nor a pipeline".to_string(),
                    })
                }
                (Some(key), None) => match self.providers.get(key) {
                    None => {
                        return Err(ConfigError::UnresolvedReference {
                            field: format!("contexts.{name}.provider"),
                            reference: key.to_string(),
                        })
                    }
                    Some(spec) if spec.kind_name() != "full_agent" && spec.kind_name() != "local" => {
                        return Err(ConfigError::InvalidValue {
                            field: format!("contexts.{name}.provider"),
                            message: format!(
                                "provider '{key}' is kind '{}'; a context's `provider` field must name a full_agent or local provider, use `pipeline` to compose stt/llm/tts providers instead",
                                spec.kind_name()
                            ),
                        })
                    }
                    Some(_) => {}
                },
                (None, Some(key)) => {
                    if !self.pipelines.contains_key(key) {
                        return Err(ConfigError::UnresolvedReference {
                            field: format!("contexts.{name}.pipeline"),
                            reference: key.to_string(),
                        });
                    }
                }
            }

            if !self.audio_profiles.contains_key(&context.audio_profile) {
                return Err(ConfigError::UnresolvedReference {
                    field: format!("contexts.{name}.audio_profile"),
                    reference: context.audio_profile.clone(),
                });
            }
        }
        Ok(())
    }

    fn validate_tools(&self) -> Result<(), ConfigError> {
        for (name, entry) in &self.tools {
            if let crate::document::ToolSpec::HttpTool { url, .. } = &entry.spec {
                if url.trim().is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: format!("tools.{name}.url"),
                        message: "must not be empty".to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Loads settings from files and environment.
///
/// Priority (highest to lowest): `VOXRELAY__` prefixed environment
/// variables, `config/{env}.{yaml,toml}` (if `env` given),
/// `config/default.{yaml,toml}`.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder = builder.add_source(File::with_name(&format!("config/{env_name}")).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("VOXRELAY")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{AudioProfileSpec, ContextSpec, PipelineSpec, ProviderSpec, RtpPortRange, TelephonyConfig, TransportKind};
    use voxrelay_core::audio::AudioEncoding;

    fn sample_profile() -> AudioProfileSpec {
        AudioProfileSpec {
            internal_rate_hz: 16_000,
            ingress_encoding: AudioEncoding::Mulaw8k,
            ingress_rate_hz: 8_000,
            egress_encoding: AudioEncoding::Mulaw8k,
            egress_rate_hz: 8_000,
            chunk_ms: 20,
            transport_output_encoding: AudioEncoding::Mulaw8k,
        }
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.server.port, 8080);
    }

    #[test]
    fn pipeline_referencing_a_missing_provider_fails_validation() {
        let mut settings = Settings::default();
        settings.pipelines.insert(
            "default".to_string(),
            PipelineSpec { stt: "missing-stt".to_string(), llm: "missing-llm".to_string(), tts: "missing-tts".to_string(), opts: serde_json::Value::Null },
        );
        assert!(settings.validate().is_err());
    }

    #[test]
    fn pipeline_referencing_a_provider_of_the_wrong_kind_fails_validation() {
        let mut settings = Settings::default();
        settings.providers.insert("mislabeled".to_string(), ProviderSpec::Llm { backend: "hosted".to_string(), model: "assistant-large".to_string(), opts: serde_json::Value::Null });
        settings.pipelines.insert(
            "default".to_string(),
            PipelineSpec { stt: "mislabeled".to_string(), llm: "mislabeled".to_string(), tts: "mislabeled".to_string(), opts: serde_json::Value::Null },
        );
        assert!(settings.validate().is_err());
    }

    #[test]
    fn context_naming_a_modular_role_provider_directly_fails_validation() {
        let mut settings = Settings::default();
        settings.audio_profiles.insert("telephony".to_string(), sample_profile());
        settings.providers.insert("stt-only".to_string(), ProviderSpec::Stt { url: "http://stt.example.test".to_string(), opts: serde_json::Value::Null });
        settings.contexts.insert(
            "default".to_string(),
            ContextSpec { provider: Some("stt-only".to_string()), pipeline: None, system_prompt: "be helpful".to_string(), greeting: None, audio_profile: "telephony".to_string() },
        );
        assert!(settings.validate().is_err());
    }

    #[test]
    fn context_naming_both_provider_and_pipeline_fails_validation() {
        let mut settings = Settings::default();
        settings.audio_profiles.insert("telephony".to_string(), sample_profile());
        settings.providers.insert("agent".to_string(), ProviderSpec::FullAgent { url: "wss://example.test/agent".to_string(), opts: serde_json::Value::Null });
        settings.pipelines.insert("modular".to_string(), PipelineSpec { stt: "s".to_string(), llm: "l".to_string(), tts: "t".to_string(), opts: serde_json::Value::Null });
        settings.contexts.insert(
            "default".to_string(),
            ContextSpec { provider: Some("agent".to_string()), pipeline: Some("modular".to_string()), system_prompt: "be helpful".to_string(), greeting: None, audio_profile: "telephony".to_string() },
        );
        assert!(settings.validate().is_err());
    }

    #[test]
    fn context_with_a_resolvable_provider_and_profile_is_valid() {
        let mut settings = Settings::default();
        settings.audio_profiles.insert("telephony".to_string(), sample_profile());
        settings.providers.insert("agent".to_string(), ProviderSpec::FullAgent { url: "wss://example.test/agent".to_string(), opts: serde_json::Value::Null });
        settings.contexts.insert(
            "default".to_string(),
            ContextSpec { provider: Some("agent".to_string()), pipeline: None, system_prompt: "be helpful".to_string(), greeting: Some("hello".to_string()), audio_profile: "telephony".to_string() },
        );
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn telephony_port_range_with_min_not_less_than_max_fails_validation() {
        let mut settings = Settings::default();
        settings.telephony = TelephonyConfig { rtp_port_range: RtpPortRange { min: 20_000, max: 10_000 }, transport: TransportKind::Rtp, ..settings.telephony };
        assert!(settings.validate().is_err());
    }
}
