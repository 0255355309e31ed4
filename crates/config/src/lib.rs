//! Configuration document (§6 "Configuration"): providers, pipelines,
//! contexts, audio profiles, tools, and telephony, loaded from YAML/TOML
//! files layered with environment variables and validated once before
//! the engine ever sees it.

pub mod document;
pub mod error;
pub mod settings;

pub use document::{
    AudioProfileSpec, ContextSpec, PipelineSpec, ProviderSpec, RtpPortRange, TelephonyConfig,
    ToolEntry, ToolSpec, TransportKind,
};
pub use error::ConfigError;
pub use settings::{
    load_settings, ObservabilityConfig, PersistenceConfig, RuntimeEnvironment, ServerConfig,
    Settings,
};
