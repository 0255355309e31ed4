//! Provider implementations (§4.3, §4.4, §4.5): the three provider
//! shapes (modular pipeline, full-agent duplex, local multi-capability)
//! and the STT/TTS adapters the modular pipeline composes.

pub mod full_agent;
pub mod local_provider;
pub mod orchestrator;
pub mod stt;
pub mod tts;

pub use full_agent::FullAgentProvider;
pub use local_provider::{LocalMode, LocalProvider};
pub use orchestrator::{ModularPipelineProvider, PipelineState};
pub use stt::{HttpSttAdapter, HttpSttConfig, SttAdapter, Transcript};
pub use tts::{HttpTtsAdapter, HttpTtsConfig, SynthesizedAudio, TtsAdapter};
