//! Language-model backend abstraction (§4.3, §4.4, §4.8): the
//! `LlmBackend` trait every concrete backend implements, a local
//! Ollama-compatible backend, a hosted native-tool-calling backend, and
//! the text-injection fallback for backends without native tool support.

pub mod backend;
pub mod hosted_backend;
pub mod local_backend;
pub mod prompt;

pub use backend::{FinishReason, GenerationResult, LlmBackend, LlmConfig, ToolAwareGeneration};
pub use hosted_backend::{HostedBackend, HostedBackendConfig, HostedResponse};
pub use local_backend::LocalBackend;
pub use prompt::{parse_tool_call, render_tool_injection, ParsedToolCall};
