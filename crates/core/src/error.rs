//! Error taxonomy shared across the orchestration engine.
//!
//! Mirrors the categories a per-call error can fall into (see the design
//! doc's error handling section): configuration problems are fatal at
//! load/reload boundaries, transport and provider problems are scoped to a
//! single call, and invariant violations are logged and force the call to
//! drain rather than aborting the process.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("provider error ({kind}, retryable={retryable}): {detail}")]
    Provider {
        kind: String,
        detail: String,
        retryable: bool,
    },

    #[error("tool '{0}' timed out")]
    ToolTimeout(String),

    #[error("tool '{tool}' received malformed arguments: {detail}")]
    ToolMalformed { tool: String, detail: String },

    #[error("guardrail rejected tool call '{tool}': {reason}")]
    GuardrailReject { tool: String, reason: String },

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn provider_transient(detail: impl Into<String>) -> Self {
        Error::Provider {
            kind: "transient".into(),
            detail: detail.into(),
            retryable: true,
        }
    }

    pub fn provider_fatal(detail: impl Into<String>) -> Self {
        Error::Provider {
            kind: "fatal".into(),
            detail: detail.into(),
            retryable: false,
        }
    }

    /// Whether the per-call error is recoverable without tearing down the session.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Provider { retryable: true, .. })
    }
}
