//! Server-level error taxonomy (§7): the call lifecycle controller's own
//! failure modes layered on top of `voxrelay_core::Error`, which already
//! covers provider/tool/transport errors raised below it.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("telephony control channel unreachable: {0}")]
    AriUnreachable(String),

    #[error(transparent)]
    Core(#[from] voxrelay_core::Error),

    #[error(transparent)]
    Config(#[from] voxrelay_config::ConfigError),

    #[error(transparent)]
    Persistence(#[from] voxrelay_persistence::PersistenceError),

    #[error("admission rejected: {0}")]
    AdmissionRejected(String),
}

impl From<&ServerError> for axum::http::StatusCode {
    fn from(err: &ServerError) -> Self {
        match err {
            ServerError::ConfigInvalid(_) | ServerError::Config(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::AriUnreachable(_) => axum::http::StatusCode::SERVICE_UNAVAILABLE,
            ServerError::AdmissionRejected(_) => axum::http::StatusCode::TOO_MANY_REQUESTS,
            ServerError::Core(_) | ServerError::Persistence(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
