//! Error taxonomy for the call-record writer.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PersistenceError>;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to serialize call record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write call record to {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("background write task panicked: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}
