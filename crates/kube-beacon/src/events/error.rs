//! Event watch error types.

use thiserror::Error;

const HTTP_GONE: u16 = 410;

/// Errors that end one watch connection. The watch loop reconnects after
/// every one of them.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("event watch failed: {0}")]
    Api(#[from] kube::Error),

    /// Error notification sent by the API server inside the stream.
    #[error("event watch closed by server ({code}): {message}")]
    Status { code: u16, message: String },
}

impl WatchError {
    /// The requested resource version is no longer retained.
    pub fn is_gone(&self) -> bool {
        match self {
            WatchError::Status { code, .. } => *code == HTTP_GONE,
            WatchError::Api(kube::Error::Api(response)) => response.code == HTTP_GONE,
            WatchError::Api(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, WatchError>;
