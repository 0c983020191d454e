//! Backend delivery errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    /// HTTP request failed
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Backend answered with a non-success status
    #[error("backend error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid backend url '{0}'")]
    InvalidUrl(String),
}

pub type Result<T> = std::result::Result<T, BackendError>;
