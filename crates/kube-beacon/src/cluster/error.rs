//! Cluster API error types.

use thiserror::Error;

/// Errors returned by [`ClusterApi`](super::ClusterApi) lookups.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The object does not exist (or no longer exists).
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    /// Any other API server or transport failure.
    #[error("cluster API error: {0}")]
    Api(#[from] kube::Error),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }
}

/// Result type for cluster lookups.
pub type Result<T> = std::result::Result<T, ClusterError>;
