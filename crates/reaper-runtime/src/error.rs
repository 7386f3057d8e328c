//! Error types for runtime operations.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors that can occur when talking to the container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The resource does not exist. The pruner treats this as already
    /// removed, so it must stay distinguishable from other failures.
    #[error("not found: {0}")]
    NotFound(String),

    /// The call exceeded the configured request timeout.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The runtime API reported a failure.
    #[error("api: {0}")]
    Api(#[source] bollard::errors::Error),

    /// Any other client failure.
    #[error("{0}")]
    Other(String),
}

impl RuntimeError {
    /// Creates a new not found error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// Creates a new timeout error.
    #[must_use]
    pub fn timeout(what: impl Into<String>) -> Self {
        Self::Timeout(what.into())
    }

    /// Creates a new generic client error.
    #[must_use]
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Returns true if this is a not found error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true if this is a timeout error.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
