//! Error types for configuration loading and filter handling.

use thiserror::Error;

/// Errors raised while loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The environment could not be parsed into a configuration.
    #[error("parse env: {0}")]
    Parse(#[from] figment::Error),

    /// A value parsed but is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Creates a new out-of-range error.
    #[must_use]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Errors raised while parsing filter lines or accessing the store.
#[derive(Debug, Error)]
pub enum FilterError {
    /// The line contained no key-value pairs.
    #[error("empty filter")]
    Empty,

    /// A `%` escape was not followed by two hex digits.
    #[error("invalid percent escape in {0:?}")]
    InvalidEscape(String),

    /// A component did not decode to valid UTF-8.
    #[error("filter is not valid utf-8")]
    Utf8(#[from] std::str::Utf8Error),

    /// Internal lock poisoned.
    #[error("internal lock poisoned")]
    LockPoisoned,
}
