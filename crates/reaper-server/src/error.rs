//! Reaper error types.
//!
//! Cleanup is best effort: a failure within one resource kind never aborts
//! the others, so errors are collected and joined rather than returned at the
//! first occurrence. Only startup failures and the first-connection timeout
//! are fatal to the process.

use reaper_core::FilterError;
use reaper_runtime::{ResourceKind, RuntimeError};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for reaper operations.
pub type Result<T> = std::result::Result<T, ReaperError>;

/// Errors produced while running the reaper.
#[derive(Debug, Error)]
pub enum ReaperError {
    /// No client connected within the configured window.
    #[error("timed out waiting for first connection after {0:?}")]
    FirstConnection(Duration),

    /// The runtime client could not be created or pinged.
    #[error("client: {0}")]
    Client(#[from] RuntimeError),

    /// The TCP listener could not be bound.
    #[error("listen: {0}")]
    Listen(#[from] std::io::Error),

    /// The filter store was unusable.
    #[error("filters: {0}")]
    Filters(#[from] FilterError),

    /// A matching resource was created after the prune began, implying a
    /// possibly still-connecting client.
    #[error("{kind} {id}: changes detected")]
    ChangesDetected {
        /// Kind of the late resource.
        kind: ResourceKind,
        /// Identifier of the late resource.
        id: String,
    },

    /// Listing one resource kind failed.
    #[error("{kind} list: {source}")]
    List {
        /// Kind whose listing failed.
        kind: ResourceKind,
        /// The underlying runtime failure.
        #[source]
        source: RuntimeError,
    },

    /// Some resources could not be removed within the retry budget.
    #[error("{kind} left {count} items")]
    ResourcesLeft {
        /// Kind with leftovers.
        kind: ResourceKind,
        /// How many identifiers remained.
        count: usize,
    },

    /// Several failures joined from one best-effort pass.
    #[error(transparent)]
    Aggregate(AggregateError),
}

impl ReaperError {
    /// Whether this error should fail the process. Everything else is the
    /// report of an incomplete best-effort cleanup and exits cleanly.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::FirstConnection(_) | Self::Client(_) | Self::Listen(_) | Self::Filters(_)
        )
    }

    /// Whether this error reports a resource created after the prune began.
    #[must_use]
    pub const fn is_changes_detected(&self) -> bool {
        matches!(self, Self::ChangesDetected { .. })
    }

    /// Joins a batch of errors into none, the single error, or an aggregate.
    #[must_use]
    pub fn join(mut errors: Vec<Self>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Aggregate(AggregateError(errors))),
        }
    }
}

/// A collection of errors from one best-effort pass.
#[derive(Debug)]
pub struct AggregateError(Vec<ReaperError>);

impl AggregateError {
    /// The joined errors.
    #[must_use]
    pub fn errors(&self) -> &[ReaperError] {
        &self.0
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, err) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_flattens_small_batches() {
        assert!(ReaperError::join(Vec::new()).is_none());

        let single = ReaperError::join(vec![ReaperError::ResourcesLeft {
            kind: ResourceKind::Container,
            count: 1,
        }]);
        assert_eq!(
            single.map(|err| err.to_string()),
            Some("container left 1 items".to_owned())
        );
    }

    #[test]
    fn aggregate_joins_messages() {
        let err = ReaperError::join(vec![
            ReaperError::ResourcesLeft {
                kind: ResourceKind::Container,
                count: 2,
            },
            ReaperError::ResourcesLeft {
                kind: ResourceKind::Volume,
                count: 1,
            },
        ]);
        assert_eq!(
            err.map(|err| err.to_string()),
            Some("container left 2 items; volume left 1 items".to_owned())
        );
    }

    #[test]
    fn fatality_is_limited_to_startup_and_first_connection() {
        assert!(ReaperError::FirstConnection(Duration::from_secs(60)).is_fatal());
        assert!(!ReaperError::ResourcesLeft {
            kind: ResourceKind::Image,
            count: 3,
        }
        .is_fatal());
        assert!(!ReaperError::ChangesDetected {
            kind: ResourceKind::Container,
            id: "abc".into(),
        }
        .is_fatal());
    }
}
