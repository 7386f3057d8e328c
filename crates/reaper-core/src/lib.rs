//! # reaper-core
//!
//! Shared building blocks for the resource reaper: the configuration loaded
//! from `RYUK_`-prefixed environment variables, the canonical filter model,
//! and the concurrent filter store written by client sessions and read by the
//! pruner.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod filter;

pub use config::Config;
pub use error::{ConfigError, FilterError};
pub use filter::{Filter, FilterStore};

/// Base label namespace used by the test harnesses this reaper serves.
pub const LABEL_BASE: &str = "org.testcontainers";

/// Label identifying reaper containers. Containers carrying this label set to
/// `"true"` are never pruned, regardless of the filters.
pub const REAPER_LABEL: &str = "org.testcontainers.ryuk";
