//! # reaper-server
//!
//! The reaper's lifecycle core: a TCP session manager that ingests filters
//! from test-harness clients, a controller that decides when cleanup may
//! start, and a pruner that removes the matching runtime resources with
//! bounded retries.
//!
//! ```text
//! client socket ─▶ SessionManager ─▶ FilterStore ─▶ Pruner ─▶ RuntimeClient
//!                        │                             ▲
//!                        └────▶ Controller ────────────┘
//! ```

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;

mod controller;
mod pruner;
mod reaper;
mod session;
mod state;

pub use error::{AggregateError, ReaperError, Result};
pub use reaper::Reaper;
