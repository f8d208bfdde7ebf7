//! Limit exploration: drive each selected axis into its limit switch,
//! measure the travel, then recover and home.
//!
//! # Module structure
//!
//! ```text
//! explore/
//! ├── phase.rs  — Phase enum, one variant per step with its own data
//! ├── engine.rs — LimitExplorationEngine: tick-driven transitions
//! └── report.rs — measured limits and the settings lines that persist them
//! ```
//!
//! The engine never blocks. The caller invokes
//! [`LimitExplorationEngine::tick`] periodically; each tick drains the link,
//! reacts to the lines received, and issues at most one command.

pub mod engine;
pub mod phase;
pub mod report;

pub use engine::{LimitExplorationEngine, TickOutcome};
pub use phase::Phase;
pub use report::ExplorationReport;

use crate::sender::SessionError;

/// Reasons an exploration run cannot start.
#[derive(Debug, thiserror::Error)]
pub enum ExplorationError {
    #[error("no axes selected")]
    NoAxes,

    /// A program stream owns the link.
    #[error("cannot explore while a stream is active")]
    StreamActive,

    #[error("an exploration run is already in progress")]
    AlreadyRunning,

    #[error(transparent)]
    Link(#[from] SessionError),
}
