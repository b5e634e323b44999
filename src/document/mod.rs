//! Document model: the subtitle lines the bridge automates.
//!
//! Submodules:
//! - `types`: `LineId`, `Line`, patches and commit events
//! - `model`: the owner-thread `Document`
//! - `database`: SQLite project store holding lines and the per-line side-table
//! - `errors`: document error types

pub mod database;
pub mod errors;
pub mod model;
pub mod types;

// Re-exports for convenience
pub use database::ProjectStore;
pub use errors::DocumentError;
pub use model::Document;
pub use types::{CommitEvent, CommitKind, Line, LineId, LinePatch, NewLine};
