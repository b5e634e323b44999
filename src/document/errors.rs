//! Document error types.

use thiserror::Error;

use super::types::LineId;

/// Errors raised by the document model and its project store.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// SQLite operation failed.
    #[error("database error: {reason}")]
    DatabaseError { reason: String },

    /// No line with this id exists (it may have been deleted).
    #[error("line not found: {id}")]
    LineNotFound { id: LineId },

    /// End time precedes start time.
    #[error("invalid time range: {start_ms}ms..{end_ms}ms")]
    InvalidRange { start_ms: i64, end_ms: i64 },

    /// Insert position past the end of the document.
    #[error("position {position} out of range (document has {len} lines)")]
    PositionOutOfRange { position: usize, len: usize },
}

impl From<rusqlite::Error> for DocumentError {
    fn from(e: rusqlite::Error) -> Self {
        DocumentError::DatabaseError {
            reason: e.to_string(),
        }
    }
}
