//! Shared document types.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default style name for lines created without one.
pub const DEFAULT_STYLE: &str = "Default";

// ─── Identity ───────────────────────────────────────────────────────────────

/// Stable identifier of a subtitle line.
///
/// Drawn from a monotonic per-document counter and never reused, so cache
/// keys and side-table rows stay valid when other lines are inserted,
/// deleted, or reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineId(pub u64);

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─── Lines ──────────────────────────────────────────────────────────────────

/// A single subtitle line.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub id: LineId,
    pub start_ms: i64,
    pub end_ms: i64,
    pub style: String,
    pub actor: String,
    pub text: String,
    /// Feature-tagged key/value side-table (e.g. `"stt"` → transcript).
    pub extradata: BTreeMap<String, String>,
}

impl Line {
    /// Duration in milliseconds (may be zero or negative for broken timing).
    pub fn duration_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }
}

/// Fields for a line that does not exist yet.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewLine {
    pub start_ms: i64,
    pub end_ms: i64,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub actor: String,
    #[serde(default)]
    pub text: String,
}

/// Partial update of an existing line. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LinePatch {
    #[serde(default)]
    pub start_ms: Option<i64>,
    #[serde(default)]
    pub end_ms: Option<i64>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl LinePatch {
    pub fn is_empty(&self) -> bool {
        self.start_ms.is_none()
            && self.end_ms.is_none()
            && self.style.is_none()
            && self.actor.is_none()
            && self.text.is_none()
    }
}

// ─── Commits ────────────────────────────────────────────────────────────────

/// What a commit touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitKind {
    /// Lines added or removed.
    Lines,
    /// Text, style or actor changed.
    Text,
    /// Start/end times changed.
    Timing,
    /// Only the side-table changed.
    Extradata,
}

/// Change notification broadcast after every commit.
#[derive(Debug, Clone, Serialize)]
pub struct CommitEvent {
    pub revision: u64,
    pub description: String,
    pub kind: CommitKind,
    pub at: DateTime<Utc>,
}
