//! In-memory subtitle document.
//!
//! The document is owned by the owner thread and never locked: every access
//! from other threads goes through the execution bridge. Lines are addressed
//! by [`LineId`], never by position.

use chrono::Utc;
use tokio::sync::broadcast;

use super::database::ProjectStore;
use super::errors::DocumentError;
use super::types::{CommitEvent, CommitKind, Line, LineId, LinePatch, NewLine, DEFAULT_STYLE};

/// Capacity of the commit notification channel. Slow subscribers lag
/// rather than block commits.
const COMMIT_CHANNEL_CAPACITY: usize = 64;

// ─── Document ───────────────────────────────────────────────────────────────

/// Ordered subtitle lines plus their side-table, optionally backed by a
/// [`ProjectStore`].
pub struct Document {
    lines: Vec<Line>,
    next_line_id: u64,
    revision: u64,
    store: Option<ProjectStore>,
    events: broadcast::Sender<CommitEvent>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create an empty, unsaved document.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(COMMIT_CHANNEL_CAPACITY);
        Self {
            lines: Vec::new(),
            next_line_id: 1,
            revision: 0,
            store: None,
            events,
        }
    }

    /// Load a document from its project store. Commits are written back to
    /// the same store.
    pub fn open(store: ProjectStore) -> Result<Self, DocumentError> {
        let stored = store.load()?;
        tracing::info!(
            path = %store.path(),
            lines = stored.lines.len(),
            next_line_id = stored.next_line_id,
            "project loaded"
        );
        let mut doc = Self::new();
        doc.lines = stored.lines;
        doc.next_line_id = stored.next_line_id;
        doc.store = Some(store);
        Ok(doc)
    }

    /// Path of the backing store, if any.
    pub fn store_path(&self) -> Option<&str> {
        self.store.as_ref().map(|s| s.path())
    }

    // ─── Queries ────────────────────────────────────────────────────────

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Look up a line by id.
    pub fn line(&self, id: LineId) -> Option<&Line> {
        self.lines.iter().find(|l| l.id == id)
    }

    /// Current position of a line in document order.
    pub fn position(&self, id: LineId) -> Option<usize> {
        self.lines.iter().position(|l| l.id == id)
    }

    /// Ids of up to `count` lines following `id` in document order.
    pub fn ids_after(&self, id: LineId, count: usize) -> Vec<LineId> {
        match self.position(id) {
            Some(pos) => self.lines[pos + 1..]
                .iter()
                .take(count)
                .map(|l| l.id)
                .collect(),
            None => Vec::new(),
        }
    }

    // ─── Mutations ──────────────────────────────────────────────────────

    /// Insert a new line at `position` (end of document when `None`) and
    /// return its freshly assigned id.
    pub fn insert_line(
        &mut self,
        position: Option<usize>,
        new: NewLine,
    ) -> Result<LineId, DocumentError> {
        if new.end_ms < new.start_ms {
            return Err(DocumentError::InvalidRange {
                start_ms: new.start_ms,
                end_ms: new.end_ms,
            });
        }
        let at = position.unwrap_or(self.lines.len());
        if at > self.lines.len() {
            return Err(DocumentError::PositionOutOfRange {
                position: at,
                len: self.lines.len(),
            });
        }

        let id = LineId(self.next_line_id);
        self.next_line_id += 1;

        self.lines.insert(
            at,
            Line {
                id,
                start_ms: new.start_ms,
                end_ms: new.end_ms,
                style: new.style.unwrap_or_else(|| DEFAULT_STYLE.to_string()),
                actor: new.actor,
                text: new.text,
                extradata: Default::default(),
            },
        );
        Ok(id)
    }

    /// Apply a partial update to a line.
    pub fn update_line(&mut self, id: LineId, patch: LinePatch) -> Result<&Line, DocumentError> {
        let line = self
            .lines
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or(DocumentError::LineNotFound { id })?;

        let start_ms = patch.start_ms.unwrap_or(line.start_ms);
        let end_ms = patch.end_ms.unwrap_or(line.end_ms);
        if end_ms < start_ms {
            return Err(DocumentError::InvalidRange { start_ms, end_ms });
        }

        line.start_ms = start_ms;
        line.end_ms = end_ms;
        if let Some(style) = patch.style {
            line.style = style;
        }
        if let Some(actor) = patch.actor {
            line.actor = actor;
        }
        if let Some(text) = patch.text {
            line.text = text;
        }
        Ok(line)
    }

    /// Remove a line. Its id is retired, not recycled.
    pub fn remove_line(&mut self, id: LineId) -> Result<Line, DocumentError> {
        let pos = self
            .position(id)
            .ok_or(DocumentError::LineNotFound { id })?;
        Ok(self.lines.remove(pos))
    }

    // ─── Side-table ─────────────────────────────────────────────────────

    /// Store `value` under `key` for a line, replacing any previous value
    /// for the same key.
    pub fn set_extradata(&mut self, id: LineId, key: &str, value: &str) -> Result<(), DocumentError> {
        let line = self
            .lines
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or(DocumentError::LineNotFound { id })?;
        line.extradata.insert(key.to_string(), value.to_string());
        Ok(())
    }

    pub fn extradata(&self, id: LineId, key: &str) -> Option<&str> {
        self.line(id)
            .and_then(|l| l.extradata.get(key))
            .map(String::as_str)
    }

    /// All non-empty values stored under `key`, in document order.
    pub fn extradata_entries(&self, key: &str) -> Vec<(LineId, String)> {
        self.lines
            .iter()
            .filter_map(|l| {
                l.extradata
                    .get(key)
                    .filter(|v| !v.is_empty())
                    .map(|v| (l.id, v.clone()))
            })
            .collect()
    }

    // ─── Commits ────────────────────────────────────────────────────────

    /// Subscribe to commit notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<CommitEvent> {
        self.events.subscribe()
    }

    /// Record a change: bump the revision, write through to the store (if
    /// any), and notify subscribers. Returns the new revision.
    ///
    /// The revision and notification happen even if the store write fails;
    /// the in-memory document stays authoritative and the next commit retries.
    pub fn commit(&mut self, description: &str, kind: CommitKind) -> Result<u64, DocumentError> {
        self.revision += 1;

        let event = CommitEvent {
            revision: self.revision,
            description: description.to_string(),
            kind,
            at: Utc::now(),
        };
        tracing::debug!(
            revision = event.revision,
            kind = ?kind,
            description,
            "document commit"
        );
        let _ = self.events.send(event);

        self.save()?;
        Ok(self.revision)
    }

    /// Write the whole document to its store. No-op for unsaved documents.
    pub fn save(&mut self) -> Result<(), DocumentError> {
        if let Some(store) = self.store.as_mut() {
            store.save(&self.lines, self.next_line_id)?;
        }
        Ok(())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
