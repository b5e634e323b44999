//! SQLite project store for subtitle lines and their side-table.
//!
//! Uses `rusqlite` in synchronous mode; the store is owned by the document,
//! which in turn lives on the owner thread, so no connection pooling is
//! needed. WAL mode keeps saves cheap while the file is being read elsewhere.

use std::collections::HashMap;

use rusqlite::{params, Connection, OptionalExtension};

use super::errors::DocumentError;
use super::types::{Line, LineId};

// ─── Constants ──────────────────────────────────────────────────────────────

/// `meta` key holding the next unassigned line id.
const NEXT_LINE_ID_KEY: &str = "next_line_id";

// ─── ProjectStore ───────────────────────────────────────────────────────────

/// Durable storage for a document: lines in order plus the per-line
/// key/value side-table.
pub struct ProjectStore {
    conn: Connection,
    path: String,
}

/// Everything [`ProjectStore::load`] reads back.
#[derive(Debug, Default)]
pub struct StoredProject {
    pub lines: Vec<Line>,
    pub next_line_id: u64,
}

impl ProjectStore {
    /// Open (or create) the project store at the given path.
    ///
    /// Pass `":memory:"` for an in-memory store (tests).
    pub fn open(path: &str) -> Result<Self, DocumentError> {
        let conn = Connection::open(path)?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let store = Self {
            conn,
            path: path.to_string(),
        };
        store.create_tables()?;
        Ok(store)
    }

    /// Path the store was opened from.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Create all required tables if they don't exist.
    fn create_tables(&self) -> Result<(), DocumentError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS lines (
                id INTEGER PRIMARY KEY,
                position INTEGER NOT NULL,
                start_ms INTEGER NOT NULL,
                end_ms INTEGER NOT NULL,
                style TEXT NOT NULL,
                actor TEXT NOT NULL DEFAULT '',
                text TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX IF NOT EXISTS idx_lines_position
                ON lines(position);

            CREATE TABLE IF NOT EXISTS extradata (
                line_id INTEGER NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (line_id, key),
                FOREIGN KEY (line_id) REFERENCES lines(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    // ─── Load ───────────────────────────────────────────────────────────

    /// Read every line (in document order) with its side-table entries.
    pub fn load(&self) -> Result<StoredProject, DocumentError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, start_ms, end_ms, style, actor, text
             FROM lines
             ORDER BY position ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(Line {
                id: LineId(row.get::<_, i64>(0)? as u64),
                start_ms: row.get(1)?,
                end_ms: row.get(2)?,
                style: row.get(3)?,
                actor: row.get(4)?,
                text: row.get(5)?,
                extradata: Default::default(),
            })
        })?;

        let mut lines = Vec::new();
        for row in rows {
            lines.push(row?);
        }

        let index: HashMap<LineId, usize> = lines
            .iter()
            .enumerate()
            .map(|(i, line)| (line.id, i))
            .collect();

        let mut stmt = self
            .conn
            .prepare("SELECT line_id, key, value FROM extradata")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                LineId(row.get::<_, i64>(0)? as u64),
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        for row in rows {
            let (line_id, key, value) = row?;
            match index.get(&line_id) {
                Some(&i) => {
                    lines[i].extradata.insert(key, value);
                }
                None => {
                    tracing::debug!(line = %line_id, key = %key, "orphaned extradata row skipped");
                }
            }
        }

        let stored_next: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![NEXT_LINE_ID_KEY],
                |row| row.get(0),
            )
            .optional()?;

        let max_id = lines.iter().map(|l| l.id.0).max().unwrap_or(0);
        let next_line_id = stored_next
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
            .max(max_id + 1);

        Ok(StoredProject {
            lines,
            next_line_id,
        })
    }

    // ─── Save ───────────────────────────────────────────────────────────

    /// Replace the stored project with the given lines in one transaction.
    pub fn save(&mut self, lines: &[Line], next_line_id: u64) -> Result<(), DocumentError> {
        let tx = self.conn.transaction()?;

        tx.execute("DELETE FROM extradata", [])?;
        tx.execute("DELETE FROM lines", [])?;

        {
            let mut insert_line = tx.prepare(
                "INSERT INTO lines (id, position, start_ms, end_ms, style, actor, text)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            let mut insert_extra = tx.prepare(
                "INSERT INTO extradata (line_id, key, value) VALUES (?1, ?2, ?3)",
            )?;

            for (position, line) in lines.iter().enumerate() {
                insert_line.execute(params![
                    line.id.0 as i64,
                    position as i64,
                    line.start_ms,
                    line.end_ms,
                    line.style,
                    line.actor,
                    line.text,
                ])?;
                for (key, value) in &line.extradata {
                    insert_extra.execute(params![line.id.0 as i64, key, value])?;
                }
            }
        }

        tx.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![NEXT_LINE_ID_KEY, next_line_id.to_string()],
        )?;

        tx.commit()?;
        Ok(())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
