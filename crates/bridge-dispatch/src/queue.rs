//! Durable, append-only outbound command queue, backed by SQLite with WAL
//! journaling — the storage choice the legacy bridge's `OutboundDB` made,
//! kept rather than reinvented.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRecord {
    pub id: i64,
    pub cmd: String,
    pub created_at: i64,
    pub sent_at: Option<i64>,
}

pub struct OutboundQueue {
    conn: Mutex<Connection>,
}

impl OutboundQueue {
    /// Open (creating if necessary) the queue database at `path` and
    /// ensure the schema exists.
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cmd TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                sent_at INTEGER
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory queue, for tests.
    pub fn open_in_memory() -> rusqlite::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cmd TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                sent_at INTEGER
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Append `cmd_text`, returning its assigned row id.
    pub fn enqueue(&self, cmd_text: &str, created_at: i64) -> rusqlite::Result<i64> {
        let conn = self.conn.lock().expect("queue connection mutex poisoned");
        conn.execute(
            "INSERT INTO queue (cmd, created_at, sent_at) VALUES (?1, ?2, NULL)",
            params![cmd_text, created_at],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, cmd = cmd_text, "enqueued command");
        Ok(id)
    }

    /// Up to `limit` unsent rows, ascending by id.
    pub fn get_unsent(&self, limit: u32) -> rusqlite::Result<Vec<QueueRecord>> {
        let conn = self.conn.lock().expect("queue connection mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, cmd, created_at, sent_at FROM queue
             WHERE sent_at IS NULL ORDER BY id ASC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(QueueRecord {
                    id: row.get(0)?,
                    cmd: row.get(1)?,
                    created_at: row.get(2)?,
                    sent_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Mark `id` sent at `sent_at`. No-op if `id` doesn't exist.
    pub fn mark_sent(&self, id: i64, sent_at: i64) -> rusqlite::Result<()> {
        let conn = self.conn.lock().expect("queue connection mutex poisoned");
        conn.execute(
            "UPDATE queue SET sent_at = ?1 WHERE id = ?2",
            params![sent_at, id],
        )?;
        debug!(id, "marked command sent");
        Ok(())
    }

    /// Look up a single record by id, for tests/diagnostics.
    pub fn get(&self, id: i64) -> rusqlite::Result<Option<QueueRecord>> {
        let conn = self.conn.lock().expect("queue connection mutex poisoned");
        conn.query_row(
            "SELECT id, cmd, created_at, sent_at FROM queue WHERE id = ?1",
            params![id],
            |row| {
                Ok(QueueRecord {
                    id: row.get(0)?,
                    cmd: row.get(1)?,
                    created_at: row.get(2)?,
                    sent_at: row.get(3)?,
                })
            },
        )
        .optional()
    }
}
