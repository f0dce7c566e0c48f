//! Per-user durable message log.

use crate::types::{Message, Origin};
use parley_common::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Append-only `SQLite` log of one user's messages.
///
/// Database path: `{data_dir}/messages/{user_id}.db`. Insertion order is
/// rowid order. While open, a log belongs to exactly one cache entry and is
/// read or appended only under its user's message lock.
pub struct MessageLog {
    conn: Mutex<Connection>,
}

impl MessageLog {
    /// Open the log database at the given path, creating it if needed.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS messages (
                id       TEXT PRIMARY KEY,
                origin   TEXT NOT NULL,
                content  TEXT NOT NULL,
                time     TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::Internal(format!("Lock error: {e}")))
    }

    /// Append a message. Message ids are unique within the log; appending a
    /// duplicate id is a storage error.
    pub fn append(&self, message: &Message) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO messages (id, origin, content, time) VALUES (?1, ?2, ?3, ?4)",
            params![
                message.id,
                message.origin.as_str(),
                message.content,
                message.time
            ],
        )?;
        Ok(())
    }

    /// All message ids, in insertion order.
    pub fn ids(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id FROM messages ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| row.get(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    /// All messages, in insertion order.
    pub fn messages(&self) -> Result<Vec<Message>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, origin, content, time FROM messages ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| {
            Ok(Message {
                id: row.get(0)?,
                origin: Origin::parse(&row.get::<_, String>(1)?),
                content: row.get(2)?,
                time: row.get(3)?,
            })
        })?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn get(&self, message_id: &str) -> Result<Option<Message>> {
        let conn = self.conn()?;
        let message = conn
            .query_row(
                "SELECT id, origin, content, time FROM messages WHERE id = ?1",
                params![message_id],
                |row| {
                    Ok(Message {
                        id: row.get(0)?,
                        origin: Origin::parse(&row.get::<_, String>(1)?),
                        content: row.get(2)?,
                        time: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(message)
    }

    pub fn contains(&self, message_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM messages WHERE id = ?1",
                params![message_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }
}
