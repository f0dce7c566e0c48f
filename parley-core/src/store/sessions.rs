//! Durable engine-session map.

use crate::types::SessionSnapshot;
use parley_common::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// `SQLite`-backed map from user id to persisted engine session snapshot.
///
/// Database path: `{data_dir}/sessions.db`. Holds the snapshot of every
/// user whose session is not currently live in the engine; the copy here is
/// refreshed after each engine exchange and at eviction.
pub struct SessionStore {
    conn: Mutex<Connection>,
}

impl SessionStore {
    /// Open the session database at the given path, creating it if needed.
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
            "CREATE TABLE IF NOT EXISTS sessions (
                user_id   TEXT PRIMARY KEY,
                snapshot  BLOB NOT NULL
            );",
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::Internal(format!("Lock error: {e}")))
    }

    pub fn get(&self, user_id: &str) -> Result<Option<SessionSnapshot>> {
        let conn = self.conn()?;
        let snapshot = conn
            .query_row(
                "SELECT snapshot FROM sessions WHERE user_id = ?1",
                params![user_id],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(snapshot.map(SessionSnapshot::from))
    }

    /// Write (or overwrite) a user's persisted snapshot.
    pub fn put(&self, user_id: &str, snapshot: &SessionSnapshot) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO sessions (user_id, snapshot) VALUES (?1, ?2)",
            params![user_id, snapshot.as_bytes()],
        )?;
        Ok(())
    }

    /// Checkpoint the WAL into the main database file.
    pub fn flush(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, SessionStore) {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::open(&tmp.path().join("sessions.db")).unwrap();
        (tmp, store)
    }

    #[test]
    fn test_put_and_get() {
        let (_tmp, store) = temp_store();
        let snapshot = SessionSnapshot::from(vec![1, 2, 3]);

        store.put("u1", &snapshot).unwrap();
        assert_eq!(store.get("u1").unwrap().unwrap(), snapshot);
    }

    #[test]
    fn test_get_missing_returns_none() {
        let (_tmp, store) = temp_store();
        assert!(store.get("nobody").unwrap().is_none());
    }

    #[test]
    fn test_put_overwrites() {
        let (_tmp, store) = temp_store();
        store.put("u1", &SessionSnapshot::from(vec![1])).unwrap();
        store.put("u1", &SessionSnapshot::from(vec![2, 2])).unwrap();

        assert_eq!(
            store.get("u1").unwrap().unwrap(),
            SessionSnapshot::from(vec![2, 2])
        );
    }

    #[test]
    fn test_empty_snapshot_roundtrip() {
        let (_tmp, store) = temp_store();
        store.put("u1", &SessionSnapshot::default()).unwrap();

        let loaded = store.get("u1").unwrap().unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_user_isolation() {
        let (_tmp, store) = temp_store();
        store.put("u1", &SessionSnapshot::from(vec![1])).unwrap();
        store.put("u2", &SessionSnapshot::from(vec![2])).unwrap();

        assert_eq!(
            store.get("u1").unwrap().unwrap(),
            SessionSnapshot::from(vec![1])
        );
        assert_eq!(
            store.get("u2").unwrap().unwrap(),
            SessionSnapshot::from(vec![2])
        );
    }

    #[test]
    fn test_persistence() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("sessions.db");

        {
            let store = SessionStore::open(&db_path).unwrap();
            store.put("u1", &SessionSnapshot::from(vec![9, 9])).unwrap();
        }

        {
            let store = SessionStore::open(&db_path).unwrap();
            assert_eq!(
                store.get("u1").unwrap().unwrap(),
                SessionSnapshot::from(vec![9, 9])
            );
        }
    }
}
