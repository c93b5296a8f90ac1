// ABOUTME: SQLite-backed key-value backend, an alternative to one-file-per-key storage.
// ABOUTME: Each write is a single upsert, so SQLite's own journaling provides atomicity.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use durastore_core::{DataError, DataResult};
use rusqlite::{Connection, OptionalExtension, params};

use crate::backend::KvBackend;

/// A single `records` table mapping keys to payload blobs.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open or create the database at `path` and ensure the schema exists.
    pub fn open(path: &Path) -> DataResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DataError::from_io(e, parent))?;
        }
        let conn = Connection::open(path).map_err(backend_err)?;
        Self::init(conn)
    }

    /// An in-memory database, mostly useful in tests.
    pub fn open_in_memory() -> DataResult<Self> {
        let conn = Connection::open_in_memory().map_err(backend_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> DataResult<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(backend_err)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )
        .map_err(backend_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> DataResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DataError::Backend("sqlite connection mutex poisoned".to_string()))
    }
}

impl KvBackend for SqliteBackend {
    fn read(&self, key: &str) -> DataResult<Option<Vec<u8>>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT value FROM records WHERE key = ?1",
            params![key],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()
        .map_err(backend_err)
    }

    fn write(&self, key: &str, bytes: &[u8]) -> DataResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO records (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
            params![key, bytes, Utc::now().to_rfc3339()],
        )
        .map_err(backend_err)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> DataResult<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute("DELETE FROM records WHERE key = ?1", params![key])
            .map_err(backend_err)?;
        Ok(changed > 0)
    }

    fn keys(&self) -> DataResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT key FROM records ORDER BY key")
            .map_err(backend_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(backend_err)?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(row.map_err(backend_err)?);
        }
        Ok(keys)
    }
}

fn backend_err(e: rusqlite::Error) -> DataError {
    DataError::Backend(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn sqlite_round_trip() {
        let backend = SqliteBackend::open_in_memory().unwrap();

        assert!(backend.read("settings").unwrap().is_none());
        backend.write("settings", br#"{"theme":"dark"}"#).unwrap();
        assert_eq!(
            backend.read("settings").unwrap().unwrap(),
            br#"{"theme":"dark"}"#
        );
    }

    #[test]
    fn sqlite_upsert_replaces_value() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend.write("settings", b"one").unwrap();
        backend.write("settings", b"two").unwrap();

        assert_eq!(backend.read("settings").unwrap().unwrap(), b"two");
        assert_eq!(backend.keys().unwrap(), vec!["settings"]);
    }

    #[test]
    fn sqlite_remove_and_keys() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend.write("b", b"2").unwrap();
        backend.write("a", b"1").unwrap();

        assert_eq!(backend.keys().unwrap(), vec!["a", "b"]);
        assert!(backend.remove("a").unwrap());
        assert!(!backend.remove("a").unwrap());
        assert_eq!(backend.keys().unwrap(), vec!["b"]);
    }

    #[test]
    fn sqlite_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Data").join("records.db");

        {
            let backend = SqliteBackend::open(&path).unwrap();
            backend.write("favorites", b"[1,2]").unwrap();
        }

        let backend = SqliteBackend::open(&path).unwrap();
        assert_eq!(backend.read("favorites").unwrap().unwrap(), b"[1,2]");
    }

    #[test]
    fn sqlite_failures_surface_as_transient_backend_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.db");
        let backend = SqliteBackend::open(&path).unwrap();

        Connection::open(&path)
            .unwrap()
            .execute_batch("DROP TABLE records;")
            .unwrap();

        let err = backend.read("settings").unwrap_err();
        assert!(matches!(err, DataError::Backend(ref msg) if msg.contains("records")), "got {err:?}");
        assert!(err.is_transient());
        assert!(matches!(
            backend.write("settings", b"{}"),
            Err(DataError::Backend(_))
        ));
    }
}
