use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::{Backend, StoreError, migrations};

/// Durable backing store: one `kv` table, one row per key.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        // WAL so a reader never blocks on the writer
        conn.pragma_update(None, "journal_mode", "WAL")?;

        migrations::run(&conn)?;

        info!("Status store opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Backend(format!("DB lock poisoned: {}", e)))?;
        f(&conn)
    }
}

impl Backend for SqliteBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_conn(|conn| {
            let value = conn
                .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
                .optional()?;
            Ok(value)
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
                (key, value),
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::StatusStore;
    use beacon_types::status::{PresenceState, StatusRecord};

    #[test]
    fn upsert_keeps_single_row() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend.set("k", "a").unwrap();
        backend.set("k", "b").unwrap();
        assert_eq!(backend.get("k").unwrap().as_deref(), Some("b"));

        let rows: i64 = backend
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM kv", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn status_store_over_sqlite() {
        let store = StatusStore::new(Arc::new(SqliteBackend::open_in_memory().unwrap()));
        assert_eq!(store.get().await, StatusRecord::default());

        let record = StatusRecord::new(PresenceState::DoNotDisturb);
        store.set(&record).await;
        assert_eq!(store.get().await, record);
    }
}
