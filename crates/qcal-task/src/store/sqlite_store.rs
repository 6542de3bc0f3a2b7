//! SQLite-based execution record store.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::Connection;

use crate::error::{CalibError, CalibResult};
use crate::record::ExecutionRecord;
use crate::store::ExecutionStore;

/// SQLite-backed store.
///
/// The version check is part of the `UPDATE` statement, so concurrent
/// writers in different processes sharing the database file never
/// overwrite each other.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Create a new SQLite store at the given path.
    pub fn new(path: impl AsRef<Path>) -> CalibResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema_sync()?;
        Ok(store)
    }

    /// Create a new in-memory SQLite store.
    pub fn in_memory() -> CalibResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema_sync()?;
        Ok(store)
    }

    fn lock(&self) -> CalibResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| CalibError::Database(e.to_string()))
    }

    fn init_schema_sync(&self) -> CalibResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                project TEXT NOT NULL,
                status TEXT NOT NULL,
                version INTEGER NOT NULL,
                data TEXT NOT NULL,
                start_at TEXT NOT NULL,
                end_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_executions_project ON executions(project);
            CREATE INDEX IF NOT EXISTS idx_executions_status ON executions(status);
            "#,
        )?;
        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for SqliteStore {
    async fn load(&self, execution_id: &str) -> CalibResult<Option<ExecutionRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT data FROM executions WHERE id = ?1")?;
        let mut rows = stmt.query(rusqlite::params![execution_id])?;

        if let Some(row) = rows.next()? {
            let data: String = row.get(0)?;
            Ok(Some(serde_json::from_str(&data)?))
        } else {
            Ok(None)
        }
    }

    async fn insert_new(&self, record: &ExecutionRecord) -> CalibResult<bool> {
        let conn = self.lock()?;
        let data = serde_json::to_string(record)?;
        let inserted = conn.execute(
            r#"
            INSERT OR IGNORE INTO executions (id, project, status, version, data, start_at, end_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            rusqlite::params![
                record.execution_id,
                record.project,
                record.status.as_str(),
                record.version as i64,
                data,
                record.start_at.to_rfc3339(),
                record.end_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(inserted == 1)
    }

    async fn replace_if_version(&self, record: &ExecutionRecord, expected_version: u64) -> CalibResult<bool> {
        let conn = self.lock()?;
        let data = serde_json::to_string(record)?;
        let updated = conn.execute(
            r#"
            UPDATE executions
            SET status = ?1, version = ?2, data = ?3, end_at = ?4
            WHERE id = ?5 AND version = ?6
            "#,
            rusqlite::params![
                record.status.as_str(),
                record.version as i64,
                data,
                record.end_at.map(|t| t.to_rfc3339()),
                record.execution_id,
                expected_version as i64,
            ],
        )?;
        Ok(updated == 1)
    }

    async fn list_ids(&self) -> CalibResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id FROM executions ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ExecutionStatus;

    #[tokio::test]
    async fn test_sqlite_store_cas() {
        let store = SqliteStore::in_memory().unwrap();
        let mut record = ExecutionRecord::new("exec-1", "demo");

        assert!(store.insert_new(&record).await.unwrap());
        assert!(!store.insert_new(&record).await.unwrap());

        record.version = 1;
        record.status = ExecutionStatus::Completed;
        assert!(store.replace_if_version(&record, 0).await.unwrap());
        assert!(!store.replace_if_version(&record, 0).await.unwrap());

        let loaded = store.load("exec-1").await.unwrap().unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.status, ExecutionStatus::Completed);
        assert!(store.load("exec-2").await.unwrap().is_none());
        assert_eq!(store.list_ids().await.unwrap(), ["exec-1"]);
    }

    #[tokio::test]
    async fn test_sqlite_store_file_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.db");
        {
            let store = SqliteStore::new(&path).unwrap();
            store.insert_new(&ExecutionRecord::new("exec-9", "demo")).await.unwrap();
        }
        let store = SqliteStore::new(&path).unwrap();
        assert!(store.load("exec-9").await.unwrap().is_some());
    }
}
