//! Persistence layer for execution records.
//!
//! Stores only need a compare-and-swap on the record version; the
//! read-mutate-retry loop lives in
//! [`ExecutionRecordManager`](crate::manager::ExecutionRecordManager).

mod json_store;
mod memory;
mod sqlite_store;

pub use json_store::JsonStore;
pub use memory::MemoryStore;
pub use sqlite_store::SqliteStore;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{CalibConfig, StoreKind};
use crate::error::CalibResult;
use crate::record::ExecutionRecord;

/// Trait for execution record storage.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Load a record.
    async fn load(&self, execution_id: &str) -> CalibResult<Option<ExecutionRecord>>;

    /// Insert a record that must not exist yet.
    ///
    /// Returns `false` if a record with the same ID is already stored.
    async fn insert_new(&self, record: &ExecutionRecord) -> CalibResult<bool>;

    /// Replace the stored record only if its version still equals `expected_version`.
    ///
    /// Returns `false` when another writer got there first.
    async fn replace_if_version(&self, record: &ExecutionRecord, expected_version: u64) -> CalibResult<bool>;

    /// IDs of every stored record, sorted.
    async fn list_ids(&self) -> CalibResult<Vec<String>>;
}

/// Open the store selected in the configuration.
pub async fn open_store(config: &CalibConfig) -> CalibResult<Arc<dyn ExecutionStore>> {
    let store: Arc<dyn ExecutionStore> = match config.store {
        StoreKind::Memory => Arc::new(MemoryStore::new()),
        StoreKind::Json => Arc::new(JsonStore::new(config.state_dir.join("executions")).await?),
        StoreKind::Sqlite => {
            tokio::fs::create_dir_all(&config.state_dir).await?;
            Arc::new(SqliteStore::new(config.state_dir.join("executions.db"))?)
        }
    };
    tracing::debug!(store = ?config.store, state_dir = %config.state_dir.display(), "Opened execution store");
    Ok(store)
}
