//! In-memory execution record store.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;

use crate::error::CalibResult;
use crate::record::ExecutionRecord;
use crate::store::ExecutionStore;

/// Process-local store, for tests and single-process sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<FxHashMap<String, ExecutionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn load(&self, execution_id: &str) -> CalibResult<Option<ExecutionRecord>> {
        Ok(self.records.read().await.get(execution_id).cloned())
    }

    async fn insert_new(&self, record: &ExecutionRecord) -> CalibResult<bool> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.execution_id) {
            return Ok(false);
        }
        records.insert(record.execution_id.clone(), record.clone());
        Ok(true)
    }

    async fn replace_if_version(&self, record: &ExecutionRecord, expected_version: u64) -> CalibResult<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(&record.execution_id) {
            Some(stored) if stored.version == expected_version => {
                *stored = record.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_ids(&self) -> CalibResult<Vec<String>> {
        let mut ids: Vec<String> = self.records.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
