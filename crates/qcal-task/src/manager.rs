//! Optimistic-locked updates of execution records.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::RetryConfig;
use crate::error::{CalibError, CalibResult};
use crate::record::{ExecutionRecord, StatusPolicy};
use crate::store::ExecutionStore;
use crate::task::Task;

/// Single entry point for mutating execution records.
///
/// Every write is a read-mutate-compare-and-swap cycle. When another writer
/// advanced the version in between, the cycle is retried on the fresh record
/// with exponential backoff, so concurrent workers never lose updates.
#[derive(Clone)]
pub struct ExecutionRecordManager {
    store: Arc<dyn ExecutionStore>,
    retry: RetryConfig,
}

impl ExecutionRecordManager {
    pub fn new(store: Arc<dyn ExecutionStore>, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    /// Read, mutate and write back a record, retrying on version conflicts.
    ///
    /// If the record does not exist and `initial` is given, it is created
    /// from `initial` with the mutation applied. The stored version advances
    /// by exactly one per successful call. `mutate` may run several times
    /// and must only depend on the record it is given.
    pub async fn update_with_optimistic_lock<F>(
        &self,
        execution_id: &str,
        mut mutate: F,
        initial: Option<ExecutionRecord>,
    ) -> CalibResult<ExecutionRecord>
    where
        F: FnMut(&mut ExecutionRecord) -> CalibResult<()> + Send,
    {
        for attempt in 1..=self.retry.max_attempts {
            let backoff = self.retry.backoff(attempt);
            if !backoff.is_zero() {
                tokio::time::sleep(backoff).await;
            }

            match self.store.load(execution_id).await? {
                Some(current) => {
                    if current.status.is_terminal() {
                        return Err(CalibError::ExecutionTerminal(execution_id.to_string()));
                    }
                    let expected = current.version;
                    let mut next = current;
                    mutate(&mut next)?;
                    next.version = expected + 1;
                    if self.store.replace_if_version(&next, expected).await? {
                        return Ok(next);
                    }
                    debug!(
                        execution_id,
                        attempt,
                        expected,
                        "Execution record changed concurrently, retrying"
                    );
                }
                None => {
                    let Some(initial) = &initial else {
                        return Err(CalibError::ExecutionNotFound(execution_id.to_string()));
                    };
                    let mut next = initial.clone();
                    next.execution_id = execution_id.to_string();
                    next.version = 0;
                    mutate(&mut next)?;
                    next.version = 1;
                    if self.store.insert_new(&next).await? {
                        return Ok(next);
                    }
                    debug!(execution_id, attempt, "Execution record created concurrently, retrying");
                }
            }
        }

        warn!(
            execution_id,
            attempts = self.retry.max_attempts,
            "Optimistic lock retries exhausted"
        );
        Err(CalibError::RetriesExhausted {
            execution_id: execution_id.to_string(),
            attempts: self.retry.max_attempts,
        })
    }

    /// Plain read.
    pub async fn find_by_id(&self, execution_id: &str) -> CalibResult<Option<ExecutionRecord>> {
        self.store.load(execution_id).await
    }

    /// Read a record that must exist.
    pub async fn get(&self, execution_id: &str) -> CalibResult<ExecutionRecord> {
        self.find_by_id(execution_id)
            .await?
            .ok_or_else(|| CalibError::ExecutionNotFound(execution_id.to_string()))
    }

    /// Store a new record at version 0.
    pub async fn create(&self, record: ExecutionRecord) -> CalibResult<ExecutionRecord> {
        let mut record = record;
        record.version = 0;
        if !self.store.insert_new(&record).await? {
            return Err(CalibError::Config(format!(
                "execution {} already exists",
                record.execution_id
            )));
        }
        info!(execution_id = %record.execution_id, project = %record.project, "Created execution record");
        Ok(record)
    }

    /// Fold a task's final state into the record.
    pub async fn apply_task_result(&self, execution_id: &str, task: &Task) -> CalibResult<ExecutionRecord> {
        self.update_with_optimistic_lock(
            execution_id,
            |record| {
                record.apply_task(task);
                Ok(())
            },
            None,
        )
        .await
    }

    /// Move the record to its terminal status according to `policy`.
    pub async fn finalize(&self, execution_id: &str, policy: StatusPolicy) -> CalibResult<ExecutionRecord> {
        let record = self
            .update_with_optimistic_lock(
                execution_id,
                |record| {
                    let status = policy.terminal_status(record.task_results.values());
                    record.finish(status)
                },
                None,
            )
            .await?;
        info!(
            execution_id,
            status = %record.status,
            tasks = record.task_results.len(),
            elapsed = record.elapsed_time.unwrap_or_default(),
            "Finalized execution record"
        );
        Ok(record)
    }

    /// IDs of all stored records.
    pub async fn list_ids(&self) -> CalibResult<Vec<String>> {
        self.store.list_ids().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ExecutionStatus;
    use crate::store::MemoryStore;
    use crate::task::{OutputParameter, TaskStatus, TaskType};

    fn manager() -> ExecutionRecordManager {
        ExecutionRecordManager::new(Arc::new(MemoryStore::new()), RetryConfig::default())
    }

    #[tokio::test]
    async fn test_update_increments_version() {
        let manager = manager();
        manager.create(ExecutionRecord::new("exec-1", "demo")).await.unwrap();

        let record = manager
            .update_with_optimistic_lock(
                "exec-1",
                |r| {
                    r.note = "first".into();
                    Ok(())
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(manager.get("exec-1").await.unwrap().note, "first");
    }

    #[tokio::test]
    async fn test_missing_record_without_initial() {
        let err = manager()
            .update_with_optimistic_lock("nope", |_| Ok(()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CalibError::ExecutionNotFound(_)));
    }

    #[tokio::test]
    async fn test_initial_creates_at_version_one() {
        let manager = manager();
        let record = manager
            .update_with_optimistic_lock(
                "exec-2",
                |r| {
                    r.tags.push("created".into());
                    Ok(())
                },
                Some(ExecutionRecord::new("ignored", "demo")),
            )
            .await
            .unwrap();
        assert_eq!(record.execution_id, "exec-2");
        assert_eq!(record.version, 1);
        assert_eq!(record.tags, ["created"]);
    }

    #[tokio::test]
    async fn test_mutation_error_is_not_retried() {
        let manager = manager();
        manager.create(ExecutionRecord::new("exec-1", "demo")).await.unwrap();
        let mut calls = 0;
        let err = manager
            .update_with_optimistic_lock(
                "exec-1",
                |_| {
                    calls += 1;
                    Err(CalibError::Config("bad".into()))
                },
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CalibError::Config(_)));
        assert_eq!(calls, 1);
        assert_eq!(manager.get("exec-1").await.unwrap().version, 0);
    }

    #[tokio::test]
    async fn test_finalize_and_terminal_immutability() {
        let manager = manager();
        manager.create(ExecutionRecord::new("exec-1", "demo")).await.unwrap();

        let mut task = Task::new("CheckT1", TaskType::Qubit, "5");
        task.output_parameters.insert(
            "t1".into(),
            OutputParameter::new(40.0).with_provenance("exec-1", task.task_id),
        );
        task.transition(TaskStatus::Running, None).unwrap();
        task.transition(TaskStatus::Failed, Some("boom")).unwrap();
        manager.apply_task_result("exec-1", &task).await.unwrap();

        let record = manager.finalize("exec-1", StatusPolicy::AnyFailed).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert!(record.calib_data.is_empty());

        let err = manager.apply_task_result("exec-1", &task).await.unwrap_err();
        assert!(matches!(err, CalibError::ExecutionTerminal(_)));
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let manager = manager();
        manager.create(ExecutionRecord::new("exec-1", "demo")).await.unwrap();
        assert!(manager.create(ExecutionRecord::new("exec-1", "demo")).await.is_err());
    }
}
