//! A calibration session: one execution record shared by many workers.

use std::sync::Arc;

use tracing::info;

use crate::artifact::{ArtifactStore, DiscardArtifacts, FsArtifactStore};
use crate::config::CalibConfig;
use crate::error::CalibResult;
use crate::executor::{CalibBackend, NullBackend, TaskExecutor};
use crate::history::{HistoryRecorder, JsonlHistory, MemoryHistory};
use crate::lock::{SessionGuard, SessionLocks};
use crate::manager::ExecutionRecordManager;
use crate::record::ExecutionRecord;
use crate::state::TaskStateManager;
use crate::store::{ExecutionStore, open_store};

/// Holds the project lock for its whole lifetime.
///
/// Workers handed out by [`CalibSession::worker`] each own their task state
/// and converge only through the execution record.
pub struct CalibSession {
    config: CalibConfig,
    execution_id: String,
    records: ExecutionRecordManager,
    history: Arc<dyn HistoryRecorder>,
    artifacts: Arc<dyn ArtifactStore>,
    backend: Arc<dyn CalibBackend>,
    guard: SessionGuard,
}

impl CalibSession {
    /// Lock the project and create the running execution record.
    ///
    /// Fails with `SessionLocked` when another session holds the project.
    pub async fn open(
        config: CalibConfig,
        execution_id: impl Into<String>,
        locks: &SessionLocks,
        store: Arc<dyn ExecutionStore>,
    ) -> CalibResult<Self> {
        let execution_id = execution_id.into();
        let guard = locks.try_acquire(&config.project)?;
        let records = ExecutionRecordManager::new(store, config.retry.clone());
        records
            .create(ExecutionRecord::new(execution_id.clone(), config.project.clone()))
            .await?;
        info!(execution_id = %execution_id, project = %config.project, "Calibration session opened");

        Ok(Self {
            config,
            execution_id,
            records,
            history: Arc::new(MemoryHistory::new()),
            artifacts: Arc::new(DiscardArtifacts),
            backend: Arc::new(NullBackend),
            guard,
        })
    }

    /// Open a session backed by the configured store, with history and
    /// artifacts written under the state directory.
    pub async fn open_persistent(
        config: CalibConfig,
        execution_id: impl Into<String>,
        locks: &SessionLocks,
    ) -> CalibResult<Self> {
        let execution_id = execution_id.into();
        let store = open_store(&config).await?;
        let history = JsonlHistory::new(
            config
                .state_dir
                .join("history")
                .join(format!("{execution_id}.jsonl")),
        )
        .await?;
        let artifacts = FsArtifactStore::new(config.state_dir.join("artifacts"));
        Ok(Self::open(config, execution_id, locks, store)
            .await?
            .with_history(Arc::new(history))
            .with_artifacts(Arc::new(artifacts)))
    }

    pub fn with_history(mut self, history: Arc<dyn HistoryRecorder>) -> Self {
        self.history = history;
        self
    }

    pub fn with_artifacts(mut self, artifacts: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn CalibBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn project(&self) -> &str {
        self.guard.project()
    }

    pub fn records(&self) -> &ExecutionRecordManager {
        &self.records
    }

    /// A new executor scoped to `qids`.
    pub fn worker<S: AsRef<str>>(&self, qids: &[S]) -> TaskExecutor {
        TaskExecutor::new(
            TaskStateManager::new(self.execution_id.clone(), qids),
            self.records.clone(),
            self.config.validation.clone(),
        )
        .with_history(Arc::clone(&self.history))
        .with_artifacts(Arc::clone(&self.artifacts))
        .with_backend(Arc::clone(&self.backend))
    }

    /// Apply the status policy to the record and release the project lock.
    pub async fn finish(self) -> CalibResult<ExecutionRecord> {
        let record = self
            .records
            .finalize(&self.execution_id, self.config.status_policy)
            .await?;
        info!(
            execution_id = %self.execution_id,
            project = %self.guard.project(),
            status = %record.status,
            "Calibration session finished"
        );
        Ok(record)
    }
}
