//! Drives calibration tasks through their lifecycle.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::artifact::{ArtifactStore, DiscardArtifacts, Figure, RawData};
use crate::calib_data::CalibData;
use crate::config::ValidationConfig;
use crate::error::{CalibError, CalibResult};
use crate::history::{ExecutionSnapshot, HistoryRecorder, MemoryHistory};
use crate::manager::ExecutionRecordManager;
use crate::state::TaskStateManager;
use crate::task::{ParameterMap, Task, TaskId, TaskStatus, TaskType};

/// Default per-task timeout.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(600);

/// What a task sees while it runs.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub execution_id: String,
    pub qid: String,
    pub input_parameters: BTreeMap<String, serde_json::Value>,
    /// Calibration data of this worker at the time the task started.
    pub calib_data: CalibData,
}

/// Output of a task's measurement step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub raw: serde_json::Value,
    /// Fit quality per qid.
    #[serde(default)]
    pub r2: BTreeMap<String, f64>,
}

/// Output of a task's analysis step.
#[derive(Debug, Clone, Default)]
pub struct PostProcessResult {
    pub output_parameters: ParameterMap,
    /// Results for the other members of the task's MUX group.
    pub group_parameters: BTreeMap<String, ParameterMap>,
    pub figures: Vec<Figure>,
    pub raw_data: Vec<RawData>,
}

/// A calibration task implementation.
#[async_trait]
pub trait CalibTask: Send + Sync {
    fn name(&self) -> &str;

    fn task_type(&self) -> TaskType;

    fn timeout(&self) -> Duration {
        DEFAULT_TASK_TIMEOUT
    }

    /// Minimum fit quality; `None` uses the configured default.
    fn r2_threshold(&self) -> Option<f64> {
        None
    }

    /// Whether one measurement yields results for the whole MUX group.
    fn is_group_level(&self) -> bool {
        false
    }

    fn input_parameters(&self) -> BTreeMap<String, serde_json::Value> {
        BTreeMap::new()
    }

    /// Advisory preparation. Errors are logged and ignored.
    async fn preprocess(&self, _ctx: &TaskContext) -> CalibResult<Option<serde_json::Value>> {
        Ok(None)
    }

    /// Run the measurement. `None` means there is nothing to analyse.
    async fn run(
        &self,
        ctx: &TaskContext,
        preprocessed: Option<&serde_json::Value>,
    ) -> CalibResult<Option<RunResult>>;

    async fn postprocess(&self, ctx: &TaskContext, result: &RunResult) -> CalibResult<PostProcessResult>;
}

/// Instrument-side persistence of a task's result.
#[async_trait]
pub trait CalibBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn save(&self, task: &Task, qid: &str) -> CalibResult<()>;
}

/// Backend without instrument state.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBackend;

#[async_trait]
impl CalibBackend for NullBackend {
    fn name(&self) -> &str {
        "null"
    }

    async fn save(&self, _task: &Task, _qid: &str) -> CalibResult<()> {
        Ok(())
    }
}

/// Final state of one executed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub output_parameters: ParameterMap,
}

impl TaskOutcome {
    fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.task_id,
            status: task.status,
            output_parameters: task.output_parameters.clone(),
        }
    }
}

/// Executes tasks for one worker.
///
/// Owns the worker's [`TaskStateManager`]; the execution record is the only
/// state shared with other workers.
pub struct TaskExecutor {
    state: TaskStateManager,
    records: ExecutionRecordManager,
    validation: ValidationConfig,
    history: Arc<dyn HistoryRecorder>,
    artifacts: Arc<dyn ArtifactStore>,
    backend: Arc<dyn CalibBackend>,
}

impl TaskExecutor {
    pub fn new(state: TaskStateManager, records: ExecutionRecordManager, validation: ValidationConfig) -> Self {
        Self {
            state,
            records,
            validation,
            history: Arc::new(MemoryHistory::new()),
            artifacts: Arc::new(DiscardArtifacts),
            backend: Arc::new(NullBackend),
        }
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
        self.state.execution_id()
    }

    pub fn state(&self) -> &TaskStateManager {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut TaskStateManager {
        &mut self.state
    }

    pub fn into_state(self) -> TaskStateManager {
        self.state
    }

    /// Run one task on `qid`.
    ///
    /// On failure the task is marked failed, its outputs are rolled back and
    /// the rest of the qid's chain is skipped before the error is returned.
    /// The execution record and history are updated in every case.
    ///
    /// A task that is already completed on `qid`, for instance through a
    /// group measurement on another member, is not run again.
    #[instrument(skip(self, task), fields(task = task.name(), execution_id = %self.state.execution_id()))]
    pub async fn execute_task(&mut self, task: &dyn CalibTask, qid: &str) -> CalibResult<TaskOutcome> {
        let name = task.name().to_string();
        let task_type = task.task_type();
        let qid = if task_type.has_qid() { qid } else { "" };

        self.state.ensure_task_exists(&name, task_type, qid);
        let existing = self.state.get_task(&name, task_type, qid)?;
        if existing.status == TaskStatus::Completed {
            info!(qid, "Task already completed, not running it again");
            return Ok(TaskOutcome::from_task(existing));
        }

        let driven = match self.enter(task, &name, task_type, qid) {
            Ok(()) => {
                info!(qid, "Task started");
                self.drive(task, qid).await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = &driven {
            self.abort(&name, task_type, qid, e).await;
        }

        // The record update runs regardless of the task outcome.
        let ended = self.end(&name, task_type, qid).await;
        let driven = match (driven, ended) {
            (Err(e), Err(end_err)) => {
                error!(qid, error = %end_err, "Failed to record failed task");
                return Err(e);
            }
            (Err(e), Ok(())) => return Err(e),
            (Ok(_), Err(end_err)) => return Err(end_err),
            (Ok(driven), Ok(())) => driven,
        };

        if let Some((run, post)) = driven {
            if task.is_group_level() {
                self.distribute_group_results(task, qid, &run, post.group_parameters)
                    .await?;
            }
        }

        let finished = self.state.get_task(&name, task_type, qid)?;
        info!(qid, status = %finished.status, "Task finished");
        Ok(TaskOutcome::from_task(finished))
    }

    /// Run `tasks` in order on `qid`, each depending on the previous one.
    ///
    /// Stops at the first failure; the remaining tasks end up skipped.
    pub async fn run_chain(&mut self, tasks: &[Arc<dyn CalibTask>], qid: &str) -> CalibResult<Vec<TaskOutcome>> {
        for task in tasks {
            let task_qid = if task.task_type().has_qid() { qid } else { "" };
            let id = self
                .state
                .ensure_task_exists(task.name(), task.task_type(), task_qid);
            self.state.set_upstream(Some(id));
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        for (i, task) in tasks.iter().enumerate() {
            match self.execute_task(task.as_ref(), qid).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    // Chains may span containers; sweep the ones the failing
                    // task's own sweep did not reach.
                    let mut swept = Vec::new();
                    for rest in &tasks[i + 1..] {
                        let rest_qid = if rest.task_type().has_qid() { qid } else { "" };
                        swept.extend(self.sweep(rest.task_type(), rest_qid));
                    }
                    if let Err(end_err) = self.record_tasks(&swept).await {
                        error!(qid, error = %end_err, "Failed to record skipped tasks");
                    }
                    return Err(e);
                }
            }
        }
        Ok(outcomes)
    }

    fn enter(&mut self, task: &dyn CalibTask, name: &str, task_type: TaskType, qid: &str) -> CalibResult<()> {
        self.state.start(name, task_type, qid)?;
        self.state
            .put_input_parameters(name, task_type, qid, task.input_parameters())
    }

    fn context(&self, task: &dyn CalibTask, qid: &str) -> TaskContext {
        TaskContext {
            execution_id: self.state.execution_id().to_string(),
            qid: qid.to_string(),
            input_parameters: task.input_parameters(),
            calib_data: self.state.calib_data().clone(),
        }
    }

    /// Everything between start and complete. Returns the run and analysis
    /// results unless the run produced nothing.
    async fn drive(
        &mut self,
        task: &dyn CalibTask,
        qid: &str,
    ) -> CalibResult<Option<(RunResult, PostProcessResult)>> {
        let name = task.name().to_string();
        let task_type = task.task_type();
        let ctx = self.context(task, qid);

        let preprocessed = match task.preprocess(&ctx).await {
            Ok(value) => value,
            Err(e) => {
                warn!(qid, error = %e, "Preprocessing failed, continuing without it");
                None
            }
        };

        let timeout = task.timeout();
        let run = tokio::time::timeout(timeout, task.run(&ctx, preprocessed.as_ref()))
            .await
            .map_err(|_| CalibError::Timeout {
                task: name.clone(),
                qid: qid.to_string(),
                seconds: timeout.as_secs_f64(),
            })??;

        let Some(run) = run else {
            self.state
                .complete_with(&name, task_type, qid, "Completed: run produced no result")?;
            return Ok(None);
        };

        let mut post = task.postprocess(&ctx, &run).await?;
        let outputs = std::mem::take(&mut post.output_parameters);
        self.state
            .put_output_parameters(&name, outputs.clone(), task_type, qid)?;

        if let Err(e) = self.check_fit_quality(task, qid, &run) {
            // Instrument state must match what was measured, even when rejected.
            let snapshot = self.state.get_task(&name, task_type, qid)?.clone();
            if let Err(save_err) = self.backend.save(&snapshot, qid).await {
                warn!(qid, backend = self.backend.name(), error = %save_err, "Backend save failed");
            }
            return Err(e);
        }
        self.check_bounds(&name, qid, &outputs)?;

        let snapshot = self.state.get_task(&name, task_type, qid)?.clone();
        let execution_id = self.state.execution_id().to_string();
        let figure_paths = self
            .artifacts
            .save_figures(&execution_id, &snapshot, &post.figures)
            .await?;
        let raw_data_paths = self
            .artifacts
            .save_raw_data(&execution_id, &snapshot, &post.raw_data)
            .await?;
        self.state
            .set_figure_paths(&name, task_type, qid, figure_paths)?;
        self.state
            .set_raw_data_paths(&name, task_type, qid, raw_data_paths)?;

        self.backend.save(&snapshot, qid).await?;
        self.state
            .complete_with(&name, task_type, qid, "All steps completed")?;
        Ok(Some((run, post)))
    }

    fn check_fit_quality(&self, task: &dyn CalibTask, qid: &str, run: &RunResult) -> CalibResult<()> {
        let threshold = task
            .r2_threshold()
            .unwrap_or(self.validation.default_r2_threshold);
        match run.r2.get(qid) {
            Some(&r2) if r2 < threshold => Err(CalibError::Validation {
                task: task.name().to_string(),
                qid: qid.to_string(),
                reason: format!("R² {r2:.3} is below threshold {threshold}"),
            }),
            _ => Ok(()),
        }
    }

    fn check_bounds(&self, name: &str, qid: &str, outputs: &ParameterMap) -> CalibResult<()> {
        for (param, output) in outputs {
            if let Some(bound) = self.validation.violated_bound(param, output.value) {
                return Err(CalibError::Validation {
                    task: name.to_string(),
                    qid: qid.to_string(),
                    reason: format!(
                        "{param} = {} is outside [{}, {}]",
                        output.value, bound.min, bound.max
                    ),
                });
            }
        }
        Ok(())
    }

    /// Fail the task, roll back its outputs and skip the rest of its chain.
    async fn abort(&mut self, name: &str, task_type: TaskType, qid: &str, cause: &CalibError) {
        error!(qid, error = %cause, "Task failed");
        if let Err(e) = self.state.fail_with(name, task_type, qid, &cause.to_string()) {
            warn!(qid, error = %e, "Could not mark task failed");
        }
        if let Err(e) = self.state.clear_output_parameters(name, task_type, qid) {
            warn!(qid, error = %e, "Could not clear output parameters");
        }
        let swept = self.sweep(task_type, qid);
        if let Err(e) = self.record_tasks(&swept).await {
            error!(qid, error = %e, "Failed to record skipped tasks");
        }
    }

    /// Skip every scheduled task of a container and return the skipped tasks.
    fn sweep(&mut self, task_type: TaskType, qid: &str) -> Vec<Task> {
        let pending: Vec<String> = self
            .state
            .tasks(task_type, qid)
            .iter()
            .filter(|t| t.status == TaskStatus::Scheduled)
            .map(|t| t.name.clone())
            .collect();
        if pending.is_empty() {
            return Vec::new();
        }
        self.state.update_not_executed_tasks_to_skipped(task_type, qid);
        pending
            .iter()
            .filter_map(|name| self.state.find_task(name, task_type, qid).cloned())
            .collect()
    }

    /// Push the final state of one task to the execution record and history.
    async fn end(&mut self, name: &str, task_type: TaskType, qid: &str) -> CalibResult<()> {
        let task = self.state.get_task(name, task_type, qid)?.clone();
        self.record_tasks(std::slice::from_ref(&task)).await
    }

    async fn record_tasks(&self, tasks: &[Task]) -> CalibResult<()> {
        if tasks.is_empty() {
            return Ok(());
        }
        let record = self
            .records
            .update_with_optimistic_lock(
                self.state.execution_id(),
                |record| {
                    for task in tasks {
                        record.apply_task(task);
                    }
                    Ok(())
                },
                None,
            )
            .await?;
        let snapshot = ExecutionSnapshot::from(&record);
        for task in tasks {
            if let Err(e) = self.history.record(task, &snapshot).await {
                warn!(task = %task.key(), error = %e, "Failed to append task history");
            }
        }
        Ok(())
    }

    /// Record a group-level result as its own task on every other member.
    ///
    /// Each member is validated on its own; a rejected member is failed
    /// without affecting the primary or the other members.
    async fn distribute_group_results(
        &mut self,
        task: &dyn CalibTask,
        primary: &str,
        run: &RunResult,
        group_parameters: BTreeMap<String, ParameterMap>,
    ) -> CalibResult<()> {
        let name = task.name().to_string();
        let task_type = task.task_type();

        for (member, params) in group_parameters {
            if member == primary {
                continue;
            }
            // Link within the member's own chain, not the primary's.
            let upstream = self
                .state
                .tasks(task_type, &member)
                .last()
                .map(|t| t.task_id);
            self.state
                .ensure_task_exists_after(&name, task_type, &member, upstream);
            if self.state.get_task(&name, task_type, &member)?.status.is_terminal() {
                debug!(primary, member = %member, "Member task already finished, not overwriting");
                continue;
            }
            self.state.start(&name, task_type, &member)?;
            self.state
                .put_output_parameters(&name, params.clone(), task_type, &member)?;

            let gated = self
                .check_fit_quality(task, &member, run)
                .and_then(|()| self.check_bounds(&name, &member, &params));
            match gated {
                Ok(()) => {
                    self.state.complete_with(
                        &name,
                        task_type,
                        &member,
                        &format!("Completed from group measurement on {primary}"),
                    )?;
                    debug!(primary, member = %member, "Distributed group result");
                }
                Err(e) => {
                    warn!(primary, member = %member, error = %e, "Group member rejected");
                    self.state.clear_output_parameters(&name, task_type, &member)?;
                    self.state
                        .fail_with(&name, task_type, &member, &e.to_string())?;
                }
            }
            self.end(&name, task_type, &member).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::record::ExecutionRecord;
    use crate::store::MemoryStore;
    use crate::task::OutputParameter;

    struct Fixed {
        name: &'static str,
        value: f64,
        r2: f64,
        group: Vec<(&'static str, f64)>,
    }

    #[async_trait]
    impl CalibTask for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn task_type(&self) -> TaskType {
            TaskType::Qubit
        }

        fn is_group_level(&self) -> bool {
            !self.group.is_empty()
        }

        async fn run(&self, ctx: &TaskContext, _: Option<&serde_json::Value>) -> CalibResult<Option<RunResult>> {
            let mut r2 = BTreeMap::from([(ctx.qid.clone(), self.r2)]);
            for (qid, _) in &self.group {
                r2.insert(qid.to_string(), self.r2);
            }
            Ok(Some(RunResult {
                raw: serde_json::json!({}),
                r2,
            }))
        }

        async fn postprocess(&self, _: &TaskContext, _: &RunResult) -> CalibResult<PostProcessResult> {
            Ok(PostProcessResult {
                output_parameters: BTreeMap::from([(
                    "x90_fidelity".to_string(),
                    OutputParameter::new(self.value),
                )]),
                group_parameters: self
                    .group
                    .iter()
                    .map(|(qid, v)| {
                        (
                            qid.to_string(),
                            BTreeMap::from([("x90_fidelity".to_string(), OutputParameter::new(*v))]),
                        )
                    })
                    .collect(),
                ..Default::default()
            })
        }
    }

    async fn executor(qids: &[&str]) -> TaskExecutor {
        let records = ExecutionRecordManager::new(Arc::new(MemoryStore::new()), RetryConfig::default());
        records.create(ExecutionRecord::new("exec-1", "demo")).await.unwrap();
        TaskExecutor::new(
            TaskStateManager::new("exec-1", qids),
            records,
            ValidationConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_successful_task_reaches_record() {
        let mut exec = executor(&["0"]).await;
        let task = Fixed { name: "CheckRB", value: 0.99, r2: 0.95, group: vec![] };
        let outcome = exec.execute_task(&task, "0").await.unwrap();
        assert_eq!(outcome.status, TaskStatus::Completed);

        let record = exec.records.get("exec-1").await.unwrap();
        assert_eq!(record.task_results["qubit/0/CheckRB"], TaskStatus::Completed);
        assert!(record.calib_data.get(TaskType::Qubit, "0", "x90_fidelity").is_some());
    }

    #[tokio::test]
    async fn test_low_r2_fails_and_rolls_back() {
        let mut exec = executor(&["0"]).await;
        let task = Fixed { name: "CheckRB", value: 0.99, r2: 0.2, group: vec![] };
        let err = exec.execute_task(&task, "0").await.unwrap_err();
        assert!(matches!(err, CalibError::Validation { .. }));

        let stored = exec.state().get_task("CheckRB", TaskType::Qubit, "0").unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert!(stored.output_parameters.is_empty());
        assert!(exec.state().calib_data().get(TaskType::Qubit, "0", "x90_fidelity").is_none());
    }

    #[tokio::test]
    async fn test_out_of_bounds_fidelity_fails() {
        let mut exec = executor(&["0"]).await;
        let task = Fixed { name: "CheckRB", value: 1.2, r2: 0.95, group: vec![] };
        let err = exec.execute_task(&task, "0").await.unwrap_err();
        assert!(err.to_string().contains("x90_fidelity"));
        let record = exec.records.get("exec-1").await.unwrap();
        assert_eq!(record.task_results["qubit/0/CheckRB"], TaskStatus::Failed);
        assert!(record.calib_data.get(TaskType::Qubit, "0", "x90_fidelity").is_none());
    }

    #[tokio::test]
    async fn test_group_results_validated_per_member() {
        let mut exec = executor(&["0", "1", "2"]).await;
        let task = Fixed {
            name: "CheckReadout",
            value: 0.97,
            r2: 0.9,
            group: vec![("1", 0.95), ("2", 1.5)],
        };
        exec.execute_task(&task, "0").await.unwrap();

        let status = |qid: &str| exec.state().get_task("CheckReadout", TaskType::Qubit, qid).unwrap().status;
        assert_eq!(status("0"), TaskStatus::Completed);
        assert_eq!(status("1"), TaskStatus::Completed);
        assert_eq!(status("2"), TaskStatus::Failed);

        let record = exec.records.get("exec-1").await.unwrap();
        assert!(record.calib_data.get(TaskType::Qubit, "1", "x90_fidelity").is_some());
        assert!(record.calib_data.get(TaskType::Qubit, "2", "x90_fidelity").is_none());
    }
}
