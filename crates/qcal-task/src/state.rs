//! Per-worker task state for one calibration run.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::debug;

use crate::calib_data::CalibData;
use crate::error::{CalibError, CalibResult};
use crate::task::{ParameterMap, Task, TaskId, TaskStatus, TaskType, task_key};

/// Owns the task containers and calibration data of one worker.
///
/// Global and system tasks live in flat lists; qubit and coupling tasks are
/// kept per qid, each list in dependency order. A manager is owned by a
/// single worker and is not shared between threads.
#[derive(Debug, Clone, Default)]
pub struct TaskStateManager {
    execution_id: String,
    global_tasks: Vec<Task>,
    system_tasks: Vec<Task>,
    qubit_tasks: BTreeMap<String, Vec<Task>>,
    coupling_tasks: BTreeMap<String, Vec<Task>>,
    calib_data: CalibData,
    upstream: Option<TaskId>,
}

impl TaskStateManager {
    /// Create a manager scoped to `qids`.
    ///
    /// qids containing `-` are coupling pairs, the rest are qubits.
    pub fn new<S: AsRef<str>>(execution_id: impl Into<String>, qids: &[S]) -> Self {
        let mut manager = Self {
            execution_id: execution_id.into(),
            ..Default::default()
        };
        for qid in qids {
            let qid = qid.as_ref();
            let task_type = if qid.contains('-') {
                TaskType::Coupling
            } else {
                TaskType::Qubit
            };
            manager.container_mut(task_type, qid);
            manager.calib_data.ensure_qid(task_type, qid);
        }
        manager
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Set the upstream pointer used for newly created tasks.
    pub fn set_upstream(&mut self, upstream: Option<TaskId>) {
        self.upstream = upstream;
    }

    pub fn upstream(&self) -> Option<TaskId> {
        self.upstream
    }

    fn container(&self, task_type: TaskType, qid: &str) -> &[Task] {
        match task_type {
            TaskType::Global => &self.global_tasks,
            TaskType::System => &self.system_tasks,
            TaskType::Qubit => self.qubit_tasks.get(qid).map_or(&[], Vec::as_slice),
            TaskType::Coupling => self.coupling_tasks.get(qid).map_or(&[], Vec::as_slice),
        }
    }

    fn container_mut(&mut self, task_type: TaskType, qid: &str) -> &mut Vec<Task> {
        match task_type {
            TaskType::Global => &mut self.global_tasks,
            TaskType::System => &mut self.system_tasks,
            TaskType::Qubit => self.qubit_tasks.entry(qid.to_string()).or_default(),
            TaskType::Coupling => self.coupling_tasks.entry(qid.to_string()).or_default(),
        }
    }

    /// Look up a task by `(type, qid, name)`.
    pub fn find_task(&self, name: &str, task_type: TaskType, qid: &str) -> Option<&Task> {
        self.container(task_type, qid)
            .iter()
            .find(|t| t.name == name && t.qid == qid)
    }

    /// Look up a task, failing if it does not exist.
    pub fn get_task(&self, name: &str, task_type: TaskType, qid: &str) -> CalibResult<&Task> {
        self.find_task(name, task_type, qid)
            .ok_or_else(|| CalibError::TaskNotFound(task_key(task_type, qid, name)))
    }

    fn task_mut(&mut self, name: &str, task_type: TaskType, qid: &str) -> CalibResult<&mut Task> {
        self.container_mut(task_type, qid)
            .iter_mut()
            .find(|t| t.name == name && t.qid == qid)
            .ok_or_else(|| CalibError::TaskNotFound(task_key(task_type, qid, name)))
    }

    /// Return the existing task or create a scheduled one.
    ///
    /// New tasks take the current upstream pointer as their `upstream_id`.
    pub fn ensure_task_exists(&mut self, name: &str, task_type: TaskType, qid: &str) -> TaskId {
        self.ensure_task_exists_after(name, task_type, qid, self.upstream)
    }

    /// Like [`ensure_task_exists`](Self::ensure_task_exists), but a new task
    /// depends on `upstream` instead of the upstream pointer.
    pub fn ensure_task_exists_after(
        &mut self,
        name: &str,
        task_type: TaskType,
        qid: &str,
        upstream: Option<TaskId>,
    ) -> TaskId {
        if let Some(task) = self.find_task(name, task_type, qid) {
            return task.task_id;
        }
        let task = Task::new(name, task_type, qid).with_upstream(upstream);
        let task_id = task.task_id;
        debug!(task = %task.key(), %task_id, "Created task");
        self.container_mut(task_type, qid).push(task);
        task_id
    }

    /// Create a linear chain of tasks for `qid`.
    ///
    /// Every task's upstream is the previous one; the first takes the
    /// current upstream pointer, which afterwards points at the last task.
    pub fn plan_chain<S: AsRef<str>>(
        &mut self,
        names: &[S],
        task_type: TaskType,
        qid: &str,
    ) -> Vec<TaskId> {
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            let id = self.ensure_task_exists(name.as_ref(), task_type, qid);
            self.upstream = Some(id);
            ids.push(id);
        }
        ids
    }

    /// Tasks of one container, in dependency order.
    pub fn tasks(&self, task_type: TaskType, qid: &str) -> &[Task] {
        self.container(task_type, qid)
    }

    /// Every task of the run.
    pub fn all_tasks(&self) -> impl Iterator<Item = &Task> {
        self.global_tasks
            .iter()
            .chain(&self.system_tasks)
            .chain(self.qubit_tasks.values().flatten())
            .chain(self.coupling_tasks.values().flatten())
    }

    fn transition(
        &mut self,
        name: &str,
        task_type: TaskType,
        qid: &str,
        next: TaskStatus,
        message: Option<&str>,
    ) -> CalibResult<()> {
        let task = self.task_mut(name, task_type, qid)?;
        task.transition(next, message)?;
        debug!(task = %task.key(), status = %next, "Task status changed");
        Ok(())
    }

    /// Mark a task running and stamp `start_at`.
    pub fn start(&mut self, name: &str, task_type: TaskType, qid: &str) -> CalibResult<()> {
        self.transition(name, task_type, qid, TaskStatus::Running, None)
    }

    pub fn complete_with(&mut self, name: &str, task_type: TaskType, qid: &str, message: &str) -> CalibResult<()> {
        self.transition(name, task_type, qid, TaskStatus::Completed, Some(message))
    }

    pub fn fail_with(&mut self, name: &str, task_type: TaskType, qid: &str, message: &str) -> CalibResult<()> {
        self.transition(name, task_type, qid, TaskStatus::Failed, Some(message))
    }

    pub fn skip_with(&mut self, name: &str, task_type: TaskType, qid: &str, message: &str) -> CalibResult<()> {
        self.transition(name, task_type, qid, TaskStatus::Skipped, Some(message))
    }

    pub fn put_input_parameters(
        &mut self,
        name: &str,
        task_type: TaskType,
        qid: &str,
        params: BTreeMap<String, serde_json::Value>,
    ) -> CalibResult<()> {
        self.task_mut(name, task_type, qid)?.input_parameters.extend(params);
        Ok(())
    }

    /// Store output parameters on the task and, for qubit and coupling
    /// tasks, in the calibration data.
    ///
    /// Every parameter is stamped with this run's execution ID and the task ID.
    pub fn put_output_parameters(
        &mut self,
        name: &str,
        params: ParameterMap,
        task_type: TaskType,
        qid: &str,
    ) -> CalibResult<()> {
        let execution_id = self.execution_id.clone();
        let task = self.task_mut(name, task_type, qid)?;
        let task_id = task.task_id;
        let stamped: ParameterMap = params
            .into_iter()
            .map(|(key, p)| (key, p.with_provenance(execution_id.as_str(), task_id)))
            .collect();
        task.output_parameters
            .extend(stamped.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.calib_data.put(task_type, qid, &stamped);
        Ok(())
    }

    /// Roll back a task's outputs.
    ///
    /// Removes every output parameter of the task and the same names from
    /// the calibration data of its qid. Returns the removed names.
    pub fn clear_output_parameters(
        &mut self,
        name: &str,
        task_type: TaskType,
        qid: &str,
    ) -> CalibResult<Vec<String>> {
        let task = self.task_mut(name, task_type, qid)?;
        let keys: Vec<String> = std::mem::take(&mut task.output_parameters).into_keys().collect();
        self.calib_data
            .remove_keys(task_type, qid, keys.iter().map(String::as_str));
        if !keys.is_empty() {
            debug!(task = %task_key(task_type, qid, name), ?keys, "Cleared output parameters");
        }
        Ok(keys)
    }

    /// Mark every still-scheduled task of a container skipped.
    ///
    /// Returns the number of tasks swept.
    pub fn update_not_executed_tasks_to_skipped(&mut self, task_type: TaskType, qid: &str) -> usize {
        let mut swept = 0;
        for task in self.container_mut(task_type, qid) {
            if task.status == TaskStatus::Scheduled
                && task
                    .transition(TaskStatus::Skipped, Some("Skipped: an earlier task in the chain failed"))
                    .is_ok()
            {
                swept += 1;
            }
        }
        if swept > 0 {
            debug!(%task_type, qid, swept, "Skipped not executed tasks");
        }
        swept
    }

    pub fn set_figure_paths(
        &mut self,
        name: &str,
        task_type: TaskType,
        qid: &str,
        paths: Vec<PathBuf>,
    ) -> CalibResult<()> {
        self.task_mut(name, task_type, qid)?.figure_paths = paths;
        Ok(())
    }

    pub fn set_raw_data_paths(
        &mut self,
        name: &str,
        task_type: TaskType,
        qid: &str,
        paths: Vec<PathBuf>,
    ) -> CalibResult<()> {
        self.task_mut(name, task_type, qid)?.raw_data_paths = paths;
        Ok(())
    }

    pub fn calib_data(&self) -> &CalibData {
        &self.calib_data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::OutputParameter;

    fn outputs(entries: &[(&str, f64)]) -> ParameterMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), OutputParameter::new(*v)))
            .collect()
    }

    #[test]
    fn test_ensure_task_exists_is_idempotent() {
        let mut manager = TaskStateManager::new("exec-1", &["5"]);
        let first = manager.ensure_task_exists("CheckT1", TaskType::Qubit, "5");
        let second = manager.ensure_task_exists("CheckT1", TaskType::Qubit, "5");
        assert_eq!(first, second);
        assert_eq!(manager.tasks(TaskType::Qubit, "5").len(), 1);

        let other = manager.ensure_task_exists("CheckT1", TaskType::Qubit, "6");
        assert_ne!(first, other);
    }

    #[test]
    fn test_upstream_pointer() {
        let mut manager = TaskStateManager::new("exec-1", &["5"]);
        let ids = manager.plan_chain(&["CheckRabi", "CheckT1", "CheckT2"], TaskType::Qubit, "5");
        let tasks = manager.tasks(TaskType::Qubit, "5");
        assert_eq!(tasks[0].upstream_id, None);
        assert_eq!(tasks[1].upstream_id, Some(ids[0]));
        assert_eq!(tasks[2].upstream_id, Some(ids[1]));
        assert_eq!(manager.upstream(), Some(ids[2]));
    }

    #[test]
    fn test_explicit_upstream_ignores_pointer() {
        let mut manager = TaskStateManager::new("exec-1", &["5", "6"]);
        manager.plan_chain(&["CheckRabi", "CheckT1"], TaskType::Qubit, "5");
        let id = manager.ensure_task_exists_after("CheckResonator", TaskType::Qubit, "6", None);

        let task = &manager.tasks(TaskType::Qubit, "6")[0];
        assert_eq!(task.task_id, id);
        assert_eq!(task.upstream_id, None);
        assert_ne!(manager.upstream(), None);
    }

    #[test]
    fn test_lifecycle_and_invalid_transition() {
        let mut manager = TaskStateManager::new("exec-1", &["0-1"]);
        manager.ensure_task_exists("CheckCross", TaskType::Coupling, "0-1");
        manager.start("CheckCross", TaskType::Coupling, "0-1").unwrap();
        manager
            .complete_with("CheckCross", TaskType::Coupling, "0-1", "ok")
            .unwrap();

        let task = manager.get_task("CheckCross", TaskType::Coupling, "0-1").unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.elapsed_time.is_some());

        let err = manager.fail_with("CheckCross", TaskType::Coupling, "0-1", "late");
        assert!(matches!(err, Err(CalibError::InvalidTransition { .. })));
        assert!(matches!(
            manager.start("Missing", TaskType::Coupling, "0-1"),
            Err(CalibError::TaskNotFound(_))
        ));
    }

    #[test]
    fn test_outputs_reach_calib_data_with_provenance() {
        let mut manager = TaskStateManager::new("exec-1", &["5"]);
        let id = manager.ensure_task_exists("CheckT1", TaskType::Qubit, "5");
        manager
            .put_output_parameters("CheckT1", outputs(&[("t1", 41.0)]), TaskType::Qubit, "5")
            .unwrap();

        let stored = manager.calib_data().get(TaskType::Qubit, "5", "t1").unwrap();
        assert_eq!(stored.task_id, Some(id));
        assert_eq!(stored.execution_id, "exec-1");

        manager.ensure_task_exists("CheckChip", TaskType::Global, "");
        manager
            .put_output_parameters("CheckChip", outputs(&[("temp", 0.01)]), TaskType::Global, "")
            .unwrap();
        assert_eq!(manager.calib_data().len(), 1);
    }

    #[test]
    fn test_clear_output_parameters_rolls_back() {
        let mut manager = TaskStateManager::new("exec-1", &["5"]);
        manager.ensure_task_exists("CheckRabi", TaskType::Qubit, "5");
        manager.ensure_task_exists("CheckT1", TaskType::Qubit, "5");
        manager
            .put_output_parameters("CheckRabi", outputs(&[("rabi_amp", 0.4)]), TaskType::Qubit, "5")
            .unwrap();
        manager
            .put_output_parameters("CheckT1", outputs(&[("t1", 41.0), ("t1_err", 1.0)]), TaskType::Qubit, "5")
            .unwrap();

        let mut removed = manager
            .clear_output_parameters("CheckT1", TaskType::Qubit, "5")
            .unwrap();
        removed.sort();
        assert_eq!(removed, ["t1", "t1_err"]);

        let task = manager.get_task("CheckT1", TaskType::Qubit, "5").unwrap();
        assert!(task.output_parameters.is_empty());
        let params = manager.calib_data().params(TaskType::Qubit, "5").unwrap();
        assert!(!params.contains_key("t1"));
        assert!(!params.contains_key("t1_err"));
        assert!(params.contains_key("rabi_amp"));
    }

    #[test]
    fn test_sweep_to_skipped() {
        let mut manager = TaskStateManager::new("exec-1", &["5"]);
        manager.plan_chain(&["A", "B", "C"], TaskType::Qubit, "5");
        manager.start("A", TaskType::Qubit, "5").unwrap();
        manager.fail_with("A", TaskType::Qubit, "5", "boom").unwrap();

        assert_eq!(manager.update_not_executed_tasks_to_skipped(TaskType::Qubit, "5"), 2);
        let statuses: Vec<TaskStatus> = manager
            .tasks(TaskType::Qubit, "5")
            .iter()
            .map(|t| t.status)
            .collect();
        assert_eq!(
            statuses,
            [TaskStatus::Failed, TaskStatus::Skipped, TaskStatus::Skipped]
        );
        assert_eq!(manager.update_not_executed_tasks_to_skipped(TaskType::Qubit, "5"), 0);
    }

    #[test]
    fn test_containers_scoped_to_qids() {
        let manager = TaskStateManager::new("exec-1", &["0", "1", "0-1"]);
        assert!(manager.calib_data().qubit.contains_key("0"));
        assert!(manager.calib_data().coupling.contains_key("0-1"));
        assert_eq!(manager.all_tasks().count(), 0);
    }
}
