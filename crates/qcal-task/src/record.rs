//! Session-wide execution records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calib_data::CalibData;
use crate::error::{CalibError, CalibResult};
use crate::task::{Task, TaskStatus};

/// Status of an execution record. Once terminal it never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    #[default]
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the terminal status of a record is derived from its task results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusPolicy {
    /// Failed iff at least one task failed.
    #[default]
    AnyFailed,
    /// Failed iff at least one task failed or was skipped.
    AnyFailedOrSkipped,
}

impl StatusPolicy {
    /// Terminal status for the given task results.
    pub fn terminal_status<'a>(&self, results: impl IntoIterator<Item = &'a TaskStatus>) -> ExecutionStatus {
        let failed = results.into_iter().any(|s| match self {
            StatusPolicy::AnyFailed => *s == TaskStatus::Failed,
            StatusPolicy::AnyFailedOrSkipped => matches!(s, TaskStatus::Failed | TaskStatus::Skipped),
        });
        if failed {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        }
    }
}

impl std::str::FromStr for StatusPolicy {
    type Err = CalibError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "any_failed" => Ok(StatusPolicy::AnyFailed),
            "any_failed_or_skipped" => Ok(StatusPolicy::AnyFailedOrSkipped),
            other => Err(CalibError::Config(format!("unknown status policy: {other}"))),
        }
    }
}

/// Aggregate record of one calibration session.
///
/// Written concurrently by many workers through
/// [`ExecutionRecordManager`](crate::manager::ExecutionRecordManager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub project: String,
    pub status: ExecutionStatus,
    /// Advances by one on every stored update.
    pub version: u64,
    #[serde(default)]
    pub calib_data: CalibData,
    /// Latest status per task, keyed `"type/qid/name"`.
    #[serde(default)]
    pub task_results: BTreeMap<String, TaskStatus>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub note: String,
    pub start_at: DateTime<Utc>,
    pub end_at: Option<DateTime<Utc>>,
    pub elapsed_time: Option<f64>,
}

impl ExecutionRecord {
    /// A new running record at version 0.
    pub fn new(execution_id: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            name: String::new(),
            project: project.into(),
            status: ExecutionStatus::Running,
            version: 0,
            calib_data: CalibData::new(),
            task_results: BTreeMap::new(),
            tags: Vec::new(),
            note: String::new(),
            start_at: Utc::now(),
            end_at: None,
            elapsed_time: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Fold a task's final state into the record.
    ///
    /// A completed task merges its outputs into the calibration data; any
    /// other outcome removes the values that task had written.
    pub fn apply_task(&mut self, task: &Task) {
        self.task_results.insert(task.key(), task.status);
        if !task.task_type.has_qid() {
            return;
        }
        if task.status == TaskStatus::Completed {
            self.calib_data
                .put(task.task_type, &task.qid, &task.output_parameters);
        } else {
            self.calib_data
                .remove_task_outputs(task.task_type, &task.qid, task.task_id);
        }
    }

    /// Move to a terminal status and stamp the end time.
    pub fn finish(&mut self, status: ExecutionStatus) -> CalibResult<()> {
        if self.status.is_terminal() {
            return Err(CalibError::ExecutionTerminal(self.execution_id.clone()));
        }
        let now = Utc::now();
        self.status = status;
        if status.is_terminal() {
            self.end_at = Some(now);
            self.elapsed_time =
                Some((now - self.start_at).num_microseconds().unwrap_or(0) as f64 / 1e6);
        }
        Ok(())
    }

    /// Count of task results per status.
    pub fn status_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for status in self.task_results.values() {
            *counts.entry(status.to_string()).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{OutputParameter, TaskType};

    #[test]
    fn test_policies() {
        let results = [TaskStatus::Completed, TaskStatus::Skipped];
        assert_eq!(StatusPolicy::AnyFailed.terminal_status(&results), ExecutionStatus::Completed);
        assert_eq!(
            StatusPolicy::AnyFailedOrSkipped.terminal_status(&results),
            ExecutionStatus::Failed
        );
        let results = [TaskStatus::Completed, TaskStatus::Failed];
        assert_eq!(StatusPolicy::AnyFailed.terminal_status(&results), ExecutionStatus::Failed);
        assert_eq!("any_failed_or_skipped".parse::<StatusPolicy>().unwrap(), StatusPolicy::AnyFailedOrSkipped);
        assert!("never".parse::<StatusPolicy>().is_err());
    }

    #[test]
    fn test_apply_task_merges_and_rolls_back() {
        let mut record = ExecutionRecord::new("exec-1", "demo");
        let mut task = Task::new("CheckT1", TaskType::Qubit, "5");
        let param = OutputParameter::new(41.0).with_provenance("exec-1", task.task_id);
        task.output_parameters.insert("t1".into(), param);
        task.transition(TaskStatus::Running, None).unwrap();
        task.transition(TaskStatus::Completed, None).unwrap();

        record.apply_task(&task);
        assert!(record.calib_data.get(TaskType::Qubit, "5", "t1").is_some());
        assert_eq!(record.task_results["qubit/5/CheckT1"], TaskStatus::Completed);

        let mut failed = task.clone();
        failed.status = TaskStatus::Failed;
        record.apply_task(&failed);
        assert!(record.calib_data.get(TaskType::Qubit, "5", "t1").is_none());
    }

    #[test]
    fn test_finish_is_one_way() {
        let mut record = ExecutionRecord::new("exec-1", "demo");
        record.finish(ExecutionStatus::Failed).unwrap();
        assert!(record.end_at.is_some());
        assert!(matches!(
            record.finish(ExecutionStatus::Completed),
            Err(CalibError::ExecutionTerminal(_))
        ));
        assert_eq!(record.status, ExecutionStatus::Failed);
    }
}
