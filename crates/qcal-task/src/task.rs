//! Task types for calibration runs.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CalibError, CalibResult};

/// Unique identifier for a calibration task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new random task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a task ID from a string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a task calibrates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Chip-wide task with no qubit.
    Global,
    /// Single-qubit task.
    Qubit,
    /// Two-qubit task; the qid is a `"control-target"` pair.
    Coupling,
    /// Infrastructure task with no qubit.
    System,
}

impl TaskType {
    /// Whether the task type carries a qid and writes calibration data.
    pub fn has_qid(&self) -> bool {
        matches!(self, TaskType::Qubit | TaskType::Coupling)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Global => "global",
            TaskType::Qubit => "qubit",
            TaskType::Coupling => "coupling",
            TaskType::System => "system",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a task.
///
/// Status only moves forward: `scheduled → running → {completed, failed, skipped}`.
/// A scheduled task may also end directly (e.g. swept to skipped).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Scheduled,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    /// Check if the status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped
        )
    }

    /// Whether moving from `self` to `next` keeps the status monotonic.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match (self, next) {
            (TaskStatus::Scheduled, TaskStatus::Running) => true,
            (TaskStatus::Scheduled | TaskStatus::Running, next) => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Scheduled => "scheduled",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One named calibration result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputParameter {
    pub value: f64,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub description: String,
    /// Fit uncertainty of `value`.
    #[serde(default)]
    pub error: f64,
    pub calibrated_at: DateTime<Utc>,
    #[serde(default)]
    pub execution_id: String,
    #[serde(default)]
    pub task_id: Option<TaskId>,
}

impl OutputParameter {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            unit: String::new(),
            description: String::new(),
            error: 0.0,
            calibrated_at: Utc::now(),
            execution_id: String::new(),
            task_id: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_error(mut self, error: f64) -> Self {
        self.error = error;
        self
    }

    /// Stamp provenance: which execution and task produced the value.
    pub fn with_provenance(mut self, execution_id: impl Into<String>, task_id: TaskId) -> Self {
        self.execution_id = execution_id.into();
        self.task_id = Some(task_id);
        self
    }
}

/// Parameters keyed by name.
pub type ParameterMap = BTreeMap<String, OutputParameter>;

/// The execution-time record of one calibration operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub name: String,
    /// Qubit ID, `"control-target"` pair, or empty for global/system tasks.
    #[serde(default)]
    pub qid: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    /// Task this one depends on within the same chain.
    #[serde(default)]
    pub upstream_id: Option<TaskId>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub input_parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub output_parameters: ParameterMap,
    #[serde(default)]
    pub figure_paths: Vec<PathBuf>,
    #[serde(default)]
    pub raw_data_paths: Vec<PathBuf>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    /// Seconds between `start_at` and `end_at`.
    pub elapsed_time: Option<f64>,
}

impl Task {
    /// Create a scheduled task.
    pub fn new(name: impl Into<String>, task_type: TaskType, qid: impl Into<String>) -> Self {
        Self {
            task_id: TaskId::new(),
            name: name.into(),
            qid: qid.into(),
            task_type,
            status: TaskStatus::Scheduled,
            upstream_id: None,
            message: String::new(),
            input_parameters: BTreeMap::new(),
            output_parameters: ParameterMap::new(),
            figure_paths: Vec::new(),
            raw_data_paths: Vec::new(),
            start_at: None,
            end_at: None,
            elapsed_time: None,
        }
    }

    pub fn with_upstream(mut self, upstream_id: Option<TaskId>) -> Self {
        self.upstream_id = upstream_id;
        self
    }

    /// `"type/qid/name"`, unique within a run.
    pub fn key(&self) -> String {
        task_key(self.task_type, &self.qid, &self.name)
    }

    /// Move to `next`, stamping start and end times.
    ///
    /// `start_at` is set on entering `running`; entering a terminal status
    /// sets `end_at` and, when the task was started, `elapsed_time`.
    pub fn transition(&mut self, next: TaskStatus, message: Option<&str>) -> CalibResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(CalibError::InvalidTransition {
                task_id: self.task_id.to_string(),
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        if next == TaskStatus::Running {
            self.start_at = Some(now);
        }
        if next.is_terminal() {
            self.end_at = Some(now);
            self.elapsed_time = self
                .start_at
                .map(|start| (now - start).num_microseconds().unwrap_or(0) as f64 / 1e6);
        }
        if let Some(message) = message {
            self.message = message.to_string();
        }
        self.status = next;
        Ok(())
    }
}

/// `"type/qid/name"` key of a task.
pub fn task_key(task_type: TaskType, qid: &str, name: &str) -> String {
    format!("{task_type}/{qid}/{name}")
}
