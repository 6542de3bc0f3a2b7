//! Error handling for calibration task execution.

use thiserror::Error;

use crate::task::TaskStatus;

/// Result type for task and execution record operations.
pub type CalibResult<T> = Result<T, CalibError>;

/// Errors raised while running calibration tasks or updating execution records.
#[derive(Error, Debug)]
pub enum CalibError {
    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A task result failed a quality gate.
    #[error("Validation failed for {task} on '{qid}': {reason}")]
    Validation {
        task: String,
        qid: String,
        reason: String,
    },

    /// A task step failed.
    #[error("Task {task} failed on '{qid}': {message}")]
    Runtime {
        task: String,
        qid: String,
        message: String,
    },

    /// A task exceeded its timeout.
    #[error("Task {task} on '{qid}' timed out after {seconds:.1}s")]
    Timeout { task: String, qid: String, seconds: f64 },

    /// Status transition out of a terminal state or backwards.
    #[error("Invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// Task not found in the state manager.
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Execution record not found.
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    /// Execution record already reached a terminal status.
    #[error("Execution {0} is terminal and cannot be modified")]
    ExecutionTerminal(String),

    /// The stored record version moved since it was read.
    #[error("Version conflict on execution {execution_id}: expected {expected}")]
    VersionConflict { execution_id: String, expected: u64 },

    /// Optimistic lock retries were exhausted.
    #[error("Gave up updating execution {execution_id} after {attempts} attempts")]
    RetriesExhausted { execution_id: String, attempts: u32 },

    /// Another session holds the hardware lock for this project.
    #[error("Calibration session already running for project {0}")]
    SessionLocked(String),

    /// SQLite database error.
    #[error("Database error: {0}")]
    Database(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl CalibError {
    /// Whether the error is a task-scoped failure (validation, runtime or timeout).
    pub fn is_task_failure(&self) -> bool {
        matches!(
            self,
            CalibError::Validation { .. } | CalibError::Runtime { .. } | CalibError::Timeout { .. }
        )
    }
}

impl From<rusqlite::Error> for CalibError {
    fn from(e: rusqlite::Error) -> Self {
        CalibError::Database(e.to_string())
    }
}
