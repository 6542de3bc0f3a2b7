//! qcal Calibration Task Execution
//!
//! Runs calibration tasks and converges their results into one execution
//! record per session:
//!
//! - [`TaskStateManager`] owns one worker's tasks and calibration data.
//! - [`TaskExecutor`] drives a [`CalibTask`] through preprocess, run,
//!   postprocess and the quality gates, rolling back outputs on failure.
//! - [`ExecutionRecordManager`] applies every record mutation through an
//!   optimistic-lock retry loop on top of an [`ExecutionStore`].
//! - [`CalibSession`] holds the per-project lock and hands out workers.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use qcal_task::{CalibConfig, CalibSession, SessionLocks};
//!
//! let locks = SessionLocks::new();
//! let session = CalibSession::open_persistent(CalibConfig::load(None)?, "exec-1", &locks).await?;
//!
//! let mut worker = session.worker(&["5"]);
//! worker.run_chain(&[Arc::new(CheckRabi), Arc::new(CheckT1)], "5").await?;
//!
//! let record = session.finish().await?;
//! println!("{}: {}", record.execution_id, record.status);
//! ```

pub mod artifact;
pub mod calib_data;
pub mod config;
pub mod error;
pub mod executor;
pub mod history;
pub mod lock;
pub mod manager;
pub mod record;
pub mod session;
pub mod state;
pub mod store;
pub mod task;

pub use artifact::{ArtifactStore, DiscardArtifacts, Figure, FsArtifactStore, RawData};
pub use calib_data::CalibData;
pub use config::{
    CalibConfig, LogFormat, LoggingConfig, ParameterBound, RetryConfig, StoreKind,
    ValidationConfig,
};
pub use error::{CalibError, CalibResult};
pub use executor::{
    CalibBackend, CalibTask, DEFAULT_TASK_TIMEOUT, NullBackend, PostProcessResult, RunResult,
    TaskContext, TaskExecutor, TaskOutcome,
};
pub use history::{ExecutionSnapshot, HistoryEntry, HistoryRecorder, JsonlHistory, MemoryHistory};
pub use lock::{SessionGuard, SessionLocks};
pub use manager::ExecutionRecordManager;
pub use record::{ExecutionRecord, ExecutionStatus, StatusPolicy};
pub use session::CalibSession;
pub use state::TaskStateManager;
pub use store::{ExecutionStore, JsonStore, MemoryStore, SqliteStore, open_store};
pub use task::{OutputParameter, ParameterMap, Task, TaskId, TaskStatus, TaskType, task_key};
