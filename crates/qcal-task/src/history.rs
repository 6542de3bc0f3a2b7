//! Append-only history of task outcomes.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::CalibResult;
use crate::record::{ExecutionRecord, ExecutionStatus};
use crate::task::Task;

/// The execution context a task ran under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub execution_id: String,
    pub project: String,
    pub status: ExecutionStatus,
    pub version: u64,
}

impl From<&ExecutionRecord> for ExecutionSnapshot {
    fn from(record: &ExecutionRecord) -> Self {
        Self {
            execution_id: record.execution_id.clone(),
            project: record.project.clone(),
            status: record.status,
            version: record.version,
        }
    }
}

/// One history line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub recorded_at: DateTime<Utc>,
    pub task: Task,
    pub execution: ExecutionSnapshot,
}

/// Write-only sink for task outcomes.
#[async_trait]
pub trait HistoryRecorder: Send + Sync {
    async fn record(&self, task: &Task, execution: &ExecutionSnapshot) -> CalibResult<()>;
}

/// Keeps history in memory.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    entries: Mutex<Vec<HistoryEntry>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl HistoryRecorder for MemoryHistory {
    async fn record(&self, task: &Task, execution: &ExecutionSnapshot) -> CalibResult<()> {
        self.entries.lock().await.push(HistoryEntry {
            recorded_at: Utc::now(),
            task: task.clone(),
            execution: execution.clone(),
        });
        Ok(())
    }
}

/// Appends history as JSON lines to a file.
#[derive(Debug)]
pub struct JsonlHistory {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlHistory {
    pub async fn new(path: impl AsRef<Path>) -> CalibResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every entry back, skipping unparsable lines.
    pub async fn read_all(&self) -> CalibResult<Vec<HistoryEntry>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut entries = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!("Skipping malformed history line in {:?}: {}", self.path, e),
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl HistoryRecorder for JsonlHistory {
    async fn record(&self, task: &Task, execution: &ExecutionSnapshot) -> CalibResult<()> {
        let entry = HistoryEntry {
            recorded_at: Utc::now(),
            task: task.clone(),
            execution: execution.clone(),
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskType;

    #[tokio::test]
    async fn test_jsonl_history_appends() {
        let dir = tempfile::tempdir().unwrap();
        let history = JsonlHistory::new(dir.path().join("history/tasks.jsonl")).await.unwrap();
        let record = ExecutionRecord::new("exec-1", "demo");
        let snapshot = ExecutionSnapshot::from(&record);

        history.record(&Task::new("A", TaskType::Qubit, "0"), &snapshot).await.unwrap();
        history.record(&Task::new("B", TaskType::Qubit, "0"), &snapshot).await.unwrap();

        let entries = history.read_all().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].task.name, "B");
        assert_eq!(entries[0].execution.execution_id, "exec-1");
    }

    #[tokio::test]
    async fn test_memory_history() {
        let history = MemoryHistory::new();
        let snapshot = ExecutionSnapshot::from(&ExecutionRecord::new("exec-1", "demo"));
        history.record(&Task::new("A", TaskType::Global, ""), &snapshot).await.unwrap();
        assert_eq!(history.entries().await.len(), 1);
    }
}
