//! Figure and raw-data artifact storage.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::error::CalibResult;
use crate::task::Task;

/// A rendered figure produced by a task.
#[derive(Debug, Clone, PartialEq)]
pub struct Figure {
    pub name: String,
    /// File extension, e.g. `png` or `json`.
    pub format: String,
    pub data: Vec<u8>,
}

impl Figure {
    pub fn new(name: impl Into<String>, format: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            format: format.into(),
            data,
        }
    }
}

/// Raw measurement data produced by a task.
#[derive(Debug, Clone, PartialEq)]
pub struct RawData {
    pub name: String,
    pub data: serde_json::Value,
}

impl RawData {
    pub fn new(name: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// Persists task artifacts and returns where they were stored.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn save_figures(&self, execution_id: &str, task: &Task, figures: &[Figure]) -> CalibResult<Vec<PathBuf>>;

    async fn save_raw_data(&self, execution_id: &str, task: &Task, raw: &[RawData]) -> CalibResult<Vec<PathBuf>>;
}

/// Writes artifacts under `root/<execution_id>/<qid or "global">/`.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn task_dir(&self, execution_id: &str, task: &Task) -> PathBuf {
        let scope = if task.qid.is_empty() {
            "global"
        } else {
            task.qid.as_str()
        };
        self.root.join(sanitize(execution_id)).join(sanitize(scope))
    }
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if c.is_ascii_alphanumeric() || "-_.".contains(c) { c } else { '_' })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn save_figures(&self, execution_id: &str, task: &Task, figures: &[Figure]) -> CalibResult<Vec<PathBuf>> {
        if figures.is_empty() {
            return Ok(Vec::new());
        }
        let dir = self.task_dir(execution_id, task).join("fig");
        fs::create_dir_all(&dir).await?;

        let mut paths = Vec::with_capacity(figures.len());
        for figure in figures {
            let path = dir.join(format!(
                "{}_{}.{}",
                sanitize(&task.name),
                sanitize(&figure.name),
                sanitize(&figure.format)
            ));
            fs::write(&path, &figure.data).await?;
            paths.push(path);
        }
        Ok(paths)
    }

    async fn save_raw_data(&self, execution_id: &str, task: &Task, raw: &[RawData]) -> CalibResult<Vec<PathBuf>> {
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        let dir = self.task_dir(execution_id, task).join("raw_data");
        fs::create_dir_all(&dir).await?;

        let mut paths = Vec::with_capacity(raw.len());
        for item in raw {
            let path = dir.join(format!("{}_{}.json", sanitize(&task.name), sanitize(&item.name)));
            fs::write(&path, serde_json::to_vec_pretty(&item.data)?).await?;
            paths.push(path);
        }
        Ok(paths)
    }
}

/// Drops every artifact.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardArtifacts;

#[async_trait]
impl ArtifactStore for DiscardArtifacts {
    async fn save_figures(&self, _execution_id: &str, _task: &Task, _figures: &[Figure]) -> CalibResult<Vec<PathBuf>> {
        Ok(Vec::new())
    }

    async fn save_raw_data(&self, _execution_id: &str, _task: &Task, _raw: &[RawData]) -> CalibResult<Vec<PathBuf>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskType;

    #[tokio::test]
    async fn test_fs_artifact_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let task = Task::new("CheckRabi", TaskType::Qubit, "5");

        let figs = store
            .save_figures("exec-1", &task, &[Figure::new("fit", "png", vec![1, 2, 3])])
            .await
            .unwrap();
        assert_eq!(figs, [dir.path().join("exec-1/5/fig/CheckRabi_fit.png")]);
        assert_eq!(std::fs::read(&figs[0]).unwrap(), [1, 2, 3]);

        let global = Task::new("CheckChip", TaskType::Global, "");
        let raw = store
            .save_raw_data("exec-1", &global, &[RawData::new("iq", serde_json::json!([0.1, 0.2]))])
            .await
            .unwrap();
        assert!(raw[0].starts_with(dir.path().join("exec-1/global/raw_data")));
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("../etc"), "_etc");
        assert_eq!(sanitize("0-1"), "0-1");
        assert_eq!(sanitize("a b/c"), "a_b_c");
    }
}
