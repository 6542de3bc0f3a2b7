//! JSON file-based execution record store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{CalibError, CalibResult};
use crate::record::ExecutionRecord;
use crate::store::ExecutionStore;

/// Stores each execution record as `<base_dir>/<execution_id>.json`.
///
/// Version checks are serialized within one process. Suitable for
/// development and single-host sessions; use [`SqliteStore`] when several
/// processes write the same record.
///
/// [`SqliteStore`]: crate::store::SqliteStore
pub struct JsonStore {
    base_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonStore {
    /// Create a new JSON store at the given path.
    pub async fn new(base_dir: impl AsRef<Path>) -> CalibResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir).await?;
        Ok(Self {
            base_dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Create a new JSON store in a temporary directory.
    pub async fn temp() -> CalibResult<Self> {
        let temp_dir = std::env::temp_dir().join(format!("qcal-records-{}", uuid::Uuid::new_v4()));
        Self::new(temp_dir).await
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn record_path(&self, execution_id: &str) -> CalibResult<PathBuf> {
        if execution_id.is_empty()
            || execution_id.contains(['/', '\\'])
            || execution_id.starts_with('.')
        {
            return Err(CalibError::Config(format!(
                "execution id '{execution_id}' cannot be used as a file name"
            )));
        }
        Ok(self.base_dir.join(format!("{execution_id}.json")))
    }

    async fn read(&self, path: &Path) -> CalibResult<Option<ExecutionRecord>> {
        match fs::read_to_string(path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CalibError::Io(e)),
        }
    }

    /// Write through a temporary file and rename, so readers never see a
    /// partially written record.
    async fn write_atomic(&self, path: &Path, record: &ExecutionRecord) -> CalibResult<()> {
        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4()));
        fs::write(&tmp, serde_json::to_string_pretty(record)?).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for JsonStore {
    async fn load(&self, execution_id: &str) -> CalibResult<Option<ExecutionRecord>> {
        let path = self.record_path(execution_id)?;
        self.read(&path).await
    }

    async fn insert_new(&self, record: &ExecutionRecord) -> CalibResult<bool> {
        let path = self.record_path(&record.execution_id)?;
        let _guard = self.write_lock.lock().await;

        // Link a fully written temp file into place; the link fails if the
        // record already exists, so readers never see a partial file.
        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4()));
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(serde_json::to_string_pretty(record)?.as_bytes())
            .await?;
        file.flush().await?;
        drop(file);

        let linked = fs::hard_link(&tmp, &path).await;
        fs::remove_file(&tmp).await?;
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(CalibError::Io(e)),
        }
    }

    async fn replace_if_version(&self, record: &ExecutionRecord, expected_version: u64) -> CalibResult<bool> {
        let path = self.record_path(&record.execution_id)?;
        let _guard = self.write_lock.lock().await;

        match self.read(&path).await? {
            Some(stored) if stored.version == expected_version => {
                self.write_atomic(&path, record).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_ids(&self) -> CalibResult<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}
