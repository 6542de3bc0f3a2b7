//! Per-project session locks.
//!
//! At most one calibration session may drive a project's hardware at a
//! time. The registry is an explicit value passed to every session, never
//! ambient process state.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;

use crate::error::{CalibError, CalibResult};

/// Registry of held session locks.
#[derive(Debug, Clone, Default)]
pub struct SessionLocks {
    held: Arc<Mutex<FxHashMap<String, DateTime<Utc>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `project`.
    ///
    /// Fails immediately with [`CalibError::SessionLocked`] when the lock is
    /// held; callers are never queued.
    pub fn try_acquire(&self, project: &str) -> CalibResult<SessionGuard> {
        let mut held = self
            .held
            .lock()
            .map_err(|e| CalibError::Config(format!("session lock poisoned: {e}")))?;
        if held.contains_key(project) {
            return Err(CalibError::SessionLocked(project.to_string()));
        }
        let acquired_at = Utc::now();
        held.insert(project.to_string(), acquired_at);
        tracing::debug!(project, "Acquired session lock");
        Ok(SessionGuard {
            locks: self.clone(),
            project: project.to_string(),
            acquired_at,
        })
    }

    /// Whether `project` is locked.
    pub fn is_locked(&self, project: &str) -> bool {
        self.held
            .lock()
            .map(|held| held.contains_key(project))
            .unwrap_or(true)
    }

    fn release(&self, project: &str) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(project);
            tracing::debug!(project, "Released session lock");
        }
    }
}

/// A held session lock; released on drop.
#[derive(Debug)]
pub struct SessionGuard {
    locks: SessionLocks,
    project: String,
    acquired_at: DateTime<Utc>,
}

impl SessionGuard {
    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.locks.release(&self.project);
    }
}
