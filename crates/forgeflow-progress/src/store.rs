use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

use forgeflow_utils::atomic_write::write_file_atomic;
use forgeflow_utils::canonicalization::emit_jcs;
use forgeflow_utils::paths;
use forgeflow_utils::types::{RunRecord, StepRecord};

const PROGRESS_FILE: &str = "progress.json";

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("progress I/O failed at {path}: {reason}")]
    Io { path: Utf8PathBuf, reason: String },

    #[error("progress record is malformed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("progress store unavailable: {0}")]
    Unavailable(String),
}

/// Everything stored for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub run: RunRecord,
    /// Ordered by step number, then name.
    pub steps: Vec<StepRecord>,
}

impl ProgressSnapshot {
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.step_name == name)
    }

    /// Insert or replace the record for `record.step_name`.
    pub fn upsert(&mut self, record: StepRecord) {
        match self.steps.iter_mut().find(|s| s.step_name == record.step_name) {
            Some(existing) => *existing = record,
            None => self.steps.push(record),
        }
        self.steps
            .sort_by(|a, b| (a.step_number, &a.step_name).cmp(&(b.step_number, &b.step_name)));
    }
}

/// Backing storage for the progress log.
pub trait ProgressStore: Send + Sync + std::fmt::Debug {
    fn load(&self, run_id: &str) -> Result<Option<ProgressSnapshot>, ProgressError>;
    fn save(&self, snapshot: &ProgressSnapshot) -> Result<(), ProgressError>;
}

#[derive(Debug, Default)]
pub struct InMemoryProgressStore {
    runs: RwLock<HashMap<String, ProgressSnapshot>>,
}

impl InMemoryProgressStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressStore for InMemoryProgressStore {
    fn load(&self, run_id: &str) -> Result<Option<ProgressSnapshot>, ProgressError> {
        let runs = self.runs.read().unwrap_or_else(|e| e.into_inner());
        Ok(runs.get(run_id).cloned())
    }

    fn save(&self, snapshot: &ProgressSnapshot) -> Result<(), ProgressError> {
        let mut runs = self.runs.write().unwrap_or_else(|e| e.into_inner());
        runs.insert(snapshot.run.run_id.clone(), snapshot.clone());
        Ok(())
    }
}

/// `<state>/runs/<run_id>/progress.json`, rewritten atomically on every save.
#[derive(Debug, Clone)]
pub struct FileProgressStore {
    root: Utf8PathBuf,
}

impl FileProgressStore {
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn progress_path(&self, run_id: &str) -> Utf8PathBuf {
        paths::run_dir(&self.root, run_id).join(PROGRESS_FILE)
    }

    fn io_err(path: &Utf8Path, reason: impl ToString) -> ProgressError {
        ProgressError::Io {
            path: path.to_owned(),
            reason: reason.to_string(),
        }
    }
}

impl ProgressStore for FileProgressStore {
    fn load(&self, run_id: &str) -> Result<Option<ProgressSnapshot>, ProgressError> {
        let path = self.progress_path(run_id);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::io_err(&path, e)),
        }
    }

    fn save(&self, snapshot: &ProgressSnapshot) -> Result<(), ProgressError> {
        let path = self.progress_path(&snapshot.run.run_id);
        if let Some(dir) = path.parent() {
            paths::ensure_dir_all(dir).map_err(|e| Self::io_err(dir, e))?;
        }
        let json = emit_jcs(snapshot).map_err(|e| Self::io_err(&path, e))?;
        write_file_atomic(&path, &json).map_err(|e| Self::io_err(&path, e))
    }
}
