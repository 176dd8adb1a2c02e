use std::sync::{Arc, Mutex};

use forgeflow_redaction::SecretRedactor;
use forgeflow_utils::clock::Clock;
use forgeflow_utils::logging::log_best_effort_failure;
use forgeflow_utils::types::{RunIdentity, RunRecord, RunStatus, StepRecord, StepStatus};

use crate::store::{ProgressError, ProgressSnapshot, ProgressStore};

/// Terminal state of a step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepEnd {
    pub status: StepStatus,
    pub error: Option<String>,
    pub metadata: serde_json::Value,
}

impl StepEnd {
    #[must_use]
    pub fn completed(metadata: serde_json::Value) -> Self {
        Self {
            status: StepStatus::Completed,
            error: None,
            metadata,
        }
    }

    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Failed,
            error: Some(error.into()),
            metadata: serde_json::Value::Null,
        }
    }
}

/// Idempotent recorder of step transitions.
#[derive(Debug, Clone)]
pub struct ProgressLog {
    store: Arc<dyn ProgressStore>,
    clock: Arc<dyn Clock>,
    redactor: Arc<SecretRedactor>,
    // Serializes read-modify-write cycles against the store.
    write_lock: Arc<Mutex<()>>,
}

impl ProgressLog {
    pub fn new(store: Arc<dyn ProgressStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            redactor: Arc::new(SecretRedactor::default()),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Use a redactor built from configuration.
    #[must_use]
    pub fn with_redactor(mut self, redactor: Arc<SecretRedactor>) -> Self {
        self.redactor = redactor;
        self
    }

    pub fn record_start(&self, identity: &RunIdentity, step: &str, number: u32) {
        self.update(identity, "record_start", |snapshot, now| {
            let started_at = snapshot
                .step(step)
                .and_then(|s| s.started_at)
                .unwrap_or(now);
            snapshot.upsert(StepRecord {
                run_id: identity.run_id.clone(),
                step_name: step.to_string(),
                step_number: number,
                status: StepStatus::InProgress,
                started_at: Some(started_at),
                completed_at: None,
                error: None,
                metadata: serde_json::Value::Null,
            });
            if snapshot.run.status == RunStatus::Pending {
                snapshot.run.status = RunStatus::Running;
            }
        });
    }

    pub fn record_end(&self, identity: &RunIdentity, step: &str, number: u32, end: StepEnd) {
        let error = end.error.map(|e| self.redactor.redact_string(&e));
        let metadata = self.redact_metadata(end.metadata);
        self.update(identity, "record_end", |snapshot, now| {
            let started_at = snapshot.step(step).and_then(|s| s.started_at).or(Some(now));
            snapshot.upsert(StepRecord {
                run_id: identity.run_id.clone(),
                step_name: step.to_string(),
                step_number: number,
                status: end.status,
                started_at,
                completed_at: Some(now),
                error,
                metadata,
            });
        });
    }

    pub fn record_skipped(&self, identity: &RunIdentity, step: &str, number: u32, reason: &str) {
        self.update(identity, "record_skipped", |snapshot, now| {
            snapshot.upsert(StepRecord {
                run_id: identity.run_id.clone(),
                step_name: step.to_string(),
                step_number: number,
                status: StepStatus::Skipped,
                started_at: None,
                completed_at: Some(now),
                error: None,
                metadata: serde_json::json!({ "reason": reason }),
            });
        });
    }

    /// Move the run to `status`. Terminal statuses are final.
    pub fn set_run_status(&self, identity: &RunIdentity, status: RunStatus) {
        self.update(identity, "set_run_status", |snapshot, _| {
            if !snapshot.run.status.is_terminal() {
                snapshot.run.status = status;
            }
        });
    }

    /// Current projection, or `None` when the run is unknown or unreadable.
    #[must_use]
    pub fn snapshot(&self, run_id: &str) -> Option<ProgressSnapshot> {
        match self.store.load(run_id) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log_best_effort_failure(run_id, "progress_snapshot", &e.to_string());
                None
            }
        }
    }

    fn update(
        &self,
        identity: &RunIdentity,
        operation: &str,
        apply: impl FnOnce(&mut ProgressSnapshot, chrono::DateTime<chrono::Utc>),
    ) {
        if let Err(e) = self.try_update(identity, apply) {
            log_best_effort_failure(&identity.run_id, operation, &e.to_string());
        }
    }

    fn try_update(
        &self,
        identity: &RunIdentity,
        apply: impl FnOnce(&mut ProgressSnapshot, chrono::DateTime<chrono::Utc>),
    ) -> Result<(), ProgressError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let now = self.clock.now();
        let mut snapshot = self.store.load(&identity.run_id)?.unwrap_or_else(|| ProgressSnapshot {
            run: RunRecord::new(identity, now),
            steps: Vec::new(),
        });

        apply(&mut snapshot, now);
        refresh_projection(&mut snapshot);
        snapshot.run.updated_at = now;
        self.store.save(&snapshot)
    }

    fn redact_metadata(&self, metadata: serde_json::Value) -> serde_json::Value {
        match metadata {
            serde_json::Value::String(s) => serde_json::Value::String(self.redactor.redact_string(&s)),
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(|v| self.redact_metadata(v)).collect())
            }
            serde_json::Value::Object(map) => serde_json::Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, self.redact_metadata(v)))
                    .collect(),
            ),
            other => other,
        }
    }
}

/// Recompute `current_step` and `progress_percent` from the step records.
fn refresh_projection(snapshot: &mut ProgressSnapshot) {
    let total = snapshot.run.total_steps;
    let highest = snapshot
        .steps
        .iter()
        .map(|s| s.step_number)
        .max()
        .unwrap_or(0);
    snapshot.run.current_step = snapshot.run.current_step.max(highest).min(total);

    let finished = snapshot
        .steps
        .iter()
        .filter(|s| s.status.is_finished() && s.step_number <= total)
        .count() as u32;
    snapshot.run.progress_percent = if total == 0 {
        0
    } else {
        (finished.min(total) * 100 / total) as u8
    };
}
