//! Deterministic execution context for one run.
//!
//! Orchestration code does not talk to the outside world directly. Every
//! clock read, activity, sub-run and question goes through
//! [`WorkflowContext`], which numbers it with a command sequence number and
//! records its result in the journal. When a run is driven again from an
//! existing journal, recorded results are returned for the commands that
//! already happened and only the remainder executes for real.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use forgeflow_interrupt::HumanInterrupts;
use forgeflow_journal::{ActivityRecord, HistoryEvent, JournalError, JournalStore, RunHistory};
use forgeflow_utils::cancel::CancelSignal;
use forgeflow_utils::clock::Clock;
use forgeflow_utils::ids::derive_id;
use forgeflow_utils::logging::log_best_effort_failure;
use forgeflow_utils::types::{PendingQuestion, QuestionPayload, QuestionResolution};

use crate::error::{ActivityError, EngineError};
use crate::retry::RetryPolicy;

/// Child id for a sub-run started at `started` for `task_id`.
#[must_use]
pub fn sub_run_id(step: &str, task_id: &str, started: DateTime<Utc>) -> String {
    derive_id(step, &[step, task_id, &started.to_rfc3339()])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandKind {
    ClockRead,
    Activity,
    SubRun,
    Question,
}

impl CommandKind {
    const fn label(self) -> &'static str {
        match self {
            Self::ClockRead => "clock read",
            Self::Activity => "activity",
            Self::SubRun => "sub-run",
            Self::Question => "question",
        }
    }
}

#[derive(Debug)]
pub struct WorkflowContext {
    run_id: String,
    journal: Arc<dyn JournalStore>,
    history: RunHistory,
    next_seq: u64,
    clock: Arc<dyn Clock>,
    activity_retry: RetryPolicy,
    sub_run_retry: RetryPolicy,
    interrupts: HumanInterrupts,
    cancel: CancelSignal,
}

impl WorkflowContext {
    pub fn new(
        run_id: impl Into<String>,
        journal: Arc<dyn JournalStore>,
        history: RunHistory,
        clock: Arc<dyn Clock>,
        interrupts: HumanInterrupts,
        cancel: CancelSignal,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            journal,
            history,
            next_seq: 0,
            clock,
            activity_retry: RetryPolicy::default(),
            sub_run_retry: RetryPolicy::default(),
            interrupts,
            cancel,
        }
    }

    #[must_use]
    pub fn with_retry(mut self, activity: RetryPolicy, sub_run: RetryPolicy) -> Self {
        self.activity_retry = activity;
        self.sub_run_retry = sub_run;
        self
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// History the context was started from.
    #[must_use]
    pub fn history(&self) -> &RunHistory {
        &self.history
    }

    /// Cancellation requested either live or in the recorded history.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.history.is_cancelled()
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn record(&self, event: HistoryEvent) -> Result<(), EngineError> {
        self.journal.append(&self.run_id, event)?;
        Ok(())
    }

    fn recorded_kind(&self, seq: u64) -> Option<CommandKind> {
        if self.history.sub_runs.contains_key(&seq) {
            Some(CommandKind::SubRun)
        } else if self.history.activities.contains_key(&seq) {
            Some(CommandKind::Activity)
        } else if self.history.clock_reads.contains_key(&seq) {
            Some(CommandKind::ClockRead)
        } else if self.history.questions.contains_key(&seq) {
            Some(CommandKind::Question)
        } else {
            None
        }
    }

    fn expect_kind(&self, seq: u64, kind: CommandKind) -> Result<(), EngineError> {
        match self.recorded_kind(seq) {
            Some(found) if found != kind => Err(EngineError::non_determinism(
                seq,
                kind.label(),
                found.label(),
            )),
            _ => Ok(()),
        }
    }

    /// Current time, recorded on first execution.
    pub fn now(&mut self) -> Result<DateTime<Utc>, EngineError> {
        let seq = self.next_seq();
        self.expect_kind(seq, CommandKind::ClockRead)?;
        if let Some(at) = self.history.clock_reads.get(&seq) {
            return Ok(*at);
        }
        let at = self.clock.now();
        self.record(HistoryEvent::ClockRead { seq, at })?;
        Ok(at)
    }

    /// Run a side-effecting operation under the activity retry policy.
    pub async fn activity<T, F, Fut>(&mut self, name: &str, op: F) -> Result<T, EngineError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ActivityError>>,
    {
        let seq = self.next_seq();
        self.expect_kind(seq, CommandKind::Activity)?;
        let policy = self.activity_retry.clone();
        self.run_recorded(seq, name, &policy, op).await
    }

    /// Run a child operation with its own id and the sub-run retry policy.
    ///
    /// The child id is derived from `(step, task_id, start time)` and recorded,
    /// so re-driving a crashed run reuses the same id.
    pub async fn sub_run<T, F, Fut>(
        &mut self,
        step: &str,
        task_id: &str,
        mut op: F,
    ) -> Result<T, EngineError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, ActivityError>>,
    {
        let seq = self.next_seq();
        self.expect_kind(seq, CommandKind::SubRun)?;
        let child_id = match self.history.sub_runs.get(&seq) {
            Some((recorded, child_id)) if recorded == step => child_id.clone(),
            Some((recorded, _)) => {
                return Err(EngineError::non_determinism(seq, step, recorded.as_str()));
            }
            None => {
                let child_id = sub_run_id(step, task_id, self.clock.now());
                self.record(HistoryEvent::SubRunStarted {
                    seq,
                    step: step.to_string(),
                    child_id: child_id.clone(),
                })?;
                child_id
            }
        };
        debug!(run_id = %self.run_id, step = %step, child_id = %child_id, "Sub-run");

        let policy = self.sub_run_retry.clone();
        self.run_recorded(seq, step, &policy, || op(child_id.clone()))
            .await
    }

    async fn run_recorded<T, F, Fut>(
        &self,
        seq: u64,
        name: &str,
        policy: &RetryPolicy,
        op: F,
    ) -> Result<T, EngineError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ActivityError>>,
    {
        if let Some(record) = self.history.activities.get(&seq) {
            return replay_activity(seq, name, record);
        }

        match policy.run(name, op).await {
            Ok(value) => {
                let output = serde_json::to_value(&value).map_err(JournalError::from)?;
                self.record(HistoryEvent::ActivityCompleted {
                    seq,
                    name: name.to_string(),
                    output,
                })?;
                Ok(value)
            }
            Err(err) => {
                let message = forgeflow_redaction::redact_user_string(&err.message);
                let retryable = err.is_transient();
                self.record(HistoryEvent::ActivityFailed {
                    seq,
                    name: name.to_string(),
                    error: message.clone(),
                    retryable,
                })?;
                Err(EngineError::Activity {
                    name: name.to_string(),
                    message,
                    retryable,
                })
            }
        }
    }

    /// Post a question and suspend until it resolves.
    ///
    /// Only one question is outstanding per run. The returned resolution is
    /// recorded, so a replayed run gets the same answer without waiting.
    pub async fn ask(
        &mut self,
        payload: QuestionPayload,
    ) -> Result<(PendingQuestion, QuestionResolution), EngineError> {
        let seq = self.next_seq();
        self.expect_kind(seq, CommandKind::Question)?;
        let kind = payload.kind();

        let question = match self.history.questions.get(&seq) {
            Some(recorded) if recorded.kind == kind => recorded.clone(),
            Some(recorded) => {
                return Err(EngineError::non_determinism(
                    seq,
                    kind.as_ref(),
                    recorded.kind.as_ref(),
                ));
            }
            None => {
                let question =
                    self.interrupts
                        .new_question(&self.run_id, seq, payload, self.clock.now());
                if let Err(err) = self.interrupts.notify(&question).await {
                    log_best_effort_failure(&self.run_id, "notify_question", &err.to_string());
                }
                self.record(HistoryEvent::QuestionPosted {
                    seq,
                    question: question.clone(),
                })?;
                question
            }
        };

        if let Some(resolution) = self.history.resolution_for(&question.question_id) {
            return Ok((question, resolution.clone()));
        }

        let resolution = if self.is_cancelled() {
            QuestionResolution::Cancelled
        } else {
            let rx = self.interrupts.register(&question)?;
            // The ingress may have recorded an answer before the slot existed.
            let recorded = match self.journal.history(&self.run_id) {
                Ok(fresh) => fresh.resolution_for(&question.question_id).cloned(),
                Err(err) => {
                    self.interrupts
                        .router()
                        .clear(&self.run_id, &question.question_id);
                    return Err(err.into());
                }
            };
            if let Some(resolution) = recorded {
                self.interrupts
                    .router()
                    .clear(&self.run_id, &question.question_id);
                return Ok((question, resolution));
            }
            self.interrupts
                .await_response(&question, rx, &self.cancel)
                .await
        };

        // First resolution in the journal wins; adopt one recorded meanwhile
        // by another process instead of contradicting it.
        if let Some(recorded) = self
            .journal
            .history(&self.run_id)?
            .resolution_for(&question.question_id)
        {
            return Ok((question, recorded.clone()));
        }
        self.record(HistoryEvent::QuestionResolved {
            question_id: question.question_id.clone(),
            resolution: resolution.clone(),
        })?;
        Ok((question, resolution))
    }
}

fn replay_activity<T: DeserializeOwned>(
    seq: u64,
    name: &str,
    record: &ActivityRecord,
) -> Result<T, EngineError> {
    if record.name() != name {
        return Err(EngineError::non_determinism(seq, name, record.name()));
    }
    match record {
        ActivityRecord::Completed { output, .. } => serde_json::from_value(output.clone())
            .map_err(|e| {
                EngineError::non_determinism(seq, format!("{name} output"), e.to_string())
            }),
        ActivityRecord::Failed {
            error, retryable, ..
        } => Err(EngineError::Activity {
            name: name.to_string(),
            message: error.clone(),
            retryable: *retryable,
        }),
    }
}
