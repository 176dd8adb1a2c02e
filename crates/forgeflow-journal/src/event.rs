use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgeflow_utils::types::{
    PendingQuestion, QuestionResolution, RunInput, RunStatus, StepPlan,
};

/// One recorded fact about a run.
///
/// Events carrying a `seq` are keyed by the workflow's deterministic command
/// counter, not the journal position; replay matches them by that counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryEvent {
    RunStarted {
        input: RunInput,
        phase: String,
        plan: StepPlan,
    },
    ClockRead {
        seq: u64,
        at: DateTime<Utc>,
    },
    ActivityCompleted {
        seq: u64,
        name: String,
        output: serde_json::Value,
    },
    ActivityFailed {
        seq: u64,
        name: String,
        error: String,
        retryable: bool,
    },
    SubRunStarted {
        seq: u64,
        step: String,
        child_id: String,
    },
    QuestionPosted {
        seq: u64,
        question: PendingQuestion,
    },
    QuestionResolved {
        question_id: String,
        resolution: QuestionResolution,
    },
    CancelRequested {
        at: DateTime<Utc>,
        reason: String,
    },
    RunFinished {
        status: RunStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failed_step: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        /// Serialized run result, returned as-is when a finished run is resumed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        outcome: Option<serde_json::Value>,
    },
}

impl HistoryEvent {
    /// Short label for logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::ClockRead { .. } => "clock_read",
            Self::ActivityCompleted { .. } => "activity_completed",
            Self::ActivityFailed { .. } => "activity_failed",
            Self::SubRunStarted { .. } => "sub_run_started",
            Self::QuestionPosted { .. } => "question_posted",
            Self::QuestionResolved { .. } => "question_resolved",
            Self::CancelRequested { .. } => "cancel_requested",
            Self::RunFinished { .. } => "run_finished",
        }
    }
}

/// A stored event with its journal position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub seq: u64,
    pub recorded_at: DateTime<Utc>,
    pub event: HistoryEvent,
}
