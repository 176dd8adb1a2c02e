use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

use forgeflow_utils::types::{
    PendingQuestion, QuestionResolution, RunInput, RunStatus, StepPlan,
};

use crate::{HistoryEvent, JournalEntry};

/// Recorded outcome of one activity invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivityRecord {
    Completed {
        name: String,
        output: serde_json::Value,
    },
    Failed {
        name: String,
        error: String,
        retryable: bool,
    },
}

impl ActivityRecord {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Completed { name, .. } | Self::Failed { name, .. } => name,
        }
    }
}

/// Replay view of a run's journal.
///
/// Command-keyed maps are indexed by the workflow command sequence number.
#[derive(Debug, Clone, Default)]
pub struct RunHistory {
    pub input: Option<RunInput>,
    pub phase: Option<String>,
    pub plan: Option<StepPlan>,
    pub clock_reads: HashMap<u64, DateTime<Utc>>,
    pub activities: HashMap<u64, ActivityRecord>,
    pub sub_runs: HashMap<u64, (String, String)>,
    pub questions: BTreeMap<u64, PendingQuestion>,
    pub resolutions: HashMap<String, QuestionResolution>,
    pub cancel: Option<(DateTime<Utc>, String)>,
    pub finished: Option<FinishedRun>,
    pub event_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinishedRun {
    pub status: RunStatus,
    pub failed_step: Option<String>,
    pub error: Option<String>,
    pub outcome: Option<serde_json::Value>,
}

impl RunHistory {
    #[must_use]
    pub fn from_entries(entries: &[JournalEntry]) -> Self {
        let mut history = Self {
            event_count: entries.len(),
            ..Self::default()
        };

        for entry in entries {
            match &entry.event {
                HistoryEvent::RunStarted { input, phase, plan } => {
                    history.input = Some(input.clone());
                    history.phase = Some(phase.clone());
                    history.plan = Some(plan.clone());
                }
                HistoryEvent::ClockRead { seq, at } => {
                    history.clock_reads.insert(*seq, *at);
                }
                HistoryEvent::ActivityCompleted { seq, name, output } => {
                    history.activities.insert(
                        *seq,
                        ActivityRecord::Completed {
                            name: name.clone(),
                            output: output.clone(),
                        },
                    );
                }
                HistoryEvent::ActivityFailed {
                    seq,
                    name,
                    error,
                    retryable,
                } => {
                    history.activities.insert(
                        *seq,
                        ActivityRecord::Failed {
                            name: name.clone(),
                            error: error.clone(),
                            retryable: *retryable,
                        },
                    );
                }
                HistoryEvent::SubRunStarted {
                    seq,
                    step,
                    child_id,
                } => {
                    history
                        .sub_runs
                        .insert(*seq, (step.clone(), child_id.clone()));
                }
                HistoryEvent::QuestionPosted { seq, question } => {
                    history.questions.insert(*seq, question.clone());
                }
                HistoryEvent::QuestionResolved {
                    question_id,
                    resolution,
                } => {
                    // First resolution wins; later ones are stale duplicates.
                    history
                        .resolutions
                        .entry(question_id.clone())
                        .or_insert_with(|| resolution.clone());
                }
                HistoryEvent::CancelRequested { at, reason } => {
                    if history.cancel.is_none() {
                        history.cancel = Some((*at, reason.clone()));
                    }
                }
                HistoryEvent::RunFinished {
                    status,
                    failed_step,
                    error,
                    outcome,
                } => {
                    history.finished = Some(FinishedRun {
                        status: *status,
                        failed_step: failed_step.clone(),
                        error: error.clone(),
                        outcome: outcome.clone(),
                    });
                }
            }
        }

        history
    }

    /// The posted question that has no resolution yet.
    ///
    /// Questions are posted one at a time, so this is at most one question.
    #[must_use]
    pub fn pending_question(&self) -> Option<&PendingQuestion> {
        if self.finished.is_some() {
            return None;
        }
        self.questions
            .values()
            .rev()
            .find(|q| !self.resolutions.contains_key(&q.question_id))
    }

    #[must_use]
    pub fn resolution_for(&self, question_id: &str) -> Option<&QuestionResolution> {
        self.resolutions.get(question_id)
    }

    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        self.cancel.is_some()
    }

    /// Status derived from history alone.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        match (&self.finished, &self.input) {
            (Some(finished), _) => finished.status,
            (None, Some(_)) => RunStatus::Running,
            (None, None) => RunStatus::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgeflow_utils::test_support::{epoch, sample_input};
    use forgeflow_utils::types::{
        QuestionKind, QuestionPayload, QuestionResponse, QuestionStatus, ResponseType,
    };

    fn entry(seq: u64, event: HistoryEvent) -> JournalEntry {
        JournalEntry {
            seq,
            recorded_at: epoch(),
            event,
        }
    }

    fn question(id: &str) -> PendingQuestion {
        PendingQuestion {
            question_id: id.to_string(),
            run_id: "run-1".to_string(),
            kind: QuestionKind::Approval,
            payload: QuestionPayload::Approval {
                summary: "ship it?".to_string(),
                options: Vec::new(),
            },
            posted_at: epoch(),
            timeout_at: epoch() + chrono::Duration::hours(24),
            status: QuestionStatus::Pending,
        }
    }

    fn answered(id: &str) -> QuestionResolution {
        QuestionResolution::Responded {
            response: QuestionResponse {
                question_id: id.to_string(),
                response_type: ResponseType::Approve,
                selected_option: None,
                custom_text: None,
                responded_by: "reviewer".to_string(),
            },
        }
    }

    #[test]
    fn test_projection_tracks_pending_question() {
        let entries = vec![
            entry(
                0,
                HistoryEvent::RunStarted {
                    input: sample_input("run-1"),
                    phase: "code_generation".to_string(),
                    plan: StepPlan { steps: Vec::new() },
                },
            ),
            entry(
                1,
                HistoryEvent::QuestionPosted {
                    seq: 4,
                    question: question("q-a"),
                },
            ),
        ];
        let history = RunHistory::from_entries(&entries);
        assert_eq!(history.status(), RunStatus::Running);
        assert_eq!(
            history.pending_question().map(|q| q.question_id.as_str()),
            Some("q-a")
        );

        let mut entries = entries;
        entries.push(entry(
            2,
            HistoryEvent::QuestionResolved {
                question_id: "q-a".to_string(),
                resolution: answered("q-a"),
            },
        ));
        let history = RunHistory::from_entries(&entries);
        assert!(history.pending_question().is_none());
        assert!(history.resolution_for("q-a").is_some());
    }

    #[test]
    fn test_first_resolution_wins() {
        let entries = vec![
            entry(
                0,
                HistoryEvent::QuestionResolved {
                    question_id: "q-a".to_string(),
                    resolution: answered("q-a"),
                },
            ),
            entry(
                1,
                HistoryEvent::QuestionResolved {
                    question_id: "q-a".to_string(),
                    resolution: QuestionResolution::TimedOut,
                },
            ),
        ];
        let history = RunHistory::from_entries(&entries);
        assert!(matches!(
            history.resolution_for("q-a"),
            Some(QuestionResolution::Responded { .. })
        ));
    }

    #[test]
    fn test_finished_status_and_cancel() {
        let entries = vec![
            entry(
                0,
                HistoryEvent::CancelRequested {
                    at: epoch(),
                    reason: "operator".to_string(),
                },
            ),
            entry(
                1,
                HistoryEvent::RunFinished {
                    status: RunStatus::Cancelled,
                    failed_step: None,
                    error: None,
                    outcome: None,
                },
            ),
        ];
        let history = RunHistory::from_entries(&entries);
        assert!(history.is_cancelled());
        assert_eq!(history.status(), RunStatus::Cancelled);
    }
}
