use thiserror::Error;

use forgeflow_interrupt::InterruptError;
use forgeflow_journal::JournalError;
use forgeflow_sandbox::SandboxError;
use forgeflow_utils::types::{PreflightCheckResult, QuestionKind};

/// Failures surfaced by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// One or more preflight checks failed; nothing expensive ran.
    #[error("{message}")]
    Preflight {
        message: String,
        results: Vec<PreflightCheckResult>,
    },

    #[error("generation failed on attempt {attempt}: {message}")]
    Generation { attempt: u32, message: String },

    #[error("no response to {kind} question '{question_id}' before its deadline")]
    HumanResponseTimeout {
        question_id: String,
        kind: QuestionKind,
    },

    #[error("change rejected by {rejected_by}: {reason}")]
    ApprovalRejected { rejected_by: String, reason: String },

    /// An activity failed after its transient retries were used up, or
    /// failed with a non-retryable error.
    #[error("activity '{name}' failed: {message}")]
    Activity {
        name: String,
        message: String,
        retryable: bool,
    },

    #[error("run was cancelled")]
    Cancelled,

    /// Replayed control flow diverged from the recorded history.
    #[error("history mismatch at command {seq}: expected {expected}, found {found}")]
    NonDeterminism {
        seq: u64,
        expected: String,
        found: String,
    },

    #[error("run '{run_id}' is being driven by another process")]
    Locked { run_id: String },

    #[error("no run '{run_id}' has been recorded")]
    UnknownRun { run_id: String },

    /// A resumed run had already failed; the original error text is kept.
    #[error("run already failed: {message}")]
    PreviouslyFailed { message: String },

    #[error("orchestrator setup failed: {0}")]
    Setup(String),

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error(transparent)]
    Interrupt(#[from] InterruptError),
}

impl EngineError {
    /// Whether a caller may retry the same operation.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Activity { retryable, .. } => *retryable,
            Self::Locked { .. } => true,
            _ => false,
        }
    }

    pub(crate) fn non_determinism(
        seq: u64,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::NonDeterminism {
            seq,
            expected: expected.into(),
            found: found.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityErrorKind {
    /// Network blips, rate limits, busy sandboxes.
    Transient,
    NonRetryable,
}

/// Error returned by collaborators. The kind decides whether the activity
/// layer retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ActivityError {
    pub kind: ActivityErrorKind,
    pub message: String,
}

impl ActivityError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ActivityErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            kind: ActivityErrorKind::NonRetryable,
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.kind, ActivityErrorKind::Transient)
    }
}

impl From<SandboxError> for ActivityError {
    fn from(err: SandboxError) -> Self {
        if err.is_transient() {
            Self::transient(err.to_string())
        } else {
            Self::non_retryable(err.to_string())
        }
    }
}

/// Terminal failure of a run, raised at the orchestrator boundary.
#[derive(Debug, Error)]
#[error("run '{run_id}' failed at step '{step}': {message}")]
pub struct RunFailure {
    pub run_id: String,
    pub step: String,
    /// Redacted, human-readable description.
    pub message: String,
    #[source]
    pub cause: EngineError,
}

impl RunFailure {
    pub(crate) fn new(run_id: &str, step: impl Into<String>, cause: EngineError) -> Self {
        Self {
            run_id: run_id.to_string(),
            step: step.into(),
            message: forgeflow_redaction::redact_user_string(&cause.to_string()),
            cause,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        assert!(
            EngineError::Activity {
                name: "sync_task".into(),
                message: "503".into(),
                retryable: true
            }
            .is_retryable()
        );
        assert!(!EngineError::Cancelled.is_retryable());
        assert!(
            !EngineError::Preflight {
                message: "Preflight failed: git".into(),
                results: vec![]
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_sandbox_capacity_is_transient() {
        let err: ActivityError = SandboxError::CapacityExhausted { capacity: 2 }.into();
        assert!(err.is_transient());
        let err: ActivityError = SandboxError::GateClosed.into();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_run_failure_keeps_cause_and_redacts_message() {
        let token = forgeflow_utils::test_support::github_pat();
        let failure = RunFailure::new(
            "run-1",
            "create_branch",
            EngineError::Activity {
                name: "create_branch".into(),
                message: format!("401 for {token}"),
                retryable: false,
            },
        );
        assert!(!failure.message.contains(&token));
        assert!(std::error::Error::source(&failure).is_some());
        assert!(failure.to_string().contains("create_branch"));
    }
}
