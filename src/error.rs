//! Library-level error type and its mapping to CLI exit codes.

use thiserror::Error;

use forgeflow_engine::{EngineError, RunFailure};
use forgeflow_interrupt::InterruptError;
use forgeflow_journal::JournalError;
use forgeflow_preflight::PreflightError;
use forgeflow_utils::error::{ConfigError, ErrorCategory, UserFriendlyError};
use forgeflow_utils::exit_codes::ExitCode;

#[derive(Debug, Error)]
pub enum ForgeflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Run(#[from] RunFailure),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Interrupt(#[from] InterruptError),

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error(transparent)]
    Preflight(#[from] PreflightError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn engine_exit_code(err: &EngineError) -> ExitCode {
    match err {
        EngineError::Preflight { .. } => ExitCode::PREFLIGHT_FAILED,
        EngineError::HumanResponseTimeout { .. } => ExitCode::HUMAN_TIMEOUT,
        EngineError::ApprovalRejected { .. } => ExitCode::APPROVAL_REJECTED,
        EngineError::Cancelled => ExitCode::CANCELLED,
        EngineError::Locked { .. } | EngineError::Journal(JournalError::Locked { .. }) => {
            ExitCode::LOCK_HELD
        }
        EngineError::Setup(_) | EngineError::UnknownRun { .. } => ExitCode::CLI_ARGS,
        EngineError::Interrupt(err) => interrupt_exit_code(err),
        EngineError::Generation { .. }
        | EngineError::Activity { .. }
        | EngineError::NonDeterminism { .. }
        | EngineError::PreviouslyFailed { .. }
        | EngineError::Journal(_) => ExitCode::RUN_FAILED,
    }
}

fn interrupt_exit_code(err: &InterruptError) -> ExitCode {
    match err {
        InterruptError::Journal(JournalError::Locked { .. }) => ExitCode::LOCK_HELD,
        InterruptError::Journal(_) | InterruptError::Notify { .. } => ExitCode::INTERNAL,
        InterruptError::QuestionAlreadyPending { .. }
        | InterruptError::InvalidResponse { .. }
        | InterruptError::UnknownRun { .. } => ExitCode::CLI_ARGS,
    }
}

impl ForgeflowError {
    /// Stable process exit code for this error.
    #[must_use]
    pub fn to_exit_code(&self) -> ExitCode {
        match self {
            Self::Config(_) => ExitCode::CLI_ARGS,
            Self::Run(failure) => engine_exit_code(&failure.cause),
            Self::Engine(err) => engine_exit_code(err),
            Self::Interrupt(err) => interrupt_exit_code(err),
            Self::Journal(JournalError::Locked { .. }) => ExitCode::LOCK_HELD,
            Self::Journal(JournalError::InvalidRunId { .. }) => ExitCode::CLI_ARGS,
            Self::Journal(_) | Self::Io(_) => ExitCode::INTERNAL,
            Self::Preflight(_) => ExitCode::CLI_ARGS,
        }
    }

    fn engine_cause(&self) -> Option<&EngineError> {
        match self {
            Self::Run(failure) => Some(&failure.cause),
            Self::Engine(err) => Some(err),
            _ => None,
        }
    }
}

impl UserFriendlyError for ForgeflowError {
    fn user_message(&self) -> String {
        match self {
            Self::Config(err) => err.user_message(),
            Self::Run(failure) => format!(
                "Run '{}' stopped at step '{}': {}",
                failure.run_id, failure.step, failure.message
            ),
            Self::Engine(err) => err.to_string(),
            Self::Interrupt(err) => format!("Could not deliver the response: {err}"),
            Self::Journal(err) => format!("Run history could not be read or written: {err}"),
            Self::Preflight(err) => format!("Preflight checks are misconfigured: {err}"),
            Self::Io(err) => format!("File system operation failed: {err}"),
        }
    }

    fn context(&self) -> Option<String> {
        if let Self::Config(err) = self {
            return err.context();
        }
        match self.engine_cause()? {
            EngineError::Preflight { results, .. } => {
                let failed: Vec<&str> = results
                    .iter()
                    .filter(|r| !r.passed)
                    .map(|r| r.name.as_str())
                    .collect();
                Some(format!("Failed checks: {}", failed.join(", ")))
            }
            EngineError::HumanResponseTimeout { question_id, kind } => Some(format!(
                "The {kind} question '{question_id}' expired before anyone answered."
            )),
            EngineError::NonDeterminism { .. } => Some(
                "The recorded history no longer matches the run's control flow; this usually means the step plan or code changed between attempts.".to_string(),
            ),
            EngineError::Locked { run_id } => {
                Some(format!("Another forgeflow process holds the lock for '{run_id}'."))
            }
            _ => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        if let Self::Config(err) = self {
            return err.suggestions();
        }
        if let Self::Interrupt(InterruptError::InvalidResponse { .. }) = self {
            return vec!["Run `forgeflow status <run-id>` to see the pending question and its options".to_string()];
        }
        match self.engine_cause() {
            Some(EngineError::Preflight { .. }) => vec![
                "Run `forgeflow doctor` to see every check".to_string(),
                "Install missing binaries or set the required environment variables".to_string(),
            ],
            Some(EngineError::HumanResponseTimeout { .. }) => vec![
                "Raise interrupts.timeout_hours".to_string(),
                "Enable interrupts.auto_proceed_on_timeout to take the recommended option".to_string(),
            ],
            Some(EngineError::Locked { .. }) => {
                vec!["Wait for the other process to finish, then retry".to_string()]
            }
            Some(EngineError::UnknownRun { .. }) => {
                vec!["Check the run id and --state-dir".to_string()]
            }
            Some(err) if err.is_retryable() => vec!["Resume the run to try again".to_string()],
            _ => Vec::new(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) => ErrorCategory::Configuration,
            Self::Interrupt(_) => ErrorCategory::HumanInput,
            Self::Journal(JournalError::Locked { .. }) => ErrorCategory::Concurrency,
            Self::Journal(_) | Self::Io(_) => ErrorCategory::Persistence,
            Self::Preflight(_) => ErrorCategory::Preflight,
            Self::Run(_) | Self::Engine(_) => match self.engine_cause() {
                Some(EngineError::Preflight { .. }) => ErrorCategory::Preflight,
                Some(EngineError::Generation { .. }) => ErrorCategory::Generation,
                Some(
                    EngineError::HumanResponseTimeout { .. } | EngineError::ApprovalRejected { .. },
                ) => ErrorCategory::HumanInput,
                Some(EngineError::Cancelled) => ErrorCategory::Cancellation,
                Some(EngineError::Locked { .. }) => ErrorCategory::Concurrency,
                Some(EngineError::Setup(_)) => ErrorCategory::Configuration,
                _ => ErrorCategory::Persistence,
            },
        }
    }
}
