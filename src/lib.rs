//! forgeflow - durable orchestration for AI code-generation runs
//!
//! A run takes a task from an issue tracker and a technical plan, generates
//! code, validates it in a resource-limited sandbox, retries with the failure
//! analysis threaded into the next attempt, optionally pauses for a human
//! decision, and finishes with a branch, commit and pull request.
//!
//! Every external effect is recorded in an append-only run journal. A crashed
//! or restarted process resumes a run by replaying that journal, so no
//! completed step is repeated and no answered question is asked again.
//!
//! forgeflow can be used in two ways:
//! - **Library**: build an [`Orchestrator`] with your own [`IssueTracker`],
//!   [`VersionControl`] and [`Generator`] implementations.
//! - **CLI**: inspect and steer recorded runs (`status`, `history`,
//!   `respond`, `cancel`) and run environment checks (`doctor`).
//!
//! # Quick Start (Library)
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use forgeflow::{Config, Orchestrator, RunInput};
//! # async fn demo(
//! #     tracker: Arc<dyn forgeflow::IssueTracker>,
//! #     vcs: Arc<dyn forgeflow::VersionControl>,
//! #     generator: Arc<dyn forgeflow::Generator>,
//! #     input: RunInput,
//! # ) -> anyhow::Result<()> {
//! let config = Config::builder().max_retries(3).build()?;
//! let orchestrator = Orchestrator::builder(config)
//!     .tracker(tracker)
//!     .vcs(vcs)
//!     .generator(generator)
//!     .file_backed()
//!     .build()?;
//! let result = orchestrator.run(input).await?;
//! println!("opened {:?}", result.pull_request);
//! # Ok(())
//! # }
//! ```
//!
//! # JSON Contracts
//!
//! CLI JSON output is emitted in JCS (RFC 8785) canonical form. Use
//! [`emit_jcs`] for the same guarantees in your own integrations.

pub mod cli;
mod error;

pub use error::ForgeflowError;

pub use forgeflow_config::{CliArgs, Config, ConfigBuilder};
pub use forgeflow_engine::{
    ActivityError, ActivityErrorKind, Ambiguity, EngineError, FailureAnalysis, FailureAnalyzer,
    GenerationRequest, Generator, HeuristicFailureAnalyzer, IssueTracker, Orchestrator,
    OrchestratorBuilder, PullRequestRequest, RunFailure, RunResult, StepName, VersionControl,
};
pub use forgeflow_interrupt::{Delivery, DiscardReason, QuestionNotifier, SignalRouter};
pub use forgeflow_journal::{FileJournal, HistoryEvent, InMemoryJournal, JournalStore};
pub use forgeflow_preflight::{PreflightReport, PreflightValidator};
pub use forgeflow_progress::{ProgressLog, ProgressSnapshot};
pub use forgeflow_sandbox::{SandboxExecutor, ValidationExecutor};
pub use forgeflow_utils::canonicalization::emit_jcs;
pub use forgeflow_utils::exit_codes::ExitCode;
pub use forgeflow_utils::types::{
    GeneratedArtifactSet, PendingQuestion, PullRequestRef, QuestionKind, QuestionResponse,
    RepoRef, ResponseType, RunInput, RunStatus, TaskSnapshot, TechnicalPlan, ValidationResult,
};

/// Internal crates, not covered by semver.
#[doc(hidden)]
pub mod internal {
    pub use forgeflow_config as config;
    pub use forgeflow_engine as engine;
    pub use forgeflow_interrupt as interrupt;
    pub use forgeflow_journal as journal;
    pub use forgeflow_preflight as preflight;
    pub use forgeflow_progress as progress;
    pub use forgeflow_redaction as redaction;
    pub use forgeflow_sandbox as sandbox;
    pub use forgeflow_utils as utils;
}
