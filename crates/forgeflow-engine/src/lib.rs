//! Durable step orchestration for forgeflow runs.
//!
//! An [`Orchestrator`] drives a run through a fixed sequence of steps
//! ([`StepName::ALL`]). Each step's external effects go through a
//! [`WorkflowContext`], which records results in the run journal so that a
//! resumed run replays completed work instead of repeating it.
//!
//! Collaborators (issue tracker, VCS host, code generator) are traits in
//! [`collaborators`]; validation runs through a
//! [`forgeflow_sandbox::ValidationExecutor`].

pub mod collaborators;
mod context;
mod error;
mod generation;
mod orchestrator;
mod retry;
mod steps;

pub use collaborators::{
    Ambiguity, FailureAnalysis, FailureAnalyzer, GenerationRequest, Generator,
    HeuristicFailureAnalyzer, IssueTracker, PullRequestRequest, TrackerNotifier, VersionControl,
};
pub use context::{WorkflowContext, sub_run_id};
pub use error::{ActivityError, ActivityErrorKind, EngineError, RunFailure};
pub use generation::{GenerationLoop, LoopOutcome};
pub use orchestrator::{
    APPROVE_OPTION, Orchestrator, OrchestratorBuilder, REJECT_OPTION, RunResult, request_cancel,
};
pub use retry::RetryPolicy;
pub use steps::{StepName, plan_steps};
