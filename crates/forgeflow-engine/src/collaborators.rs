//! Narrow interfaces to the services a run talks to.
//!
//! Concrete clients (issue tracker, VCS host, LLM) live outside this crate.
//! Every call made through these traits is executed as an activity: retried
//! on transient errors and recorded in the run journal.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use forgeflow_interrupt::{InterruptError, QuestionNotifier, render_question};
use forgeflow_utils::types::{
    FileEdit, GeneratedArtifactSet, PendingQuestion, PullRequestRef, QuestionOption, RepoRef,
    TaskSnapshot, TechnicalPlan, ValidationPhase, ValidationResult,
};

use crate::error::ActivityError;

#[async_trait]
pub trait IssueTracker: Send + Sync + std::fmt::Debug {
    async fn sync_task(&self, task_id: &str) -> Result<TaskSnapshot, ActivityError>;

    async fn update_status(&self, task_id: &str, status: &str) -> Result<(), ActivityError>;

    /// Returns the comment id.
    async fn post_comment(&self, task_id: &str, body: &str) -> Result<String, ActivityError>;

    async fn add_label(&self, task_id: &str, label: &str) -> Result<(), ActivityError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRequest {
    pub repo: RepoRef,
    pub branch: String,
    pub title: String,
    pub body: String,
    pub draft: bool,
    pub labels: Vec<String>,
}

#[async_trait]
pub trait VersionControl: Send + Sync + std::fmt::Debug {
    async fn create_branch(&self, repo: &RepoRef, name: &str, from: &str)
    -> Result<(), ActivityError>;

    /// Returns the commit id.
    async fn commit_files(
        &self,
        repo: &RepoRef,
        branch: &str,
        files: &[FileEdit],
        message: &str,
    ) -> Result<String, ActivityError>;

    async fn create_pull_request(
        &self,
        request: &PullRequestRequest,
    ) -> Result<PullRequestRef, ActivityError>;
}

/// Everything a generation attempt depends on.
///
/// Identical requests must be produced when a run is replayed, so this holds
/// only recorded values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub task: TaskSnapshot,
    pub plan: TechnicalPlan,
    pub attempt: u32,
    /// Failure analysis or chosen fix carried over from the previous attempt.
    pub error_context: String,
}

/// An open question found in the plan before generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ambiguity {
    pub question: String,
    pub options: Vec<QuestionOption>,
}

#[async_trait]
pub trait Generator: Send + Sync + std::fmt::Debug {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedArtifactSet, ActivityError>;

    /// Ambiguities worth asking a human about. The default finds none.
    async fn detect_ambiguities(
        &self,
        _task: &TaskSnapshot,
        _plan: &TechnicalPlan,
    ) -> Result<Vec<Ambiguity>, ActivityError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureAnalysis {
    pub failed_phase: ValidationPhase,
    pub summary: String,
    /// Appended to the next generation prompt.
    pub retry_prompt_enhancement: String,
    /// Candidate fixes. More than one lets a human choose.
    #[serde(default)]
    pub solutions: Vec<QuestionOption>,
}

#[async_trait]
pub trait FailureAnalyzer: Send + Sync + std::fmt::Debug {
    async fn analyze(
        &self,
        artifacts: &GeneratedArtifactSet,
        validation: &ValidationResult,
    ) -> Result<FailureAnalysis, ActivityError>;
}

/// Analyzer that needs no model: it quotes the tail of the failing phase.
#[derive(Debug, Clone, Copy)]
pub struct HeuristicFailureAnalyzer {
    pub max_log_lines: usize,
}

impl Default for HeuristicFailureAnalyzer {
    fn default() -> Self {
        Self { max_log_lines: 40 }
    }
}

impl HeuristicFailureAnalyzer {
    fn guidance(phase: ValidationPhase) -> &'static str {
        match phase {
            ValidationPhase::Install => {
                "Dependency installation failed. Only use packages that exist and pin compatible versions."
            }
            ValidationPhase::Lint => "Lint failed. Fix every reported lint violation.",
            ValidationPhase::Typecheck => {
                "Type checking failed. Make all types and signatures consistent."
            }
            ValidationPhase::Test => {
                "Tests failed. Fix the implementation so the failing tests pass without weakening them."
            }
            ValidationPhase::Infra => {
                "The sandbox could not run the code. Keep all edits inside the repository."
            }
        }
    }
}

#[async_trait]
impl FailureAnalyzer for HeuristicFailureAnalyzer {
    async fn analyze(
        &self,
        artifacts: &GeneratedArtifactSet,
        validation: &ValidationResult,
    ) -> Result<FailureAnalysis, ActivityError> {
        let phase = validation.failed_phase.unwrap_or(ValidationPhase::Infra);
        let log = validation
            .phase(phase)
            .map(|p| p.log.as_str())
            .unwrap_or(validation.log.as_str());
        let lines: Vec<&str> = log.lines().collect();
        let tail = lines[lines.len().saturating_sub(self.max_log_lines)..].join("\n");

        let summary = validation.summary();
        let enhancement = format!(
            "Attempt {} failed: {summary}.\n{}\n\nRelevant output:\n```\n{tail}\n```",
            artifacts.attempt + 1,
            Self::guidance(phase)
        );
        Ok(FailureAnalysis {
            failed_phase: phase,
            summary,
            retry_prompt_enhancement: enhancement,
            solutions: Vec::new(),
        })
    }
}

/// Posts each question as a comment on the run's task.
#[derive(Debug, Clone)]
pub struct TrackerNotifier {
    tracker: Arc<dyn IssueTracker>,
    task_id: String,
}

impl TrackerNotifier {
    pub fn new(tracker: Arc<dyn IssueTracker>, task_id: impl Into<String>) -> Self {
        Self {
            tracker,
            task_id: task_id.into(),
        }
    }
}

#[async_trait]
impl QuestionNotifier for TrackerNotifier {
    async fn question_posted(&self, question: &PendingQuestion) -> Result<(), InterruptError> {
        self.tracker
            .post_comment(&self.task_id, &render_question(question))
            .await
            .map(|_| ())
            .map_err(|e| InterruptError::Notify {
                question_id: question.question_id.clone(),
                reason: e.message,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgeflow_utils::types::{GenerationMetrics, PhaseOutcome};

    fn artifacts() -> GeneratedArtifactSet {
        GeneratedArtifactSet {
            attempt: 0,
            files: vec![],
            commit_message: "feat".into(),
            pr_title: "t".into(),
            pr_description: String::new(),
            metrics: GenerationMetrics::default(),
        }
    }

    #[tokio::test]
    async fn test_heuristic_analysis_quotes_failing_phase_tail() {
        let log: String = (0..100).map(|i| format!("line {i}\n")).collect();
        let validation = ValidationResult {
            success: false,
            phases: vec![PhaseOutcome {
                phase: ValidationPhase::Test,
                ran: true,
                success: false,
                exit_code: Some(101),
                timed_out: false,
                duration_ms: 5,
                log,
            }],
            failed_phase: Some(ValidationPhase::Test),
            duration_ms: 5,
            test_counts: None,
            timed_out: false,
            log: String::new(),
        };

        let analysis = HeuristicFailureAnalyzer { max_log_lines: 3 }
            .analyze(&artifacts(), &validation)
            .await
            .unwrap();
        assert_eq!(analysis.failed_phase, ValidationPhase::Test);
        assert!(analysis.retry_prompt_enhancement.contains("line 99"));
        assert!(analysis.retry_prompt_enhancement.contains("line 97"));
        assert!(!analysis.retry_prompt_enhancement.contains("line 96"));
        assert!(analysis.retry_prompt_enhancement.starts_with("Attempt 1 failed"));
    }

    #[tokio::test]
    async fn test_infra_failure_uses_combined_log() {
        let validation = ValidationResult::infra_failure("clone failed: timeout", 3);
        let analysis = HeuristicFailureAnalyzer::default()
            .analyze(&artifacts(), &validation)
            .await
            .unwrap();
        assert_eq!(analysis.failed_phase, ValidationPhase::Infra);
        assert!(analysis.retry_prompt_enhancement.contains("clone failed"));
    }
}
