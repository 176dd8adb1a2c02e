//! Shared data model for runs, steps, questions, artifacts and validation.
//!
//! Everything here is plain serializable data. Ownership rules (who may
//! mutate what) are enforced by the crates that use these types: the
//! progress log owns [`StepRecord`]s, the orchestrator owns [`RunRecord`]
//! status, and the interrupt protocol owns [`PendingQuestion`] lifecycles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

// ============================================================================
// Run and step records
// ============================================================================

/// Lifecycle of a run. Terminal once it leaves `Running`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    /// Completed and skipped steps both count toward progress.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }
}

/// Stable identity of a run, carried into every progress write so the
/// log can create the run row on first contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    pub run_id: String,
    pub task_id: String,
    pub project_id: String,
    pub phase: String,
    pub total_steps: u32,
}

/// Denormalized current-state projection of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub task_id: String,
    pub project_id: String,
    pub phase: String,
    pub current_step: u32,
    pub total_steps: u32,
    pub progress_percent: u8,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    #[must_use]
    pub fn new(identity: &RunIdentity, now: DateTime<Utc>) -> Self {
        Self {
            run_id: identity.run_id.clone(),
            task_id: identity.task_id.clone(),
            project_id: identity.project_id.clone(),
            phase: identity.phase.clone(),
            current_step: 0,
            total_steps: identity.total_steps,
            progress_percent: 0,
            status: RunStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub run_id: String,
    pub step_name: String,
    pub step_number: u32,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

// ============================================================================
// Step plan
// ============================================================================

/// Whether a planned step runs. Decided once per run from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StepMode {
    Enabled,
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedStep {
    pub name: String,
    pub number: u32,
    #[serde(flatten)]
    pub mode: StepMode,
}

/// Fixed, numbered step sequence for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepPlan {
    pub steps: Vec<PlannedStep>,
}

impl StepPlan {
    #[must_use]
    pub fn total_steps(&self) -> u32 {
        self.steps.len() as u32
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PlannedStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    #[must_use]
    pub fn is_enabled(&self, name: &str) -> bool {
        matches!(self.get(name).map(|s| &s.mode), Some(StepMode::Enabled))
    }
}

// ============================================================================
// Run input and external snapshots
// ============================================================================

/// Repository that generated code is validated against and committed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
    pub base_branch: String,
    /// Clone URL or local path used to provision sandboxes.
    pub clone_url: String,
}

impl RepoRef {
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Parsed technical plan that drives generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechnicalPlan {
    pub title: String,
    pub summary: String,
    pub body: String,
    /// Answers gathered from clarification questions, in order.
    #[serde(default)]
    pub clarifications: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInput {
    pub run_id: String,
    pub task_id: String,
    pub project_id: String,
    pub repo: RepoRef,
    pub plan: TechnicalPlan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub labels: Vec<String>,
    pub team_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub number: u64,
    pub url: String,
}

// ============================================================================
// Questions
// ============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QuestionKind {
    Clarification,
    SolutionChoice,
    Approval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QuestionStatus {
    Pending,
    Answered,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: String,
    pub label: String,
    pub description: String,
    #[serde(default)]
    pub pros: Vec<String>,
    #[serde(default)]
    pub cons: Vec<String>,
    #[serde(default)]
    pub recommended: bool,
}

/// Question content, one closed shape per question kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuestionPayload {
    Clarification {
        question: String,
        options: Vec<QuestionOption>,
    },
    SolutionChoice {
        failed_phase: ValidationPhase,
        summary: String,
        options: Vec<QuestionOption>,
    },
    Approval {
        summary: String,
        options: Vec<QuestionOption>,
    },
}

impl QuestionPayload {
    #[must_use]
    pub const fn kind(&self) -> QuestionKind {
        match self {
            Self::Clarification { .. } => QuestionKind::Clarification,
            Self::SolutionChoice { .. } => QuestionKind::SolutionChoice,
            Self::Approval { .. } => QuestionKind::Approval,
        }
    }

    #[must_use]
    pub fn options(&self) -> &[QuestionOption] {
        match self {
            Self::Clarification { options, .. }
            | Self::SolutionChoice { options, .. }
            | Self::Approval { options, .. } => options,
        }
    }

    #[must_use]
    pub fn recommended(&self) -> Option<&QuestionOption> {
        self.options().iter().find(|o| o.recommended)
    }

    #[must_use]
    pub fn option(&self, id: &str) -> Option<&QuestionOption> {
        self.options().iter().find(|o| o.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingQuestion {
    pub question_id: String,
    pub run_id: String,
    pub kind: QuestionKind,
    pub payload: QuestionPayload,
    pub posted_at: DateTime<Utc>,
    pub timeout_at: DateTime<Utc>,
    pub status: QuestionStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResponseType {
    /// Picked one of the offered options.
    Answer,
    /// Free-form text instead of an option.
    Custom,
    Approve,
    Reject,
    /// Synthesized by the engine when a question timed out with auto-proceed on.
    AutoProceed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionResponse {
    pub question_id: String,
    pub response_type: ResponseType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_option: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_text: Option<String>,
    pub responded_by: String,
}

/// How a question was settled. Recorded in run history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum QuestionResolution {
    Responded { response: QuestionResponse },
    AutoProceeded { response: QuestionResponse },
    TimedOut,
    Cancelled,
}

impl QuestionResolution {
    /// The effective response, if any. `None` means nobody answered.
    #[must_use]
    pub fn response(&self) -> Option<&QuestionResponse> {
        match self {
            Self::Responded { response } | Self::AutoProceeded { response } => Some(response),
            Self::TimedOut | Self::Cancelled => None,
        }
    }

    #[must_use]
    pub const fn final_status(&self) -> QuestionStatus {
        match self {
            Self::Responded { .. } => QuestionStatus::Answered,
            Self::AutoProceeded { .. } | Self::TimedOut | Self::Cancelled => {
                QuestionStatus::Timeout
            }
        }
    }
}

// ============================================================================
// Generated artifacts
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FileAction {
    Create,
    Modify,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEdit {
    pub path: String,
    pub action: FileAction,
    /// Absent for deletes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationMetrics {
    pub model: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
}

/// One attempt's output. Superseded, never mutated, by later attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedArtifactSet {
    pub attempt: u32,
    pub files: Vec<FileEdit>,
    pub commit_message: String,
    pub pr_title: String,
    pub pr_description: String,
    #[serde(default)]
    pub metrics: GenerationMetrics,
}

// ============================================================================
// Validation
// ============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ValidationPhase {
    Install,
    Lint,
    Typecheck,
    Test,
    /// Sandbox provisioning or teardown problem, not the generated code.
    Infra,
}

impl ValidationPhase {
    /// Command phases in execution order.
    pub const COMMAND_PHASES: [ValidationPhase; 4] =
        [Self::Install, Self::Lint, Self::Typecheck, Self::Test];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseOutcome {
    pub phase: ValidationPhase,
    pub ran: bool,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub duration_ms: u64,
    /// Captured stdout+stderr, masked and capped.
    pub log: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCounts {
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
}

impl TestCounts {
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.passed + self.failed + self.skipped
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub success: bool,
    pub phases: Vec<PhaseOutcome>,
    pub failed_phase: Option<ValidationPhase>,
    pub duration_ms: u64,
    pub test_counts: Option<TestCounts>,
    pub timed_out: bool,
    /// Combined, secret-masked log across phases.
    pub log: String,
}

impl ValidationResult {
    /// Result for a sandbox that could not be provisioned or prepared.
    #[must_use]
    pub fn infra_failure(message: impl Into<String>, duration_ms: u64) -> Self {
        let message = message.into();
        Self {
            success: false,
            phases: Vec::new(),
            failed_phase: Some(ValidationPhase::Infra),
            duration_ms,
            test_counts: None,
            timed_out: false,
            log: message,
        }
    }

    #[must_use]
    pub fn phase(&self, phase: ValidationPhase) -> Option<&PhaseOutcome> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    /// One-line summary suitable for PR bodies and comments.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut out = if self.success {
            "validation passed".to_string()
        } else {
            match self.failed_phase {
                Some(phase) if self.timed_out => format!("validation timed out during {phase}"),
                Some(phase) => format!("validation failed in {phase}"),
                None => "validation failed".to_string(),
            }
        };
        if let Some(counts) = self.test_counts {
            out.push_str(&format!(
                " ({} passed, {} failed, {} skipped)",
                counts.passed, counts.failed, counts.skipped
            ));
        }
        out
    }
}

// ============================================================================
// Preflight
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightCheckResult {
    pub name: String,
    pub passed: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

// ============================================================================
// Configuration attribution
// ============================================================================

/// Where a configuration value came from.
///
/// Precedence: CLI arguments > config file > programmatic > built-in default.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConfigSource {
    Cli,
    Config,
    Programmatic,
    Default,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn option(id: &str, recommended: bool) -> QuestionOption {
        QuestionOption {
            id: id.to_string(),
            label: id.to_uppercase(),
            description: format!("choose {id}"),
            pros: vec![],
            cons: vec![],
            recommended,
        }
    }

    #[test]
    fn test_run_status_terminal() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_serialization_is_snake_case() {
        assert_eq!(
            serde_json::to_string(&StepStatus::InProgress).unwrap(),
            r#""in_progress""#
        );
        assert_eq!(StepStatus::InProgress.to_string(), "in_progress");
        assert_eq!(
            serde_json::to_string(&QuestionKind::SolutionChoice).unwrap(),
            r#""solution_choice""#
        );
    }

    #[test]
    fn test_payload_recommended_option() {
        let payload = QuestionPayload::Clarification {
            question: "which db?".into(),
            options: vec![option("sqlite", false), option("postgres", true)],
        };
        assert_eq!(payload.kind(), QuestionKind::Clarification);
        assert_eq!(payload.recommended().map(|o| o.id.as_str()), Some("postgres"));
        assert!(payload.option("sqlite").is_some());
        assert!(payload.option("mysql").is_none());
    }

    #[test]
    fn test_payload_without_recommendation() {
        let payload = QuestionPayload::Approval {
            summary: "ship it?".into(),
            options: vec![option("approve", false), option("reject", false)],
        };
        assert!(payload.recommended().is_none());
    }

    #[test]
    fn test_step_plan_flattened_mode() {
        let plan = StepPlan {
            steps: vec![
                PlannedStep {
                    name: "sync_task".into(),
                    number: 1,
                    mode: StepMode::Enabled,
                },
                PlannedStep {
                    name: "approval".into(),
                    number: 2,
                    mode: StepMode::Skipped {
                        reason: "disabled".into(),
                    },
                },
            ],
        };
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["steps"][1]["mode"], "skipped");
        assert_eq!(json["steps"][1]["reason"], "disabled");
        let back: StepPlan = serde_json::from_value(json).unwrap();
        assert_eq!(back, plan);
        assert!(plan.is_enabled("sync_task"));
        assert!(!plan.is_enabled("approval"));
        assert!(!plan.is_enabled("missing"));
        assert_eq!(plan.total_steps(), 2);
    }

    #[test]
    fn test_validation_summary() {
        let mut result = ValidationResult::infra_failure("clone failed", 12);
        assert_eq!(result.summary(), "validation failed in infra");
        result.test_counts = Some(TestCounts {
            passed: 3,
            failed: 1,
            skipped: 0,
        });
        result.failed_phase = Some(ValidationPhase::Test);
        assert_eq!(
            result.summary(),
            "validation failed in test (3 passed, 1 failed, 0 skipped)"
        );
    }

    #[test]
    fn test_resolution_response_and_status() {
        let response = QuestionResponse {
            question_id: "q1".into(),
            response_type: ResponseType::Answer,
            selected_option: Some("a".into()),
            custom_text: None,
            responded_by: "alice".into(),
        };
        let answered = QuestionResolution::Responded {
            response: response.clone(),
        };
        assert_eq!(answered.response(), Some(&response));
        assert_eq!(answered.final_status(), QuestionStatus::Answered);
        assert_eq!(QuestionResolution::TimedOut.response(), None);
        assert_eq!(
            QuestionResolution::TimedOut.final_status(),
            QuestionStatus::Timeout
        );
    }
}
