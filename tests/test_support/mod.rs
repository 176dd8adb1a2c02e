//! Fake collaborators and builders shared by the scenario tests.
//!
//! The fakes record every call so tests can assert on what reached the
//! outside world, which is what replay must not repeat.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use forgeflow::internal::config::RetryConfig;
use forgeflow::internal::preflight::{CheckOutcome, PreflightCheck};
use forgeflow::internal::sandbox::SandboxError;
use forgeflow::internal::utils::clock::ManualClock;
use forgeflow::internal::utils::test_support::manual_clock;
use forgeflow::internal::utils::types::{
    FileAction, FileEdit, GenerationMetrics, PhaseOutcome, QuestionOption, ValidationPhase,
};
use forgeflow::{
    ActivityError, Ambiguity, Config, ConfigBuilder, GeneratedArtifactSet, GenerationRequest,
    Generator, InMemoryJournal, IssueTracker, Orchestrator, OrchestratorBuilder,
    PreflightValidator, PullRequestRef, PullRequestRequest, QuestionResponse, RepoRef, ResponseType,
    RunInput, TaskSnapshot, TechnicalPlan, ValidationExecutor, ValidationResult, VersionControl,
};

/// Shared call log, in call order.
#[derive(Debug, Default, Clone)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

#[derive(Debug, Default)]
pub struct FakeTracker {
    pub log: CallLog,
    /// Transient failures returned by `sync_task` before it succeeds.
    pub sync_failures: AtomicU32,
}

impl FakeTracker {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            sync_failures: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl IssueTracker for FakeTracker {
    async fn sync_task(&self, task_id: &str) -> Result<TaskSnapshot, ActivityError> {
        self.log.push(format!("sync_task:{task_id}"));
        let remaining = self.sync_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.sync_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ActivityError::transient("tracker returned 503"));
        }
        Ok(TaskSnapshot {
            id: task_id.to_string(),
            title: "Add rate limiting".to_string(),
            description: "Limit requests per API key".to_string(),
            labels: vec!["backend".to_string()],
            team_id: Some("team-1".to_string()),
        })
    }

    async fn update_status(&self, task_id: &str, status: &str) -> Result<(), ActivityError> {
        self.log.push(format!("status:{task_id}:{status}"));
        Ok(())
    }

    async fn post_comment(&self, task_id: &str, body: &str) -> Result<String, ActivityError> {
        self.log.push(format!("comment:{task_id}:{body}"));
        Ok(format!("comment-{}", self.log.count("comment:")))
    }

    async fn add_label(&self, task_id: &str, label: &str) -> Result<(), ActivityError> {
        self.log.push(format!("label:{task_id}:{label}"));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeVcs {
    pub log: CallLog,
    pub requests: Mutex<Vec<PullRequestRequest>>,
    pub fail_branch: bool,
}

impl FakeVcs {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            requests: Mutex::new(Vec::new()),
            fail_branch: false,
        }
    }

    pub fn last_request(&self) -> Option<PullRequestRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl VersionControl for FakeVcs {
    async fn create_branch(
        &self,
        repo: &RepoRef,
        name: &str,
        from: &str,
    ) -> Result<(), ActivityError> {
        self.log
            .push(format!("branch:{}:{name}:{from}", repo.full_name()));
        if self.fail_branch {
            return Err(ActivityError::non_retryable("branch protection forbids push"));
        }
        Ok(())
    }

    async fn commit_files(
        &self,
        _repo: &RepoRef,
        branch: &str,
        files: &[FileEdit],
        _message: &str,
    ) -> Result<String, ActivityError> {
        self.log.push(format!("commit:{branch}:{}", files.len()));
        Ok("c0ffee".to_string())
    }

    async fn create_pull_request(
        &self,
        request: &PullRequestRequest,
    ) -> Result<PullRequestRef, ActivityError> {
        self.log.push(format!("pr:{}", request.branch));
        self.requests.lock().unwrap().push(request.clone());
        Ok(PullRequestRef {
            number: 7,
            url: "https://example.invalid/acme/widgets/pull/7".to_string(),
        })
    }
}

/// Generator that returns one artifact set per call and keeps the requests.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    pub log: CallLog,
    pub requests: Mutex<Vec<GenerationRequest>>,
    pub ambiguities: Vec<Ambiguity>,
    /// Attempts that fail with a non-retryable error.
    pub failing_attempts: Vec<u32>,
}

impl ScriptedGenerator {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn with_ambiguity(mut self, question: &str, options: &[(&str, bool)]) -> Self {
        self.ambiguities.push(Ambiguity {
            question: question.to_string(),
            options: options.iter().map(|(id, rec)| option(id, *rec)).collect(),
        });
        self
    }

    pub fn with_failing_attempts(mut self, attempts: &[u32]) -> Self {
        self.failing_attempts = attempts.to_vec();
        self
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedArtifactSet, ActivityError> {
        self.log.push(format!("generate:{}", request.attempt));
        self.requests.lock().unwrap().push(request.clone());
        if self.failing_attempts.contains(&request.attempt) {
            return Err(ActivityError::non_retryable(
                "model returned unparsable output",
            ));
        }
        Ok(artifacts(request.attempt))
    }

    async fn detect_ambiguities(
        &self,
        _task: &TaskSnapshot,
        _plan: &TechnicalPlan,
    ) -> Result<Vec<Ambiguity>, ActivityError> {
        self.log.push("detect_ambiguities");
        Ok(self.ambiguities.clone())
    }
}

/// Executor that replays a script of results; passes once the script runs out.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    pub log: CallLog,
    pub results: Mutex<VecDeque<ValidationResult>>,
}

impl ScriptedExecutor {
    pub fn new(log: CallLog, results: impl IntoIterator<Item = ValidationResult>) -> Self {
        Self {
            log,
            results: Mutex::new(results.into_iter().collect()),
        }
    }
}

#[async_trait]
impl ValidationExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        artifacts: &GeneratedArtifactSet,
        _repo: &RepoRef,
    ) -> Result<ValidationResult, SandboxError> {
        self.log.push(format!("validate:{}", artifacts.attempt));
        let next = self.results.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(passing_validation))
    }
}

/// A preflight probe with a fixed outcome.
pub struct StaticCheck {
    pub name: String,
    pub pass: bool,
}

#[async_trait]
impl PreflightCheck for StaticCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> CheckOutcome {
        if self.pass {
            CheckOutcome::pass("ok")
        } else {
            CheckOutcome::fail(format!("{} is unavailable", self.name))
        }
    }
}

pub fn option(id: &str, recommended: bool) -> QuestionOption {
    QuestionOption {
        id: id.to_string(),
        label: format!("Option {id}"),
        description: format!("Do it the {id} way"),
        pros: Vec::new(),
        cons: Vec::new(),
        recommended,
    }
}

pub fn artifacts(attempt: u32) -> GeneratedArtifactSet {
    GeneratedArtifactSet {
        attempt,
        files: vec![FileEdit {
            path: "src/limits.rs".to_string(),
            action: FileAction::Create,
            content: Some(format!("pub const LIMIT: u32 = {};\n", 10 + attempt)),
        }],
        commit_message: "Add rate limiting".to_string(),
        pr_title: "Add rate limiting".to_string(),
        pr_description: "Token bucket per API key.".to_string(),
        metrics: GenerationMetrics::default(),
    }
}

pub fn passing_validation() -> ValidationResult {
    ValidationResult {
        success: true,
        phases: [
            ValidationPhase::Install,
            ValidationPhase::Lint,
            ValidationPhase::Typecheck,
            ValidationPhase::Test,
        ]
        .into_iter()
        .map(|phase| PhaseOutcome {
            phase,
            ran: true,
            success: true,
            exit_code: Some(0),
            timed_out: false,
            duration_ms: 5,
            log: String::new(),
        })
        .collect(),
        failed_phase: None,
        duration_ms: 20,
        test_counts: None,
        timed_out: false,
        log: "all phases passed".to_string(),
    }
}

pub fn failing_validation(phase: ValidationPhase, log: &str) -> ValidationResult {
    let mut result = passing_validation();
    result.success = false;
    result.failed_phase = Some(phase);
    let mut reached = true;
    for outcome in &mut result.phases {
        if !reached {
            outcome.ran = false;
            outcome.success = false;
            outcome.exit_code = None;
            continue;
        }
        if outcome.phase == phase {
            outcome.success = false;
            outcome.exit_code = Some(1);
            outcome.log = log.to_string();
            reached = false;
        }
    }
    result.log = log.to_string();
    result
}

/// Retry policy that never waits long.
pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_backoff_ms: 1,
        backoff_multiplier: 1.0,
        max_backoff_ms: 1,
    }
}

/// Config with fast retries and no preflight probes of the real machine.
pub fn config_builder() -> ConfigBuilder {
    Config::builder()
        .activity_retry(fast_retry())
        .sub_run_retry(fast_retry())
        .max_retries(2)
}

/// Everything a scenario needs to drive and inspect one orchestrator.
pub struct Harness {
    pub log: CallLog,
    pub tracker: Arc<FakeTracker>,
    pub vcs: Arc<FakeVcs>,
    pub generator: Arc<ScriptedGenerator>,
    pub executor: Arc<ScriptedExecutor>,
    pub journal: Arc<InMemoryJournal>,
    pub clock: ManualClock,
}

impl Harness {
    pub fn new(validations: impl IntoIterator<Item = ValidationResult>) -> Self {
        let log = CallLog::default();
        Self {
            tracker: Arc::new(FakeTracker::new(log.clone())),
            vcs: Arc::new(FakeVcs::new(log.clone())),
            generator: Arc::new(ScriptedGenerator::new(log.clone())),
            executor: Arc::new(ScriptedExecutor::new(log.clone(), validations)),
            journal: Arc::new(InMemoryJournal::new()),
            clock: manual_clock(),
            log,
        }
    }

    /// Harness whose validations always pass.
    pub fn passing() -> Self {
        Self::new(Vec::<ValidationResult>::new())
    }

    pub fn with_generator(mut self, generator: ScriptedGenerator) -> Self {
        let generator = ScriptedGenerator {
            log: self.log.clone(),
            ..generator
        };
        self.generator = Arc::new(generator);
        self
    }

    pub fn with_vcs(mut self, vcs: FakeVcs) -> Self {
        let vcs = FakeVcs {
            log: self.log.clone(),
            ..vcs
        };
        self.vcs = Arc::new(vcs);
        self
    }

    /// Builder wired to this harness's fakes, journal and clock.
    pub fn builder(&self, config: Config) -> OrchestratorBuilder {
        Orchestrator::builder(config)
            .tracker(self.tracker.clone())
            .vcs(self.vcs.clone())
            .generator(self.generator.clone())
            .executor(self.executor.clone())
            .journal(self.journal.clone())
            .clock(Arc::new(self.clock.clone()))
            .preflight(PreflightValidator::new())
    }

    pub fn orchestrator(&self, config: Config) -> Orchestrator {
        self.builder(config).build().unwrap()
    }
}

/// Poll until `orchestrator` has a question pending for `run_id`.
pub async fn wait_for_question(orchestrator: &Orchestrator, run_id: &str) -> String {
    for _ in 0..2_000 {
        if let Some(id) = orchestrator.router().pending_question_id(run_id) {
            return id;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("no question was posted for {run_id}");
}

pub fn input(run_id: &str) -> RunInput {
    forgeflow::internal::utils::test_support::sample_input(run_id)
}

pub fn response(
    question_id: &str,
    response_type: ResponseType,
    selected_option: Option<&str>,
    custom_text: Option<&str>,
) -> QuestionResponse {
    QuestionResponse {
        question_id: question_id.to_string(),
        response_type,
        selected_option: selected_option.map(str::to_string),
        custom_text: custom_text.map(str::to_string),
        responded_by: "erin".to_string(),
    }
}

/// Journal event labels for `run_id`, in order.
pub fn event_labels(journal: &InMemoryJournal, run_id: &str) -> Vec<&'static str> {
    use forgeflow::JournalStore;
    journal
        .load(run_id)
        .unwrap()
        .iter()
        .map(|entry| entry.event.label())
        .collect()
}
