use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{Instrument, error, info, warn};

use forgeflow_config::Config;
use forgeflow_interrupt::{
    Delivery, HumanInterrupts, QuestionNotifier, SignalIngress, SignalRouter,
};
use forgeflow_journal::{
    FileJournal, FinishedRun, HistoryEvent, InMemoryJournal, JournalError, JournalStore,
    RunHistory, RunLock,
};
use forgeflow_preflight::{PreflightReport, PreflightValidator};
use forgeflow_progress::{
    FileProgressStore, InMemoryProgressStore, ProgressLog, ProgressStore, StepEnd,
};
use forgeflow_redaction::SecretRedactor;
use forgeflow_sandbox::{GitCloneProvider, SandboxExecutor, ValidationExecutor, secrets_from_env};
use forgeflow_utils::cancel::{CancelHandle, cancel_pair};
use forgeflow_utils::clock::{Clock, SystemClock};
use forgeflow_utils::logging::{
    log_best_effort_failure, log_step_complete, log_step_failed, log_step_skipped,
    log_step_start, run_span,
};
use forgeflow_utils::types::{
    PullRequestRef, QuestionOption, QuestionPayload, QuestionResolution, QuestionResponse,
    ResponseType, RunIdentity, RunInput, RunStatus, StepMode, StepPlan, TaskSnapshot,
    TechnicalPlan, ValidationResult,
};

use crate::collaborators::{
    Ambiguity, FailureAnalyzer, Generator, HeuristicFailureAnalyzer, IssueTracker,
    PullRequestRequest, TrackerNotifier, VersionControl,
};
use crate::context::WorkflowContext;
use crate::error::{EngineError, RunFailure};
use crate::generation::{GenerationLoop, LoopOutcome};
use crate::retry::RetryPolicy;
use crate::steps::{StepName, plan_steps};

/// Option ids offered on approval questions.
pub const APPROVE_OPTION: &str = "approve";
pub const REJECT_OPTION: &str = "reject";

/// Outcome of a run that reached the end of its step sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub status: RunStatus,
    pub pull_request: Option<PullRequestRef>,
    pub attempts_used: u32,
    pub validation: Option<ValidationResult>,
    pub steps_skipped: Vec<String>,
}

/// Drives runs through the fixed step sequence.
///
/// A run is started with [`run`](Self::run) and, after a crash or restart,
/// continued with [`resume`](Self::resume). Both replay the run's journal up
/// to the point where it stopped.
#[derive(Debug)]
pub struct Orchestrator {
    config: Arc<Config>,
    journal: Arc<dyn JournalStore>,
    progress: ProgressLog,
    tracker: Arc<dyn IssueTracker>,
    vcs: Arc<dyn VersionControl>,
    generation: GenerationLoop,
    preflight: Arc<PreflightValidator>,
    clock: Arc<dyn Clock>,
    router: Arc<SignalRouter>,
    notifier: Option<Arc<dyn QuestionNotifier>>,
    lock_root: Option<Utf8PathBuf>,
    live: Mutex<HashMap<String, CancelHandle>>,
}

#[derive(Debug)]
pub struct OrchestratorBuilder {
    config: Arc<Config>,
    journal: Option<Arc<dyn JournalStore>>,
    progress_store: Option<Arc<dyn ProgressStore>>,
    tracker: Option<Arc<dyn IssueTracker>>,
    vcs: Option<Arc<dyn VersionControl>>,
    generator: Option<Arc<dyn Generator>>,
    analyzer: Option<Arc<dyn FailureAnalyzer>>,
    executor: Option<Arc<dyn ValidationExecutor>>,
    preflight: Option<PreflightValidator>,
    clock: Option<Arc<dyn Clock>>,
    router: Option<Arc<SignalRouter>>,
    notifier: Option<Arc<dyn QuestionNotifier>>,
    file_backed: bool,
}

impl OrchestratorBuilder {
    fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            journal: None,
            progress_store: None,
            tracker: None,
            vcs: None,
            generator: None,
            analyzer: None,
            executor: None,
            preflight: None,
            clock: None,
            router: None,
            notifier: None,
            file_backed: false,
        }
    }

    /// Keep journal, progress and run locks under the configured state dir.
    #[must_use]
    pub fn file_backed(mut self) -> Self {
        self.file_backed = true;
        self
    }

    #[must_use]
    pub fn journal(mut self, journal: Arc<dyn JournalStore>) -> Self {
        self.journal = Some(journal);
        self
    }

    #[must_use]
    pub fn progress_store(mut self, store: Arc<dyn ProgressStore>) -> Self {
        self.progress_store = Some(store);
        self
    }

    #[must_use]
    pub fn tracker(mut self, tracker: Arc<dyn IssueTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    #[must_use]
    pub fn vcs(mut self, vcs: Arc<dyn VersionControl>) -> Self {
        self.vcs = Some(vcs);
        self
    }

    #[must_use]
    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    #[must_use]
    pub fn analyzer(mut self, analyzer: Arc<dyn FailureAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    #[must_use]
    pub fn executor(mut self, executor: Arc<dyn ValidationExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    #[must_use]
    pub fn preflight(mut self, preflight: PreflightValidator) -> Self {
        self.preflight = Some(preflight);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Share a router with other components (e.g. a webhook receiver).
    #[must_use]
    pub fn router(mut self, router: Arc<SignalRouter>) -> Self {
        self.router = Some(router);
        self
    }

    /// Replace the default per-task tracker comment notifier.
    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn QuestionNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn build(self) -> Result<Orchestrator, EngineError> {
        let config = self.config;
        let tracker = self
            .tracker
            .ok_or_else(|| EngineError::Setup("an issue tracker is required".to_string()))?;
        let vcs = self
            .vcs
            .ok_or_else(|| EngineError::Setup("a version control client is required".to_string()))?;
        let generator = self
            .generator
            .ok_or_else(|| EngineError::Setup("a generator is required".to_string()))?;

        let state_dir = config.state_dir();
        let journal: Arc<dyn JournalStore> = match (self.journal, self.file_backed) {
            (Some(journal), _) => journal,
            (None, true) => Arc::new(FileJournal::new(state_dir.clone())),
            (None, false) => Arc::new(InMemoryJournal::new()),
        };
        let progress_store: Arc<dyn ProgressStore> = match (self.progress_store, self.file_backed) {
            (Some(store), _) => store,
            (None, true) => Arc::new(FileProgressStore::new(state_dir.clone())),
            (None, false) => Arc::new(InMemoryProgressStore::new()),
        };
        let executor: Arc<dyn ValidationExecutor> = match self.executor {
            Some(executor) => executor,
            None => Arc::new(
                SandboxExecutor::from_config(
                    &config,
                    Arc::new(GitCloneProvider::new().with_secrets(secrets_from_env(&config))),
                )
                .map_err(|e| EngineError::Setup(e.to_string()))?,
            ),
        };
        let preflight = match self.preflight {
            Some(preflight) => preflight,
            None => PreflightValidator::from_config(&config)
                .map_err(|e| EngineError::Setup(e.to_string()))?,
        };
        let redactor = SecretRedactor::from_config(config.as_ref())
            .map_err(|e| EngineError::Setup(format!("invalid secret patterns: {e}")))?;
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let progress =
            ProgressLog::new(progress_store, clock.clone()).with_redactor(Arc::new(redactor));

        let generation = GenerationLoop {
            generator,
            executor,
            analyzer: self
                .analyzer
                .unwrap_or_else(|| Arc::new(HeuristicFailureAnalyzer::default())),
            max_retries: config.generation.max_retries,
            validation_enabled: config.generation.validation_enabled,
            solution_choice: config.interrupts.solution_choice,
        };

        Ok(Orchestrator {
            journal,
            progress,
            tracker,
            vcs,
            generation,
            preflight: Arc::new(preflight),
            clock,
            router: self.router.unwrap_or_default(),
            notifier: self.notifier,
            lock_root: self.file_backed.then_some(state_dir),
            live: Mutex::new(HashMap::new()),
            config,
        })
    }
}

struct LiveRun<'a> {
    orchestrator: &'a Orchestrator,
    run_id: String,
}

impl Drop for LiveRun<'_> {
    fn drop(&mut self) {
        self.orchestrator.live().remove(&self.run_id);
        self.orchestrator.router.release(&self.run_id);
    }
}

fn locked(err: JournalError) -> EngineError {
    match err {
        JournalError::Locked { run_id } => EngineError::Locked { run_id },
        other => other.into(),
    }
}

impl Orchestrator {
    pub fn builder(config: impl Into<Arc<Config>>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config.into())
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn journal(&self) -> &Arc<dyn JournalStore> {
        &self.journal
    }

    #[must_use]
    pub fn progress(&self) -> &ProgressLog {
        &self.progress
    }

    #[must_use]
    pub fn router(&self) -> &Arc<SignalRouter> {
        &self.router
    }

    /// Ingress for responses to questions of runs driven by this orchestrator.
    #[must_use]
    pub fn signal_ingress(&self) -> SignalIngress {
        SignalIngress::new(self.router.clone(), self.journal.clone())
    }

    /// Deliver a human response to `run_id`.
    pub fn respond(
        &self,
        run_id: &str,
        response: QuestionResponse,
    ) -> Result<Delivery, EngineError> {
        Ok(self.signal_ingress().deliver(run_id, response)?)
    }

    fn live(&self) -> MutexGuard<'_, HashMap<String, CancelHandle>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs currently being driven in this process.
    #[must_use]
    pub fn live_runs(&self) -> Vec<String> {
        let mut runs: Vec<String> = self.live().keys().cloned().collect();
        runs.sort();
        runs
    }

    /// Request cancellation. Recorded durably; a live run stops at its next
    /// step boundary or wait.
    ///
    /// Returns `false` when the run had already finished.
    pub fn cancel(&self, run_id: &str, reason: &str) -> Result<bool, EngineError> {
        let accepted = request_cancel(self.journal.as_ref(), self.clock.as_ref(), run_id, reason)?;
        if accepted && let Some(handle) = self.live().get(run_id) {
            handle.cancel();
        }
        Ok(accepted)
    }

    /// Start a new run. A run id that is already recorded is resumed instead.
    pub async fn run(&self, input: RunInput) -> Result<RunResult, RunFailure> {
        let run_id = input.run_id.clone();
        self.start(&run_id, Some(input)).await
    }

    /// Continue a recorded run from its journal.
    ///
    /// A finished run returns its recorded outcome without side effects.
    pub async fn resume(&self, run_id: &str) -> Result<RunResult, RunFailure> {
        self.start(run_id, None).await
    }

    async fn start(&self, run_id: &str, input: Option<RunInput>) -> Result<RunResult, RunFailure> {
        let fail = |err: EngineError| RunFailure::new(run_id, "start", err);

        let mut lock = match &self.lock_root {
            Some(root) => Some(RunLock::open(root, run_id).map_err(|e| fail(e.into()))?),
            None => None,
        };
        let _guard = match lock.as_mut() {
            Some(lock) => Some(lock.try_acquire().map_err(|e| fail(locked(e)))?),
            None => None,
        };

        if let Some(input) = input {
            if self.journal.exists(run_id).map_err(|e| fail(e.into()))? {
                info!(run_id = %run_id, "Run already recorded; resuming");
            } else {
                let event = HistoryEvent::RunStarted {
                    input,
                    phase: self.config.defaults.phase.clone(),
                    plan: plan_steps(&self.config),
                };
                self.journal
                    .append(run_id, event)
                    .map_err(|e| fail(e.into()))?;
            }
        }

        let history = self.journal.history(run_id).map_err(|e| fail(e.into()))?;
        let Some(input) = history.input.clone() else {
            return Err(fail(EngineError::UnknownRun {
                run_id: run_id.to_string(),
            }));
        };
        if let Some(finished) = &history.finished {
            return recorded_outcome(run_id, finished);
        }
        let plan = history
            .plan
            .clone()
            .unwrap_or_else(|| plan_steps(&self.config));
        check_plan(&plan).map_err(fail)?;
        let phase = history
            .phase
            .clone()
            .unwrap_or_else(|| self.config.defaults.phase.clone());

        let span = run_span(run_id, &input.task_id);
        self.drive(input, phase, plan, history).instrument(span).await
    }

    async fn drive(
        &self,
        input: RunInput,
        phase: String,
        plan: StepPlan,
        history: RunHistory,
    ) -> Result<RunResult, RunFailure> {
        let run_id = input.run_id.clone();
        let replaying = history.event_count > 1;
        info!(run_id = %run_id, replaying, events = history.event_count, "Driving run");

        let (handle, cancel) = cancel_pair();
        if history.is_cancelled() {
            handle.cancel();
        }
        self.live().insert(run_id.clone(), handle);
        let _live = LiveRun {
            orchestrator: self,
            run_id: run_id.clone(),
        };

        let notifier = self.notifier.clone().unwrap_or_else(|| {
            Arc::new(TrackerNotifier::new(self.tracker.clone(), input.task_id.clone()))
        });
        let interrupts = HumanInterrupts::new(self.router.clone(), self.clock.clone())
            .with_notifier(notifier)
            .with_timeout(self.config.interrupt_timeout())
            .with_auto_proceed(self.config.interrupts.auto_proceed_on_timeout);
        let ctx = WorkflowContext::new(
            run_id.clone(),
            self.journal.clone(),
            history,
            self.clock.clone(),
            interrupts,
            cancel,
        )
        .with_retry(
            RetryPolicy::from_config(&self.config.activity_retry),
            RetryPolicy::from_config(&self.config.sub_run_retry),
        );

        let identity = RunIdentity {
            run_id: run_id.clone(),
            task_id: input.task_id.clone(),
            project_id: input.project_id.clone(),
            phase,
            total_steps: plan.total_steps(),
        };
        self.progress.set_run_status(&identity, RunStatus::Running);

        let mut driver = RunDriver {
            orchestrator: self,
            ctx,
            input: &input,
            identity: &identity,
            plan: &plan,
            state: RunState::default(),
        };

        match driver.execute().await {
            Ok(result) => {
                let outcome = serde_json::to_value(&result).ok();
                self.finish(&identity, RunStatus::Completed, None, None, outcome)
                    .map_err(|e| RunFailure::new(&run_id, "finish", e))?;
                info!(
                    run_id = %run_id,
                    attempts_used = result.attempts_used,
                    pull_request = ?result.pull_request.as_ref().map(|pr| pr.number),
                    "Run completed"
                );
                Ok(result)
            }
            Err((step, EngineError::Cancelled)) => {
                driver.skip_after(step, "cancelled");
                let failure = RunFailure::new(&run_id, step.as_ref(), EngineError::Cancelled);
                if let Err(e) = self.finish(
                    &identity,
                    RunStatus::Cancelled,
                    Some(step.to_string()),
                    Some(failure.message.clone()),
                    None,
                ) {
                    log_best_effort_failure(&run_id, "record_cancelled", &e.to_string());
                }
                warn!(run_id = %run_id, step = %step, "Run cancelled");
                Err(failure)
            }
            Err((step, err)) => Err(driver.fail(step, err).await),
        }
    }

    fn finish(
        &self,
        identity: &RunIdentity,
        status: RunStatus,
        failed_step: Option<String>,
        error: Option<String>,
        outcome: Option<serde_json::Value>,
    ) -> Result<(), EngineError> {
        self.progress.set_run_status(identity, status);
        self.journal.append(
            &identity.run_id,
            HistoryEvent::RunFinished {
                status,
                failed_step,
                error,
                outcome,
            },
        )?;
        Ok(())
    }
}

/// Record a cancellation request for `run_id` in its journal.
///
/// Usable without a live orchestrator; the run observes the request when it
/// is next driven. Returns `false` when the run had already finished.
pub fn request_cancel(
    journal: &dyn JournalStore,
    clock: &dyn Clock,
    run_id: &str,
    reason: &str,
) -> Result<bool, EngineError> {
    let history = journal.history(run_id)?;
    if history.input.is_none() {
        return Err(EngineError::UnknownRun {
            run_id: run_id.to_string(),
        });
    }
    if history.finished.is_some() {
        info!(run_id = %run_id, "Cancel ignored; run already finished");
        return Ok(false);
    }
    if !history.is_cancelled() {
        journal.append(
            run_id,
            HistoryEvent::CancelRequested {
                at: clock.now(),
                reason: reason.to_string(),
            },
        )?;
    }
    info!(run_id = %run_id, reason = %reason, "Cancellation requested");
    Ok(true)
}

fn recorded_outcome(run_id: &str, finished: &FinishedRun) -> Result<RunResult, RunFailure> {
    let step = finished
        .failed_step
        .clone()
        .unwrap_or_else(|| "finish".to_string());
    match finished.status {
        RunStatus::Completed => finished
            .outcome
            .clone()
            .and_then(|value| serde_json::from_value(value).ok())
            .ok_or_else(|| {
                RunFailure::new(
                    run_id,
                    step,
                    EngineError::PreviouslyFailed {
                        message: "recorded outcome is unreadable".to_string(),
                    },
                )
            }),
        RunStatus::Cancelled => Err(RunFailure::new(run_id, step, EngineError::Cancelled)),
        _ => Err(RunFailure::new(
            run_id,
            step,
            EngineError::PreviouslyFailed {
                message: finished
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string()),
            },
        )),
    }
}

/// Steps that carry the run's output cannot be skipped.
fn check_plan(plan: &StepPlan) -> Result<(), EngineError> {
    for step in [
        StepName::GenerateAndValidate,
        StepName::CommitFiles,
        StepName::CreatePullRequest,
    ] {
        if !plan.is_enabled(step.as_ref()) {
            return Err(EngineError::Setup(format!(
                "step plan must enable '{step}'"
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Default)]
struct RunState {
    task: Option<TaskSnapshot>,
    clarifications: Vec<String>,
    branch: Option<String>,
    outcome: Option<LoopOutcome>,
    pull_request: Option<PullRequestRef>,
    skipped: Vec<String>,
}

/// One pass over the step sequence for one run.
struct RunDriver<'a> {
    orchestrator: &'a Orchestrator,
    ctx: WorkflowContext,
    input: &'a RunInput,
    identity: &'a RunIdentity,
    plan: &'a StepPlan,
    state: RunState,
}

impl RunDriver<'_> {
    fn run_id(&self) -> &str {
        &self.identity.run_id
    }

    async fn execute(&mut self) -> Result<RunResult, (StepName, EngineError)> {
        for step in StepName::ALL {
            let number = step.number();
            if self.ctx.is_cancelled() {
                return Err((step, EngineError::Cancelled));
            }

            let mode = self
                .plan
                .get(step.as_ref())
                .map_or(StepMode::Enabled, |planned| planned.mode.clone());
            if let StepMode::Skipped { reason } = mode {
                self.skip(step, &reason);
                continue;
            }

            self.orchestrator
                .progress
                .record_start(self.identity, step.as_ref(), number);
            log_step_start(self.run_id(), step.as_ref(), number);
            let started = Instant::now();

            match self.run_step(step).await {
                Ok(metadata) => {
                    self.orchestrator.progress.record_end(
                        self.identity,
                        step.as_ref(),
                        number,
                        StepEnd::completed(metadata),
                    );
                    log_step_complete(
                        self.run_id(),
                        step.as_ref(),
                        number,
                        started.elapsed().as_millis() as u64,
                    );
                }
                Err(err) => {
                    let message = err.to_string();
                    self.orchestrator.progress.record_end(
                        self.identity,
                        step.as_ref(),
                        number,
                        StepEnd::failed(message.clone()),
                    );
                    log_step_failed(self.run_id(), step.as_ref(), number, &message);
                    return Err((step, err));
                }
            }
        }

        let outcome = self.state.outcome.as_ref();
        Ok(RunResult {
            run_id: self.identity.run_id.clone(),
            status: RunStatus::Completed,
            pull_request: self.state.pull_request.clone(),
            attempts_used: outcome.map_or(0, |o| o.attempts_used),
            validation: outcome.and_then(|o| o.validation.clone()),
            steps_skipped: self.state.skipped.clone(),
        })
    }

    fn skip(&mut self, step: StepName, reason: &str) {
        self.orchestrator
            .progress
            .record_skipped(self.identity, step.as_ref(), step.number(), reason);
        log_step_skipped(self.run_id(), step.as_ref(), step.number(), reason);
        self.state.skipped.push(step.to_string());
    }

    /// Mark every step after `step` as skipped.
    fn skip_after(&mut self, step: StepName, reason: &str) {
        for later in StepName::ALL.into_iter().filter(|s| s.number() > step.number()) {
            self.skip(later, reason);
        }
    }

    /// Best-effort failure bookkeeping, then the typed failure.
    async fn fail(mut self, step: StepName, err: EngineError) -> RunFailure {
        let failure = RunFailure::new(self.run_id(), step.as_ref(), err);
        error!(
            run_id = %failure.run_id,
            step = %failure.step,
            error = %failure.message,
            "Run failed"
        );

        let tracker = self.orchestrator.tracker.as_ref();
        let task_id = self.input.task_id.as_str();
        let status = self.orchestrator.config.tracker.failed_status.as_str();
        if let Err(e) = self
            .ctx
            .sub_run("mark_failed", task_id, move |_| {
                tracker.update_status(task_id, status)
            })
            .await
        {
            log_best_effort_failure(&failure.run_id, "mark_failed", &e.to_string());
        }

        if let Err(e) = self.orchestrator.finish(
            self.identity,
            RunStatus::Failed,
            Some(step.to_string()),
            Some(failure.message.clone()),
            None,
        ) {
            log_best_effort_failure(&failure.run_id, "record_failure", &e.to_string());
        }
        failure
    }

    /// Task snapshot from the tracker, or one built from the plan when
    /// syncing is disabled.
    fn task(&self) -> TaskSnapshot {
        self.state.task.clone().unwrap_or_else(|| TaskSnapshot {
            id: self.input.task_id.clone(),
            title: self.input.plan.title.clone(),
            description: self.input.plan.summary.clone(),
            labels: Vec::new(),
            team_id: None,
        })
    }

    fn plan_with_clarifications(&self) -> TechnicalPlan {
        let mut plan = self.input.plan.clone();
        plan.clarifications
            .extend(self.state.clarifications.iter().cloned());
        plan
    }

    fn branch_name(&self) -> String {
        self.state.branch.clone().unwrap_or_else(|| {
            format!(
                "{}{}",
                self.orchestrator.config.vcs.branch_prefix, self.input.task_id
            )
        })
    }

    fn outcome(&self) -> Result<&LoopOutcome, EngineError> {
        self.state
            .outcome
            .as_ref()
            .ok_or_else(|| EngineError::Setup("generation has not produced artifacts".to_string()))
    }

    async fn run_step(&mut self, step: StepName) -> Result<serde_json::Value, EngineError> {
        let orch = self.orchestrator;
        let input = self.input;
        let task_id = input.task_id.as_str();
        let tracker = orch.tracker.as_ref();
        let vcs = orch.vcs.as_ref();

        match step {
            StepName::SyncTask => {
                let task: TaskSnapshot = self
                    .ctx
                    .sub_run(step.as_ref(), task_id, move |_| tracker.sync_task(task_id))
                    .await?;
                let metadata = json!({ "title": task.title, "labels": task.labels });
                self.state.task = Some(task);
                Ok(metadata)
            }
            StepName::MarkInProgress => {
                let status = orch.config.tracker.in_progress_status.as_str();
                self.ctx
                    .sub_run(step.as_ref(), task_id, move |_| {
                        tracker.update_status(task_id, status)
                    })
                    .await?;
                Ok(json!({ "status": status }))
            }
            StepName::Preflight => {
                let preflight = orch.preflight.as_ref();
                let report: PreflightReport = self
                    .ctx
                    .activity(step.as_ref(), move || async move {
                        Ok(preflight.validate().await)
                    })
                    .await?;
                if !report.success {
                    return Err(EngineError::Preflight {
                        message: report.failure_message(),
                        results: report.results,
                    });
                }
                Ok(json!({ "checks": report.results.len() }))
            }
            StepName::Clarify => self.clarify().await,
            StepName::CreateBranch => {
                let name = self.branch_name();
                let repo = &input.repo;
                let branch = name.as_str();
                self.ctx
                    .activity(step.as_ref(), move || {
                        vcs.create_branch(repo, branch, &repo.base_branch)
                    })
                    .await?;
                self.state.branch = Some(name.clone());
                Ok(json!({ "branch": name, "from": input.repo.base_branch }))
            }
            StepName::GenerateAndValidate => {
                let task = self.task();
                let plan = self.plan_with_clarifications();
                let outcome = orch
                    .generation
                    .generate_and_validate(&mut self.ctx, &task, &plan, &input.repo)
                    .await?;
                let metadata = json!({
                    "attempts_used": outcome.attempts_used,
                    "checks_passed": outcome.checks_passed(),
                    "files": outcome.artifacts.files.len(),
                    "validation": outcome.validation.as_ref().map(ValidationResult::summary),
                });
                self.state.outcome = Some(outcome);
                Ok(metadata)
            }
            StepName::Approval => self.approval().await,
            StepName::CommitFiles => {
                let branch = self.branch_name();
                let outcome = self.outcome()?.clone();
                let (repo, branch_ref, artifacts) = (&input.repo, branch.as_str(), &outcome.artifacts);
                let commit: String = self
                    .ctx
                    .activity(step.as_ref(), move || {
                        vcs.commit_files(
                            repo,
                            branch_ref,
                            &artifacts.files,
                            &artifacts.commit_message,
                        )
                    })
                    .await?;
                Ok(json!({ "commit": commit, "files": outcome.artifacts.files.len() }))
            }
            StepName::CreatePullRequest => {
                let request = self.pull_request_request()?;
                let req = &request;
                let pr: PullRequestRef = self
                    .ctx
                    .activity(step.as_ref(), move || vcs.create_pull_request(req))
                    .await?;
                let metadata = json!({
                    "number": pr.number,
                    "url": pr.url,
                    "draft": request.draft,
                    "labels": request.labels,
                });
                self.state.pull_request = Some(pr);
                Ok(metadata)
            }
            StepName::PostComment => {
                let body = self.completion_comment()?;
                let body_ref = body.as_str();
                let comment_id: String = self
                    .ctx
                    .activity(step.as_ref(), move || tracker.post_comment(task_id, body_ref))
                    .await?;
                Ok(json!({ "comment_id": comment_id }))
            }
            StepName::MarkInReview => {
                let status = orch.config.tracker.review_status.as_str();
                self.ctx
                    .sub_run(step.as_ref(), task_id, move |_| {
                        tracker.update_status(task_id, status)
                    })
                    .await?;
                Ok(json!({ "status": status }))
            }
        }
    }

    async fn clarify(&mut self) -> Result<serde_json::Value, EngineError> {
        let generator = self.orchestrator.generation.generator.as_ref();
        let task = self.task();
        let (task_ref, plan) = (&task, &self.input.plan);
        let ambiguities: Vec<Ambiguity> = self
            .ctx
            .activity("detect_ambiguities", move || {
                generator.detect_ambiguities(task_ref, plan)
            })
            .await?;

        for ambiguity in &ambiguities {
            let payload = QuestionPayload::Clarification {
                question: ambiguity.question.clone(),
                options: ambiguity.options.clone(),
            };
            let (question, resolution) = self.ctx.ask(payload).await?;
            let answer = match resolution {
                QuestionResolution::Responded { response }
                | QuestionResolution::AutoProceeded { response } => {
                    describe_answer(question.payload.options(), &response)
                }
                QuestionResolution::TimedOut => {
                    return Err(EngineError::HumanResponseTimeout {
                        question_id: question.question_id,
                        kind: question.kind,
                    });
                }
                QuestionResolution::Cancelled => return Err(EngineError::Cancelled),
            };
            if let Some(answer) = answer {
                self.state
                    .clarifications
                    .push(format!("{}\nAnswer: {answer}", ambiguity.question));
            }
        }
        Ok(json!({
            "asked": ambiguities.len(),
            "answered": self.state.clarifications.len(),
        }))
    }

    async fn approval(&mut self) -> Result<serde_json::Value, EngineError> {
        let outcome = self.outcome()?;
        let summary = format!(
            "{}\n\nFiles changed: {}\nValidation: {}\nAttempts: {}",
            outcome.artifacts.pr_title,
            outcome.artifacts.files.len(),
            outcome
                .validation
                .as_ref()
                .map_or_else(|| "disabled".to_string(), ValidationResult::summary),
            outcome.attempts_used + 1,
        );
        let payload = QuestionPayload::Approval {
            summary,
            options: approval_options(),
        };
        let (question, resolution) = self.ctx.ask(payload).await?;

        let response = match resolution {
            QuestionResolution::Responded { response }
            | QuestionResolution::AutoProceeded { response } => response,
            QuestionResolution::TimedOut => {
                return Err(EngineError::HumanResponseTimeout {
                    question_id: question.question_id,
                    kind: question.kind,
                });
            }
            QuestionResolution::Cancelled => return Err(EngineError::Cancelled),
        };

        let approved = match response.response_type {
            ResponseType::Approve => true,
            ResponseType::Reject | ResponseType::Custom => false,
            ResponseType::Answer | ResponseType::AutoProceed => {
                response.selected_option.as_deref() == Some(APPROVE_OPTION)
            }
        };
        if !approved {
            return Err(EngineError::ApprovalRejected {
                rejected_by: response.responded_by,
                reason: response
                    .custom_text
                    .unwrap_or_else(|| "no reason given".to_string()),
            });
        }
        Ok(json!({ "approved_by": response.responded_by }))
    }

    fn pull_request_request(&self) -> Result<PullRequestRequest, EngineError> {
        let config = &self.orchestrator.config;
        let outcome = self.outcome()?;
        let passed = outcome.checks_passed();

        let mut labels = config.vcs.pr_labels.clone();
        if !passed && !config.vcs.failed_checks_label.is_empty() {
            labels.push(config.vcs.failed_checks_label.clone());
        }
        let validation = outcome
            .validation
            .as_ref()
            .map_or_else(|| "validation disabled".to_string(), ValidationResult::summary);
        let body = format!(
            "{}\n\n---\nTask: {}\nValidation: {validation}\nAttempts: {}",
            outcome.artifacts.pr_description,
            self.input.task_id,
            outcome.attempts_used + 1
        );

        Ok(PullRequestRequest {
            repo: self.input.repo.clone(),
            branch: self.branch_name(),
            title: outcome.artifacts.pr_title.clone(),
            body: forgeflow_redaction::redact_user_string(&body),
            draft: !passed && config.vcs.draft_on_failed_checks,
            labels,
        })
    }

    fn completion_comment(&self) -> Result<String, EngineError> {
        let outcome = self.outcome()?;
        let pr = self
            .state
            .pull_request
            .as_ref()
            .map_or_else(|| "(no pull request)".to_string(), |pr| pr.url.clone());
        let validation = outcome
            .validation
            .as_ref()
            .map_or_else(|| "validation disabled".to_string(), ValidationResult::summary);
        Ok(format!("Pull request opened: {pr}\n\n{validation}"))
    }
}

fn approval_options() -> Vec<QuestionOption> {
    vec![
        QuestionOption {
            id: APPROVE_OPTION.to_string(),
            label: "Approve".to_string(),
            description: "Commit the changes and open the pull request".to_string(),
            pros: Vec::new(),
            cons: Vec::new(),
            recommended: true,
        },
        QuestionOption {
            id: REJECT_OPTION.to_string(),
            label: "Reject".to_string(),
            description: "Stop the run without opening a pull request".to_string(),
            pros: Vec::new(),
            cons: Vec::new(),
            recommended: false,
        },
    ]
}

fn describe_answer(options: &[QuestionOption], response: &QuestionResponse) -> Option<String> {
    if let Some(text) = response.custom_text.as_deref().filter(|t| !t.trim().is_empty()) {
        return Some(text.to_string());
    }
    let id = response.selected_option.as_deref()?;
    options
        .iter()
        .find(|o| o.id == id)
        .map(|o| format!("{}: {}", o.label, o.description))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_answer_prefers_custom_text() {
        let options = approval_options();
        let mut response = QuestionResponse {
            question_id: "q".to_string(),
            response_type: ResponseType::Answer,
            selected_option: Some(APPROVE_OPTION.to_string()),
            custom_text: None,
            responded_by: "erin".to_string(),
        };
        assert_eq!(
            describe_answer(&options, &response).as_deref(),
            Some("Approve: Commit the changes and open the pull request")
        );
        response.custom_text = Some("use the v2 endpoint".to_string());
        assert_eq!(
            describe_answer(&options, &response).as_deref(),
            Some("use the v2 endpoint")
        );
        response.custom_text = None;
        response.selected_option = Some("missing".to_string());
        assert_eq!(describe_answer(&options, &response), None);
    }

    #[test]
    fn test_recorded_outcomes() {
        let failed = FinishedRun {
            status: RunStatus::Failed,
            failed_step: Some("preflight".to_string()),
            error: Some("Preflight failed: binary:git: not found".to_string()),
            outcome: None,
        };
        let err = recorded_outcome("run-1", &failed).unwrap_err();
        assert_eq!(err.step, "preflight");
        assert!(matches!(err.cause, EngineError::PreviouslyFailed { .. }));

        let cancelled = FinishedRun {
            status: RunStatus::Cancelled,
            failed_step: Some("approval".to_string()),
            error: None,
            outcome: None,
        };
        assert!(matches!(
            recorded_outcome("run-1", &cancelled).unwrap_err().cause,
            EngineError::Cancelled
        ));

        let result = RunResult {
            run_id: "run-1".to_string(),
            status: RunStatus::Completed,
            pull_request: None,
            attempts_used: 1,
            validation: None,
            steps_skipped: vec!["approval".to_string()],
        };
        let completed = FinishedRun {
            status: RunStatus::Completed,
            failed_step: None,
            error: None,
            outcome: Some(serde_json::to_value(&result).unwrap()),
        };
        assert_eq!(recorded_outcome("run-1", &completed).unwrap(), result);
    }

    #[test]
    fn test_plan_must_keep_output_steps() {
        let mut plan = plan_steps(&Config::default());
        assert!(check_plan(&plan).is_ok());
        if let Some(step) = plan.steps.iter_mut().find(|s| s.name == "commit_files") {
            step.mode = StepMode::Skipped {
                reason: "edited".to_string(),
            };
        }
        assert!(check_plan(&plan).is_err());
    }
}
