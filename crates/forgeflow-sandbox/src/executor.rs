use async_trait::async_trait;
use camino::Utf8PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant as StdInstant};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use forgeflow_config::{Config, SandboxConfig};
use forgeflow_redaction::{SecretMasker, SecretRedactor};
use forgeflow_utils::types::{
    GeneratedArtifactSet, PhaseOutcome, RepoRef, ValidationPhase, ValidationResult,
};

use crate::command_spec::CommandSpec;
use crate::gate::ConcurrencyGate;
use crate::parse::parse_test_counts;
use crate::process::{ProcessLimits, run_bounded};
use crate::workspace::{SandboxWorkspace, WorkspaceProvider};
use crate::SandboxError;

/// Runs generated code and reports a classified result.
#[async_trait]
pub trait ValidationExecutor: Send + Sync + std::fmt::Debug {
    /// Validate one artifact set against `repo`.
    ///
    /// Failures of the code, and of provisioning, come back as an unsuccessful
    /// [`ValidationResult`]. `Err` is reserved for conditions where the
    /// execution never started, such as a full gate under the reject policy.
    async fn execute(
        &self,
        artifacts: &GeneratedArtifactSet,
        repo: &RepoRef,
    ) -> Result<ValidationResult, SandboxError>;
}

/// Argv per command phase; unset phases are not run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationCommands {
    pub install: Option<Vec<String>>,
    pub lint: Option<Vec<String>>,
    pub typecheck: Option<Vec<String>>,
    pub test: Option<Vec<String>>,
}

impl ValidationCommands {
    #[must_use]
    pub fn from_config(sandbox: &SandboxConfig) -> Self {
        Self {
            install: sandbox.install.clone(),
            lint: sandbox.lint.clone(),
            typecheck: sandbox.typecheck.clone(),
            test: sandbox.test.clone(),
        }
    }

    #[must_use]
    pub fn get(&self, phase: ValidationPhase) -> Option<&[String]> {
        match phase {
            ValidationPhase::Install => self.install.as_deref(),
            ValidationPhase::Lint => self.lint.as_deref(),
            ValidationPhase::Typecheck => self.typecheck.as_deref(),
            ValidationPhase::Test => self.test.as_deref(),
            ValidationPhase::Infra => None,
        }
    }
}

/// Values of the variables named in `security.secret_env_vars`.
///
/// Unset or empty variables are skipped.
#[must_use]
pub fn secrets_from_env(config: &Config) -> Vec<(String, String)> {
    config
        .security
        .secret_env_vars
        .iter()
        .filter_map(|var| match std::env::var(var) {
            Ok(value) if !value.is_empty() => Some((var.clone(), value)),
            _ => {
                debug!(var = %var, "Secret env var not set; not injected");
                None
            }
        })
        .collect()
}

/// Process-based executor with a shared concurrency gate.
#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    provider: Arc<dyn WorkspaceProvider>,
    gate: ConcurrencyGate,
    commands: ValidationCommands,
    timeout: Duration,
    memory_mb: u64,
    cpu_secs: u64,
    output_cap_bytes: usize,
    workspace_root: Utf8PathBuf,
    secrets: Vec<(String, String)>,
    masker: SecretMasker,
}

impl SandboxExecutor {
    /// Build from `[sandbox]` and `[security]`.
    ///
    /// Variables named in `security.secret_env_vars` are read once here and
    /// injected into every command; unset ones are skipped.
    pub fn from_config(config: &Config, provider: Arc<dyn WorkspaceProvider>) -> Result<Self, SandboxError> {
        let sandbox = &config.sandbox;
        let redactor = SecretRedactor::from_config(config)
            .map_err(|e| SandboxError::Provision(format!("invalid secret patterns: {e}")))?;
        let workspace_root = sandbox
            .workspace_root
            .clone()
            .unwrap_or_else(|| forgeflow_utils::paths::sandboxes_dir(&config.state_dir()));

        let mut executor = Self {
            provider,
            gate: ConcurrencyGate::new(sandbox.max_concurrent, sandbox.overflow),
            commands: ValidationCommands::from_config(sandbox),
            timeout: sandbox.timeout(),
            memory_mb: sandbox.memory_mb,
            cpu_secs: sandbox.cpu_secs,
            output_cap_bytes: sandbox.output_cap_bytes,
            workspace_root,
            secrets: Vec::new(),
            masker: SecretMasker::new(redactor),
        };
        for (key, value) in secrets_from_env(config) {
            executor = executor.with_secret(key, value);
        }
        Ok(executor)
    }

    /// Share a gate with other executors in the process.
    #[must_use]
    pub fn with_gate(mut self, gate: ConcurrencyGate) -> Self {
        self.gate = gate;
        self
    }

    #[must_use]
    pub fn with_commands(mut self, commands: ValidationCommands) -> Self {
        self.commands = commands;
        self
    }

    /// Inject `value` as env var `key` into every command and mask it from output.
    #[must_use]
    pub fn with_secret(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        self.masker.add_literal(value.clone());
        self.secrets.push((key.into(), value));
        self
    }

    #[must_use]
    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    fn limits(&self, deadline: Instant) -> ProcessLimits {
        ProcessLimits {
            deadline: Some(deadline),
            memory_mb: self.memory_mb,
            cpu_secs: self.cpu_secs,
            output_cap_bytes: self.output_cap_bytes,
        }
    }

    fn infra(&self, message: &str, started: StdInstant) -> ValidationResult {
        let message = self.masker.mask(message);
        warn!(error = %message, "Sandbox infrastructure failure");
        ValidationResult::infra_failure(message, started.elapsed().as_millis() as u64)
    }

    async fn run_phases(
        &self,
        workspace: &SandboxWorkspace,
        limits: &ProcessLimits,
        started: StdInstant,
    ) -> ValidationResult {
        let mut phases = Vec::new();
        let mut failed_phase = None;
        let mut timed_out = false;
        let mut test_counts = None;
        let mut log = String::new();

        for phase in ValidationPhase::COMMAND_PHASES {
            let Some(spec) = self.commands.get(phase).and_then(CommandSpec::from_argv) else {
                continue;
            };
            if failed_phase.is_some() {
                phases.push(PhaseOutcome {
                    phase,
                    ran: false,
                    success: false,
                    exit_code: None,
                    timed_out: false,
                    duration_ms: 0,
                    log: String::new(),
                });
                continue;
            }

            let mut spec = spec
                .cwd(workspace.checkout().as_std_path())
                .env("CI", "true");
            for (key, value) in &self.secrets {
                spec = spec.secret(key, value);
            }

            debug!(phase = %phase, command = %spec.display(), "Running validation phase");
            match run_bounded(&spec, limits).await {
                Ok(run) => {
                    let masked = self.masker.mask(&run.output);
                    if phase == ValidationPhase::Test {
                        test_counts = parse_test_counts(&masked);
                    }
                    let success = run.success();
                    if !success {
                        failed_phase = Some(phase);
                        timed_out = run.timed_out;
                    }
                    log.push_str(&format!("==> {phase}: {}\n{masked}\n", spec.display()));
                    phases.push(PhaseOutcome {
                        phase,
                        ran: true,
                        success,
                        exit_code: run.exit_code,
                        timed_out: run.timed_out,
                        duration_ms: run.duration_ms,
                        log: masked,
                    });
                }
                Err(e) => {
                    let message = self.masker.mask(&e.to_string());
                    log.push_str(&format!("==> {phase}: {message}\n"));
                    failed_phase = Some(ValidationPhase::Infra);
                    phases.push(PhaseOutcome {
                        phase,
                        ran: false,
                        success: false,
                        exit_code: None,
                        timed_out: false,
                        duration_ms: 0,
                        log: message,
                    });
                }
            }
        }

        ValidationResult {
            success: failed_phase.is_none(),
            phases,
            failed_phase,
            duration_ms: started.elapsed().as_millis() as u64,
            test_counts,
            timed_out,
            log,
        }
    }
}

#[async_trait]
impl ValidationExecutor for SandboxExecutor {
    async fn execute(
        &self,
        artifacts: &GeneratedArtifactSet,
        repo: &RepoRef,
    ) -> Result<ValidationResult, SandboxError> {
        let _permit = self.gate.acquire().await?;
        let started = StdInstant::now();
        let limits = self.limits(Instant::now() + self.timeout);
        info!(
            attempt = artifacts.attempt,
            repo = %repo.full_name(),
            files = artifacts.files.len(),
            active = self.gate.active(),
            "Sandbox validation started"
        );

        let mut workspace = match self
            .provider
            .provision(repo, &self.workspace_root, &limits)
            .await
        {
            Ok(ws) => ws,
            Err(e) => return Ok(self.infra(&e.to_string(), started)),
        };

        let result = match workspace.apply_edits(&artifacts.files) {
            Ok(()) => self.run_phases(&workspace, &limits, started).await,
            Err(e) => self.infra(&e.to_string(), started),
        };

        if let Err(e) = workspace.teardown() {
            warn!(error = %e, "Sandbox teardown failed");
        }

        info!(
            attempt = artifacts.attempt,
            success = result.success,
            failed_phase = ?result.failed_phase,
            duration_ms = result.duration_ms,
            "Sandbox validation finished"
        );
        Ok(result)
    }
}
