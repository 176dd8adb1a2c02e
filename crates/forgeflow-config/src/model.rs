use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use forgeflow_utils::types::{ConfigSource, ValidationPhase};

/// Configuration for forgeflow runs.
///
/// # Discovery
///
/// [`Config::discover()`] searches for `.forgeflow/config.toml` upward from
/// the current directory, then `$FORGEFLOW_HOME/config.toml`, and applies
/// built-in defaults for anything unspecified.
///
/// # Source Attribution
///
/// Each explicitly set value records where it came from (`cli`, `config`,
/// `programmatic`); see [`Config::source_of`].
///
/// # Configuration File Format
///
/// ```toml
/// [generation]
/// max_retries = 2
///
/// [interrupts]
/// timeout_hours = 24
/// auto_proceed_on_timeout = true
/// approval = true
///
/// [sandbox]
/// max_concurrent = 4
/// install = ["npm", "ci"]
/// test = ["npm", "test", "--", "--ci"]
///
/// [steps]
/// post_comment = false
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub defaults: Defaults,
    pub steps: StepsConfig,
    pub generation: GenerationConfig,
    pub interrupts: InterruptConfig,
    pub sandbox: SandboxConfig,
    pub activity_retry: RetryConfig,
    pub sub_run_retry: RetryConfig,
    pub preflight: PreflightConfig,
    pub tracker: TrackerConfig,
    pub vcs: VcsConfig,
    pub security: SecurityConfig,
    /// Source for each explicitly set key (`section.key`).
    #[serde(skip)]
    pub source_attribution: BTreeMap<String, ConfigSource>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            defaults: Defaults::default(),
            steps: StepsConfig::default(),
            generation: GenerationConfig::default(),
            interrupts: InterruptConfig::default(),
            sandbox: SandboxConfig::default(),
            activity_retry: RetryConfig::default(),
            sub_run_retry: RetryConfig::sub_run_default(),
            preflight: PreflightConfig::default(),
            tracker: TrackerConfig::default(),
            vcs: VcsConfig::default(),
            security: SecurityConfig::default(),
            source_attribution: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Where `key` (`section.key`) came from. Unset keys are defaults.
    #[must_use]
    pub fn source_of(&self, key: &str) -> ConfigSource {
        self.source_attribution
            .get(key)
            .copied()
            .unwrap_or(ConfigSource::Default)
    }

    /// Root of run state: explicit `defaults.state_dir` or forgeflow home.
    #[must_use]
    pub fn state_dir(&self) -> Utf8PathBuf {
        self.defaults
            .state_dir
            .clone()
            .unwrap_or_else(forgeflow_utils::paths::forgeflow_home)
    }

    #[must_use]
    pub fn interrupt_timeout(&self) -> chrono::Duration {
        chrono::Duration::hours(self.interrupts.timeout_hours as i64)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Defaults {
    /// Overrides `$FORGEFLOW_HOME`.
    pub state_dir: Option<Utf8PathBuf>,
    /// Phase label recorded on runs.
    pub phase: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            state_dir: None,
            phase: "code_generation".to_string(),
        }
    }
}

/// Toggles for optional orchestrator steps.
///
/// Generation, commit and pull-request creation always run. The
/// clarification, solution-choice and approval questions are toggled in
/// [`InterruptConfig`].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StepsConfig {
    pub sync_task: bool,
    pub mark_in_progress: bool,
    pub preflight: bool,
    pub create_branch: bool,
    pub post_comment: bool,
    pub mark_in_review: bool,
}

impl Default for StepsConfig {
    fn default() -> Self {
        Self {
            sync_task: true,
            mark_in_progress: true,
            preflight: true,
            create_branch: true,
            post_comment: true,
            mark_in_review: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationConfig {
    /// Extra attempts after the first; `2` means up to three generations.
    pub max_retries: u32,
    pub validation_enabled: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            validation_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct InterruptConfig {
    pub timeout_hours: u64,
    /// On timeout, pick the recommended option instead of failing.
    pub auto_proceed_on_timeout: bool,
    pub clarification: bool,
    pub solution_choice: bool,
    pub approval: bool,
}

impl Default for InterruptConfig {
    fn default() -> Self {
        Self {
            timeout_hours: 24,
            auto_proceed_on_timeout: false,
            clarification: false,
            solution_choice: false,
            approval: false,
        }
    }
}

/// Behaviour when all sandbox slots are busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    #[default]
    Wait,
    Reject,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxConfig {
    pub max_concurrent: usize,
    pub overflow: OverflowPolicy,
    /// One wall-clock budget for all phases of one validation.
    pub timeout_secs: u64,
    /// Address-space limit per command; 0 disables.
    pub memory_mb: u64,
    /// CPU-time limit per command; 0 disables.
    pub cpu_secs: u64,
    pub output_cap_bytes: usize,
    /// Parent directory for sandbox workspaces; defaults to `<state>/sandboxes`.
    pub workspace_root: Option<Utf8PathBuf>,
    pub install: Option<Vec<String>>,
    pub lint: Option<Vec<String>>,
    pub typecheck: Option<Vec<String>>,
    pub test: Option<Vec<String>>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            overflow: OverflowPolicy::Wait,
            timeout_secs: 900,
            memory_mb: 4096,
            cpu_secs: 900,
            output_cap_bytes: 256 * 1024,
            workspace_root: None,
            install: None,
            lint: None,
            typecheck: None,
            test: None,
        }
    }
}

impl SandboxConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Configured argv for a command phase.
    #[must_use]
    pub fn command_for(&self, phase: ValidationPhase) -> Option<&[String]> {
        match phase {
            ValidationPhase::Install => self.install.as_deref(),
            ValidationPhase::Lint => self.lint.as_deref(),
            ValidationPhase::Typecheck => self.typecheck.as_deref(),
            ValidationPhase::Test => self.test.as_deref(),
            ValidationPhase::Infra => None,
        }
    }
}

/// Transient retry policy for activities and sub-runs.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            backoff_multiplier: 2.0,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// Default for sub-runs: slower backoff, same attempt count.
    #[must_use]
    pub fn sub_run_default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            backoff_multiplier: 2.0,
            max_backoff_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreflightConfig {
    pub required_binaries: Vec<String>,
    /// Credentials that must be present and non-empty.
    pub required_env: Vec<String>,
    /// URLs probed with a GET; any status below 500 counts as reachable.
    pub endpoints: Vec<String>,
    pub check_write_access: bool,
    pub endpoint_timeout_ms: u64,
    /// Minimum available memory; unset skips the check.
    pub min_available_memory_mb: Option<u64>,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            required_binaries: vec!["git".to_string()],
            required_env: Vec::new(),
            endpoints: Vec::new(),
            check_write_access: true,
            endpoint_timeout_ms: 5_000,
            min_available_memory_mb: None,
        }
    }
}

/// Issue-tracker status names used for transitions.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerConfig {
    pub in_progress_status: String,
    pub review_status: String,
    pub failed_status: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            in_progress_status: "In Progress".to_string(),
            review_status: "In Review".to_string(),
            failed_status: "Failed".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct VcsConfig {
    pub branch_prefix: String,
    pub pr_labels: Vec<String>,
    /// Added when the final validation did not pass.
    pub failed_checks_label: String,
    pub draft_on_failed_checks: bool,
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            branch_prefix: "forgeflow/".to_string(),
            pr_labels: vec!["forgeflow".to_string()],
            failed_checks_label: "checks-failed".to_string(),
            draft_on_failed_checks: true,
        }
    }
}

/// Secret detection settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityConfig {
    pub extra_secret_patterns: Vec<String>,
    /// Built-in pattern ids to disable.
    pub ignore_secret_patterns: Vec<String>,
    /// Environment variables passed into sandboxes as scoped secrets.
    pub secret_env_vars: Vec<String>,
}

impl forgeflow_redaction::SecretConfigProvider for SecurityConfig {
    fn extra_secret_patterns(&self) -> &[String] {
        &self.extra_secret_patterns
    }

    fn ignore_secret_patterns(&self) -> &[String] {
        &self.ignore_secret_patterns
    }
}

impl forgeflow_redaction::SecretConfigProvider for Config {
    fn extra_secret_patterns(&self) -> &[String] {
        &self.security.extra_secret_patterns
    }

    fn ignore_secret_patterns(&self) -> &[String] {
        &self.security.ignore_secret_patterns
    }
}

/// File layout of `config.toml`. Every section is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct TomlConfig {
    pub defaults: Option<Defaults>,
    pub steps: Option<StepsConfig>,
    pub generation: Option<GenerationConfig>,
    pub interrupts: Option<InterruptConfig>,
    pub sandbox: Option<SandboxConfig>,
    pub activity_retry: Option<RetryConfig>,
    pub sub_run_retry: Option<RetryConfig>,
    pub preflight: Option<PreflightConfig>,
    pub tracker: Option<TrackerConfig>,
    pub vcs: Option<VcsConfig>,
    pub security: Option<SecurityConfig>,
}
