//! Preflight validator.
//!
//! Runs every registered [`PreflightCheck`] once before a run does any
//! expensive work. All checks always run, so a failing report lists every
//! problem at once instead of the first one found.

mod checks;

pub use checks::{
    BinaryCheck, EndpointCheck, EnvCredentialCheck, FnCheck, MemoryHeadroomCheck, WriteAccessCheck,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use forgeflow_config::Config;
use forgeflow_utils::types::PreflightCheckResult;

#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("invalid preflight endpoint '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Result of one probe before timing is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub passed: bool,
    pub error: Option<String>,
    pub details: Option<String>,
}

impl CheckOutcome {
    #[must_use]
    pub fn pass(details: impl Into<String>) -> Self {
        Self {
            passed: true,
            error: None,
            details: Some(details.into()),
        }
    }

    #[must_use]
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            passed: false,
            error: Some(error.into()),
            details: None,
        }
    }
}

/// An independent health probe.
#[async_trait]
pub trait PreflightCheck: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self) -> CheckOutcome;
}

/// Aggregate result; `success` only when every check passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightReport {
    pub success: bool,
    pub results: Vec<PreflightCheckResult>,
}

impl PreflightReport {
    pub fn failures(&self) -> impl Iterator<Item = &PreflightCheckResult> {
        self.results.iter().filter(|r| !r.passed)
    }

    /// All failures joined into one diagnostic line.
    #[must_use]
    pub fn failure_message(&self) -> String {
        let parts: Vec<String> = self
            .failures()
            .map(|r| match &r.error {
                Some(e) => format!("{}: {e}", r.name),
                None => format!("{}: failed", r.name),
            })
            .collect();
        if parts.is_empty() {
            String::new()
        } else {
            format!("Preflight failed: {}", parts.join("; "))
        }
    }
}

#[derive(Clone, Default)]
pub struct PreflightValidator {
    checks: Vec<Arc<dyn PreflightCheck>>,
}

impl std::fmt::Debug for PreflightValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreflightValidator")
            .field("checks", &self.check_names())
            .finish()
    }
}

impl PreflightValidator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in checks from the `[preflight]` section.
    pub fn from_config(config: &Config) -> Result<Self, PreflightError> {
        let pf = &config.preflight;
        let mut validator = Self::new();

        for binary in &pf.required_binaries {
            validator.register(BinaryCheck::new(binary));
        }
        for var in &pf.required_env {
            validator.register(EnvCredentialCheck::new(var));
        }
        if pf.check_write_access {
            validator.register(WriteAccessCheck::new(config.state_dir()));
        }
        if !pf.endpoints.is_empty() {
            let timeout = std::time::Duration::from_millis(pf.endpoint_timeout_ms);
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| PreflightError::HttpClient(e.to_string()))?;
            for url in &pf.endpoints {
                validator.register(EndpointCheck::new(client.clone(), url)?);
            }
        }
        if let Some(min_mb) = pf.min_available_memory_mb {
            validator.register(MemoryHeadroomCheck::new(min_mb));
        }

        Ok(validator)
    }

    pub fn register(&mut self, check: impl PreflightCheck + 'static) -> &mut Self {
        self.checks.push(Arc::new(check));
        self
    }

    #[must_use]
    pub fn with_check(mut self, check: impl PreflightCheck + 'static) -> Self {
        self.register(check);
        self
    }

    #[must_use]
    pub fn check_names(&self) -> Vec<String> {
        self.checks.iter().map(|c| c.name().to_string()).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Run every check concurrently; results keep registration order.
    pub async fn validate(&self) -> PreflightReport {
        let mut set = JoinSet::new();
        for (idx, check) in self.checks.iter().enumerate() {
            let check = Arc::clone(check);
            set.spawn(async move {
                let started = Instant::now();
                let outcome = check.run().await;
                let duration_ms = started.elapsed().as_millis() as u64;
                (idx, check.name().to_string(), outcome, duration_ms)
            });
        }

        let mut slots: Vec<Option<PreflightCheckResult>> = vec![None; self.checks.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, name, outcome, duration_ms)) => {
                    debug!(check = %name, passed = outcome.passed, duration_ms, "Preflight check finished");
                    slots[idx] = Some(PreflightCheckResult {
                        name,
                        passed: outcome.passed,
                        duration_ms,
                        error: outcome
                            .error
                            .map(|e| forgeflow_redaction::redact_user_string(&e)),
                        details: outcome
                            .details
                            .map(|d| forgeflow_redaction::redact_user_string(&d)),
                    });
                }
                Err(e) => warn!(error = %e, "Preflight check task did not complete"),
            }
        }

        let results: Vec<PreflightCheckResult> = slots
            .into_iter()
            .zip(&self.checks)
            .map(|(slot, check)| {
                slot.unwrap_or_else(|| PreflightCheckResult {
                    name: check.name().to_string(),
                    passed: false,
                    duration_ms: 0,
                    error: Some("check panicked".to_string()),
                    details: None,
                })
            })
            .collect();

        let success = results.iter().all(|r| r.passed);
        let failed = results.iter().filter(|r| !r.passed).count();
        info!(checks = results.len(), failed, success, "Preflight complete");
        PreflightReport { success, results }
    }
}
