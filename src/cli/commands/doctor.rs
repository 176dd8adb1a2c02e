//! Doctor command implementation
//!
//! Handles `forgeflow doctor` for environment health checks.

use anyhow::{Context, Result};

use forgeflow_config::Config;
use forgeflow_preflight::PreflightValidator;
use forgeflow_utils::canonicalization::emit_jcs;
use forgeflow_utils::exit_codes::ExitCode;

use crate::ForgeflowError;

/// Run every configured preflight check and print the report.
pub async fn execute_doctor_command(json: bool, config: &Config) -> Result<ExitCode> {
    let validator = PreflightValidator::from_config(config).map_err(ForgeflowError::from)?;
    let report = validator.validate().await;

    if json {
        let output = emit_jcs(&report).context("Failed to emit doctor JSON")?;
        println!("{output}");
    } else if report.results.is_empty() {
        println!("No preflight checks are configured.");
    } else {
        for result in &report.results {
            let mark = if result.passed { "✓" } else { "✗" };
            let detail = result
                .error
                .as_deref()
                .or(result.details.as_deref())
                .unwrap_or_default();
            println!("{mark} {} ({} ms) {detail}", result.name, result.duration_ms);
        }
        if !report.success {
            println!();
            println!("Some checks failed. Please address the issues above before starting runs.");
        }
    }

    Ok(if report.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::PREFLIGHT_FAILED
    })
}
