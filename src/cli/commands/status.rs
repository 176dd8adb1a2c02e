//! Status command implementation
//!
//! Handles `forgeflow status <run-id>` and `forgeflow status <run-id> --json`.

use anyhow::{Context, Result};
use serde::Serialize;

use forgeflow_config::Config;
use forgeflow_engine::EngineError;
use forgeflow_progress::{FileProgressStore, ProgressSnapshot, ProgressStore};
use forgeflow_utils::canonicalization::emit_jcs;
use forgeflow_utils::exit_codes::ExitCode;
use forgeflow_utils::types::{PendingQuestion, RunStatus, StepStatus};

use super::open_journal;
use crate::ForgeflowError;

/// Journal projection joined with the progress log.
#[derive(Debug, Serialize)]
struct StatusOutput {
    run_id: String,
    status: RunStatus,
    cancel_requested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pending_question: Option<PendingQuestion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<ProgressSnapshot>,
}

pub fn execute_status_command(run_id: &str, json: bool, config: &Config) -> Result<ExitCode> {
    let journal = open_journal(config);
    let history = journal.history(run_id).map_err(ForgeflowError::from)?;
    if history.input.is_none() {
        return Err(ForgeflowError::from(EngineError::UnknownRun {
            run_id: run_id.to_string(),
        })
        .into());
    }

    // Progress is best effort; the journal is authoritative for status.
    let progress = FileProgressStore::new(config.state_dir())
        .load(run_id)
        .ok()
        .flatten();
    let finished = history.finished.as_ref();
    let output = StatusOutput {
        run_id: run_id.to_string(),
        status: history.status(),
        cancel_requested: history.is_cancelled(),
        failed_step: finished.and_then(|f| f.failed_step.clone()),
        error: finished.and_then(|f| f.error.clone()),
        pending_question: history.pending_question().cloned(),
        progress,
    };

    if json {
        let rendered = emit_jcs(&output).context("Failed to emit status JSON")?;
        println!("{rendered}");
    } else {
        print_human(&output);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_human(output: &StatusOutput) {
    println!("Run: {}", output.run_id);
    println!("  Status: {}", output.status);
    if output.cancel_requested && output.status == RunStatus::Running {
        println!("  Cancellation requested");
    }
    if let Some(step) = &output.failed_step {
        println!("  Stopped at: {step}");
    }
    if let Some(error) = &output.error {
        println!("  Error: {error}");
    }

    if let Some(progress) = &output.progress {
        println!(
            "  Progress: step {}/{} ({}%)",
            progress.run.current_step, progress.run.total_steps, progress.run.progress_percent
        );
        for step in &progress.steps {
            let mark = match step.status {
                StepStatus::Completed => "✓",
                StepStatus::Failed => "✗",
                StepStatus::Skipped => "-",
                StepStatus::InProgress => "…",
                StepStatus::Pending => " ",
            };
            let note = step
                .error
                .as_deref()
                .map(|e| format!(" ({e})"))
                .unwrap_or_default();
            println!("    {mark} {:>2} {}{note}", step.step_number, step.step_name);
        }
    }

    if let Some(question) = &output.pending_question {
        println!();
        println!(
            "  Waiting for a {} response to '{}' (expires {})",
            question.kind,
            question.question_id,
            question.timeout_at.to_rfc3339()
        );
        for option in question.payload.options() {
            let recommended = if option.recommended { " (recommended)" } else { "" };
            println!("    - {}: {}{recommended}", option.id, option.label);
        }
    }
}
