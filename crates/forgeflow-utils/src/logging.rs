//! Tracing setup and structured run/step log helpers.
//!
//! Every error string that reaches a log line goes through the secret
//! redactor first.

use tracing::{Level, error, info, span, warn};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Environment variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "FORGEFLOW_LOG";

/// Output format for [`init_tracing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

fn build_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("forgeflow=debug,info")
            } else {
                EnvFilter::try_new("forgeflow=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the global tracing subscriber.
///
/// `verbose` raises the default level to debug and emits span close events
/// (which carry timing). Fails if a subscriber is already installed.
pub fn init_tracing(
    verbose: bool,
    format: LogFormat,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = build_filter(verbose);
    let span_events = if verbose {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_events(span_events)
                    .with_writer(std::io::stderr),
            )
            .try_init()?,
        LogFormat::Compact => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(verbose)
                    .with_thread_ids(false)
                    .with_line_number(false)
                    .with_file(false)
                    .with_span_events(span_events)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .try_init()?,
    }

    Ok(())
}

/// Span covering one run; step logs nest inside it.
pub fn run_span(run_id: &str, task_id: &str) -> tracing::Span {
    span!(
        Level::INFO,
        "run",
        run_id = %run_id,
        task_id = %task_id,
    )
}

pub fn log_step_start(run_id: &str, step: &str, step_number: u32) {
    info!(run_id = %run_id, step = %step, step_number, "Step started");
}

pub fn log_step_complete(run_id: &str, step: &str, step_number: u32, duration_ms: u64) {
    info!(
        run_id = %run_id,
        step = %step,
        step_number,
        duration_ms,
        "Step completed"
    );
}

pub fn log_step_skipped(run_id: &str, step: &str, step_number: u32, reason: &str) {
    info!(
        run_id = %run_id,
        step = %step,
        step_number,
        reason = %reason,
        "Step skipped"
    );
}

pub fn log_step_failed(run_id: &str, step: &str, step_number: u32, err: &str) {
    let sanitized = forgeflow_redaction::redact_user_string(err);
    error!(
        run_id = %run_id,
        step = %step,
        step_number,
        error = %sanitized,
        "Step failed"
    );
}

/// Warn about a swallowed failure in a best-effort path.
pub fn log_best_effort_failure(run_id: &str, operation: &str, err: &str) {
    let sanitized = forgeflow_redaction::redact_user_string(err);
    warn!(
        run_id = %run_id,
        operation = %operation,
        error = %sanitized,
        "Best-effort operation failed; continuing"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_helpers_do_not_panic_without_subscriber() {
        let token = format!("ghp_{}", "x".repeat(36));
        let _guard = run_span("run-1", "TASK-1").entered();
        log_step_start("run-1", "sync_task", 1);
        log_step_complete("run-1", "sync_task", 1, 12);
        log_step_skipped("run-1", "approval", 7, "disabled");
        log_step_failed("run-1", "create_branch", 5, &format!("auth {token}"));
        log_best_effort_failure("run-1", "mark_failed", "tracker down");
    }

    #[test]
    fn test_filter_builds_for_both_modes() {
        let _ = build_filter(true);
        let _ = build_filter(false);
    }
}
