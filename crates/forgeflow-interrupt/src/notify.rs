use async_trait::async_trait;
use std::fmt::Write as _;
use tracing::info;

use forgeflow_utils::types::{PendingQuestion, QuestionPayload};

use crate::InterruptError;

/// Side channel that tells humans a question is waiting.
///
/// Called once per posted question. Failures are reported to the caller,
/// which treats notification as best-effort.
#[async_trait]
pub trait QuestionNotifier: Send + Sync + std::fmt::Debug {
    async fn question_posted(&self, question: &PendingQuestion) -> Result<(), InterruptError>;
}

/// Notifier that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl QuestionNotifier for LogNotifier {
    async fn question_posted(&self, question: &PendingQuestion) -> Result<(), InterruptError> {
        info!(
            run_id = %question.run_id,
            question_id = %question.question_id,
            kind = %question.kind,
            timeout_at = %question.timeout_at,
            "Question posted"
        );
        Ok(())
    }
}

/// Markdown rendering of a question, suitable for an issue comment.
///
/// Includes the question id and the `forgeflow respond` invocation so the
/// reader can answer from a terminal.
#[must_use]
pub fn render_question(question: &PendingQuestion) -> String {
    let mut out = String::new();
    let heading = match &question.payload {
        QuestionPayload::Clarification { .. } => "Clarification needed",
        QuestionPayload::SolutionChoice { .. } => "Validation failed: choose a fix",
        QuestionPayload::Approval { .. } => "Approval required",
    };
    let _ = writeln!(out, "### {heading}\n");

    match &question.payload {
        QuestionPayload::Clarification { question: text, .. } => {
            let _ = writeln!(out, "{text}\n");
        }
        QuestionPayload::SolutionChoice {
            failed_phase,
            summary,
            ..
        } => {
            let _ = writeln!(out, "Failed phase: `{failed_phase}`\n\n{summary}\n");
        }
        QuestionPayload::Approval { summary, .. } => {
            let _ = writeln!(out, "{summary}\n");
        }
    }

    for option in question.payload.options() {
        let marker = if option.recommended { " (recommended)" } else { "" };
        let _ = writeln!(
            out,
            "- **{}** `{}`{marker}: {}",
            option.label, option.id, option.description
        );
        for pro in &option.pros {
            let _ = writeln!(out, "  - + {pro}");
        }
        for con in &option.cons {
            let _ = writeln!(out, "  - - {con}");
        }
    }

    let _ = writeln!(
        out,
        "\nQuestion `{}` expires at {}.",
        question.question_id,
        question.timeout_at.to_rfc3339()
    );
    let _ = write!(
        out,
        "Respond with `forgeflow respond {} {} --type <answer|custom|approve|reject>`.",
        question.run_id, question.question_id
    );
    forgeflow_redaction::redact_user_string(&out)
}
