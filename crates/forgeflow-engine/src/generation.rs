use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use forgeflow_sandbox::ValidationExecutor;
use forgeflow_utils::types::{
    GeneratedArtifactSet, QuestionPayload, QuestionResolution, RepoRef, ResponseType,
    TaskSnapshot, TechnicalPlan, ValidationResult,
};

use crate::collaborators::{FailureAnalysis, FailureAnalyzer, GenerationRequest, Generator};
use crate::context::WorkflowContext;
use crate::error::{ActivityError, EngineError};

/// Collaborators and switches for the generate/validate loop.
#[derive(Debug, Clone)]
pub struct GenerationLoop {
    pub generator: Arc<dyn Generator>,
    pub executor: Arc<dyn ValidationExecutor>,
    pub analyzer: Arc<dyn FailureAnalyzer>,
    pub max_retries: u32,
    pub validation_enabled: bool,
    /// Offer a choice when the analysis proposes more than one fix.
    pub solution_choice: bool,
}

/// Final state of the loop.
///
/// `validation` is `None` when validation is disabled. A failed validation
/// here means retries were exhausted; the artifacts are still usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopOutcome {
    pub artifacts: GeneratedArtifactSet,
    pub validation: Option<ValidationResult>,
    /// Zero-based index of the last attempt; 0 means the first try was final.
    pub attempts_used: u32,
}

impl LoopOutcome {
    #[must_use]
    pub fn checks_passed(&self) -> bool {
        self.validation.as_ref().is_none_or(|v| v.success)
    }
}

impl GenerationLoop {
    /// Generate, validate, and on failure retry with the failure analysis
    /// threaded into the next request.
    ///
    /// Exhausting the retries is not an error. A failed generation uses up an
    /// attempt like a failed validation does; the run only fails when no
    /// attempt ever produced artifacts.
    pub async fn generate_and_validate(
        &self,
        ctx: &mut WorkflowContext,
        task: &TaskSnapshot,
        plan: &TechnicalPlan,
        repo: &RepoRef,
    ) -> Result<LoopOutcome, EngineError> {
        let mut attempt = 0;
        let mut error_context = String::new();
        let mut last_generated: Option<LoopOutcome> = None;

        loop {
            if ctx.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            info!(run_id = %ctx.run_id(), attempt, max_retries = self.max_retries, "Generation attempt");

            let request = GenerationRequest {
                task: task.clone(),
                plan: plan.clone(),
                attempt,
                error_context: error_context.clone(),
            };
            let generator = self.generator.as_ref();
            let req = &request;
            let generated: Result<GeneratedArtifactSet, EngineError> = ctx
                .activity("generate", move || generator.generate(req))
                .await;
            let mut artifacts = match generated {
                Ok(artifacts) => artifacts,
                Err(EngineError::Activity { message, .. }) => {
                    warn!(run_id = %ctx.run_id(), attempt, error = %message, "Generation failed");
                    if attempt >= self.max_retries {
                        return last_generated
                            .map(|outcome| LoopOutcome {
                                attempts_used: attempt,
                                ..outcome
                            })
                            .ok_or(EngineError::Generation { attempt, message });
                    }
                    error_context = format!(
                        "Attempt {attempt} failed before validation: code generation error: {message}"
                    );
                    attempt += 1;
                    continue;
                }
                Err(other) => return Err(other),
            };
            artifacts.attempt = attempt;

            if !self.validation_enabled {
                return Ok(LoopOutcome {
                    artifacts,
                    validation: None,
                    attempts_used: attempt,
                });
            }

            let executor = self.executor.as_ref();
            let (arts, repo_ref) = (&artifacts, repo);
            let validation: ValidationResult = ctx
                .activity("validate", move || async move {
                    executor
                        .execute(arts, repo_ref)
                        .await
                        .map_err(ActivityError::from)
                })
                .await?;

            if validation.success {
                info!(run_id = %ctx.run_id(), attempt, "Validation passed");
                return Ok(LoopOutcome {
                    artifacts,
                    validation: Some(validation),
                    attempts_used: attempt,
                });
            }

            if attempt >= self.max_retries {
                warn!(
                    run_id = %ctx.run_id(),
                    attempt,
                    summary = %validation.summary(),
                    "Retries exhausted; continuing with failing artifacts"
                );
                return Ok(LoopOutcome {
                    artifacts,
                    validation: Some(validation),
                    attempts_used: attempt,
                });
            }

            let analyzer = self.analyzer.as_ref();
            let val = &validation;
            let analysis: FailureAnalysis = ctx
                .activity("analyze_failure", move || analyzer.analyze(arts, val))
                .await?;
            info!(
                run_id = %ctx.run_id(),
                attempt,
                failed_phase = %analysis.failed_phase,
                solutions = analysis.solutions.len(),
                "Validation failed; retrying with analysis"
            );

            error_context = if self.solution_choice && analysis.solutions.len() > 1 {
                self.choose_solution(ctx, &analysis).await?
            } else {
                analysis.retry_prompt_enhancement.clone()
            };
            last_generated = Some(LoopOutcome {
                artifacts,
                validation: Some(validation),
                attempts_used: attempt,
            });
            attempt += 1;
        }
    }

    async fn choose_solution(
        &self,
        ctx: &mut WorkflowContext,
        analysis: &FailureAnalysis,
    ) -> Result<String, EngineError> {
        let payload = QuestionPayload::SolutionChoice {
            failed_phase: analysis.failed_phase,
            summary: analysis.summary.clone(),
            options: analysis.solutions.clone(),
        };
        let (question, resolution) = ctx.ask(payload).await?;

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

        let chosen = response
            .selected_option
            .as_deref()
            .and_then(|id| question.payload.option(id));
        let context = match (response.response_type, chosen, response.custom_text) {
            (ResponseType::Custom, _, Some(text)) => format!(
                "{}\n\nThe reviewer asked for this approach: {text}",
                analysis.retry_prompt_enhancement
            ),
            (_, Some(option), _) => format!(
                "{}\n\nUse this approach: {}: {}",
                analysis.retry_prompt_enhancement, option.label, option.description
            ),
            _ => analysis.retry_prompt_enhancement.clone(),
        };
        Ok(context)
    }
}
