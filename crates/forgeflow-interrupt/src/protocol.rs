use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{info, warn};

use forgeflow_utils::cancel::CancelSignal;
use forgeflow_utils::clock::Clock;
use forgeflow_utils::ids::derive_id;
use forgeflow_utils::types::{
    PendingQuestion, QuestionKind, QuestionPayload, QuestionResolution, QuestionResponse,
    QuestionStatus, ResponseType,
};

use crate::notify::{LogNotifier, QuestionNotifier};
use crate::router::SignalRouter;
use crate::InterruptError;

/// `responded_by` on responses the engine synthesizes itself.
pub const AUTO_RESPONDER: &str = "forgeflow";

/// Deterministic id for the question posted at command `seq` of `run_id`.
#[must_use]
pub fn question_id(run_id: &str, kind: QuestionKind, seq: u64) -> String {
    derive_id(kind.as_ref(), &[run_id, kind.as_ref(), &seq.to_string()])
}

/// Check that `response` is a well-formed answer to `question`.
pub fn validate_response(
    question: &PendingQuestion,
    response: &QuestionResponse,
) -> Result<(), InterruptError> {
    let invalid = |reason: String| InterruptError::InvalidResponse {
        question_id: question.question_id.clone(),
        reason,
    };

    if response.question_id != question.question_id {
        return Err(invalid(format!(
            "response is for question '{}'",
            response.question_id
        )));
    }

    match (response.response_type, question.kind) {
        (ResponseType::AutoProceed, _) => {
            Err(invalid("auto_proceed responses are synthesized internally".to_string()))
        }
        (ResponseType::Approve | ResponseType::Reject, QuestionKind::Approval) => Ok(()),
        (ResponseType::Approve | ResponseType::Reject, kind) => Err(invalid(format!(
            "{} is only valid for approval questions, not {kind}",
            response.response_type
        ))),
        (ResponseType::Answer, _) => match response.selected_option.as_deref() {
            Some(id) if question.payload.option(id).is_some() => Ok(()),
            Some(id) => Err(invalid(format!("unknown option '{id}'"))),
            None => Err(invalid("answer requires a selected option".to_string())),
        },
        (ResponseType::Custom, _) => match response.custom_text.as_deref() {
            Some(text) if !text.trim().is_empty() => Ok(()),
            _ => Err(invalid("custom response requires text".to_string())),
        },
    }
}

/// The response synthesized when a question times out with auto-proceed on.
///
/// Selects the recommended option, or none when no option is recommended.
/// Approval questions auto-approve.
#[must_use]
pub fn recommended_response(question: &PendingQuestion) -> QuestionResponse {
    QuestionResponse {
        question_id: question.question_id.clone(),
        response_type: ResponseType::AutoProceed,
        selected_option: question.payload.recommended().map(|o| o.id.clone()),
        custom_text: None,
        responded_by: AUTO_RESPONDER.to_string(),
    }
}

/// Posts questions and waits for their resolution.
///
/// Holds no per-run state of its own; pending slots live in the shared
/// [`SignalRouter`] so that the signal ingress can reach them.
#[derive(Debug, Clone)]
pub struct HumanInterrupts {
    router: Arc<SignalRouter>,
    notifier: Arc<dyn QuestionNotifier>,
    clock: Arc<dyn Clock>,
    timeout: chrono::Duration,
    auto_proceed: bool,
}

impl HumanInterrupts {
    pub fn new(router: Arc<SignalRouter>, clock: Arc<dyn Clock>) -> Self {
        Self {
            router,
            notifier: Arc::new(LogNotifier),
            clock,
            timeout: chrono::Duration::hours(24),
            auto_proceed: false,
        }
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn QuestionNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: chrono::Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_auto_proceed(mut self, auto_proceed: bool) -> Self {
        self.auto_proceed = auto_proceed;
        self
    }

    #[must_use]
    pub fn router(&self) -> &Arc<SignalRouter> {
        &self.router
    }

    /// Build the question for command `seq`, due `timeout` after `posted_at`.
    #[must_use]
    pub fn new_question(
        &self,
        run_id: &str,
        seq: u64,
        payload: QuestionPayload,
        posted_at: DateTime<Utc>,
    ) -> PendingQuestion {
        let kind = payload.kind();
        PendingQuestion {
            question_id: question_id(run_id, kind, seq),
            run_id: run_id.to_string(),
            kind,
            payload,
            posted_at,
            timeout_at: posted_at + self.timeout,
            status: QuestionStatus::Pending,
        }
    }

    /// Tell humans about a newly posted question.
    pub async fn notify(&self, question: &PendingQuestion) -> Result<(), InterruptError> {
        self.notifier.question_posted(question).await
    }

    /// Install `question` as the run's pending question.
    pub fn register(
        &self,
        question: &PendingQuestion,
    ) -> Result<oneshot::Receiver<QuestionResponse>, InterruptError> {
        self.router.register(question)
    }

    /// Wait on a registered question until it is answered, times out, or the
    /// run is cancelled.
    ///
    /// The deadline is the question's recorded `timeout_at`, so a resumed run
    /// keeps the original deadline.
    pub async fn await_response(
        &self,
        question: &PendingQuestion,
        mut rx: oneshot::Receiver<QuestionResponse>,
        cancel: &CancelSignal,
    ) -> QuestionResolution {
        let run_id = question.run_id.as_str();
        let question_id = question.question_id.as_str();
        info!(
            run_id = %run_id,
            question_id = %question_id,
            kind = %question.kind,
            timeout_at = %question.timeout_at,
            "Waiting for human response"
        );

        enum Woke {
            Response(Option<QuestionResponse>),
            Deadline,
            Cancelled,
        }

        let woke = tokio::select! {
            biased;
            response = &mut rx => Woke::Response(response.ok()),
            () = cancel.cancelled() => Woke::Cancelled,
            () = self.clock.sleep_until(question.timeout_at) => Woke::Deadline,
        };

        let woke = match woke {
            Woke::Response(response) => Woke::Response(response),
            other => {
                // A delivery may have claimed the slot just before we woke.
                // Otherwise the slot stays closed until the run records this
                // resolution, so a late response cannot be recorded first.
                if self.router.close(run_id, question_id) {
                    other
                } else {
                    Woke::Response(rx.await.ok())
                }
            }
        };

        match woke {
            Woke::Response(Some(response)) => QuestionResolution::Responded { response },
            Woke::Response(None) => {
                warn!(run_id = %run_id, question_id = %question_id, "Response channel closed");
                QuestionResolution::Cancelled
            }
            Woke::Cancelled => {
                info!(run_id = %run_id, question_id = %question_id, "Wait cancelled");
                QuestionResolution::Cancelled
            }
            Woke::Deadline => self.on_timeout(question),
        }
    }

    /// Resolution for a question whose deadline has passed.
    #[must_use]
    pub fn on_timeout(&self, question: &PendingQuestion) -> QuestionResolution {
        if self.auto_proceed {
            let response = recommended_response(question);
            info!(
                run_id = %question.run_id,
                question_id = %question.question_id,
                selected = ?response.selected_option,
                "Question timed out; auto-proceeding"
            );
            QuestionResolution::AutoProceeded { response }
        } else {
            warn!(
                run_id = %question.run_id,
                question_id = %question.question_id,
                "Question timed out"
            );
            QuestionResolution::TimedOut
        }
    }

    /// Whether the deadline of `question` has passed by the clock's reckoning.
    #[must_use]
    pub fn is_overdue(&self, question: &PendingQuestion) -> bool {
        self.clock.now() >= question.timeout_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::Delivery;
    use forgeflow_utils::cancel::cancel_pair;
    use forgeflow_utils::test_support::{epoch, manual_clock};
    use forgeflow_utils::types::QuestionOption;
    use std::time::Duration;

    fn option(id: &str, recommended: bool) -> QuestionOption {
        QuestionOption {
            id: id.to_string(),
            label: id.to_string(),
            description: format!("use {id}"),
            pros: vec![],
            cons: vec![],
            recommended,
        }
    }

    fn clarification(recommended: bool) -> QuestionPayload {
        QuestionPayload::Clarification {
            question: "Which store?".to_string(),
            options: vec![option("memory", false), option("redis", recommended)],
        }
    }

    fn interrupts(clock: &forgeflow_utils::clock::ManualClock, auto: bool) -> HumanInterrupts {
        HumanInterrupts::new(Arc::new(SignalRouter::new()), Arc::new(clock.clone()))
            .with_timeout(chrono::Duration::hours(24))
            .with_auto_proceed(auto)
    }

    #[test]
    fn test_question_id_is_deterministic_per_seq() {
        let a = question_id("run-1", QuestionKind::Approval, 7);
        assert_eq!(a, question_id("run-1", QuestionKind::Approval, 7));
        assert_ne!(a, question_id("run-1", QuestionKind::Approval, 8));
        assert!(a.starts_with("approval-"));
    }

    #[test]
    fn test_validate_response_rules() {
        let clock = manual_clock();
        let hi = interrupts(&clock, false);
        let q = hi.new_question("run-1", 1, clarification(true), epoch());
        let base = QuestionResponse {
            question_id: q.question_id.clone(),
            response_type: ResponseType::Answer,
            selected_option: Some("redis".to_string()),
            custom_text: None,
            responded_by: "alice".to_string(),
        };
        assert!(validate_response(&q, &base).is_ok());

        let approve = QuestionResponse {
            response_type: ResponseType::Approve,
            selected_option: None,
            ..base.clone()
        };
        assert!(validate_response(&q, &approve).is_err());

        let empty_custom = QuestionResponse {
            response_type: ResponseType::Custom,
            selected_option: None,
            custom_text: Some("  ".to_string()),
            ..base.clone()
        };
        assert!(validate_response(&q, &empty_custom).is_err());

        let auto = QuestionResponse {
            response_type: ResponseType::AutoProceed,
            ..base
        };
        assert!(validate_response(&q, &auto).is_err());
    }

    #[tokio::test]
    async fn test_timeout_auto_proceeds_with_recommended_option() {
        let clock = manual_clock();
        let hi = interrupts(&clock, true);
        let q = hi.new_question("run-1", 3, clarification(true), clock.now());
        let rx = hi.register(&q).unwrap();
        let (_handle, cancel) = cancel_pair();

        let waiter = {
            let hi = hi.clone();
            let q = q.clone();
            tokio::spawn(async move { hi.await_response(&q, rx, &cancel).await })
        };
        tokio::task::yield_now().await;
        clock.advance(chrono::Duration::hours(24));

        let resolution = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        let QuestionResolution::AutoProceeded { response } = resolution else {
            panic!("expected auto-proceed, got {resolution:?}");
        };
        assert_eq!(response.selected_option.as_deref(), Some("redis"));
        assert_eq!(response.responded_by, AUTO_RESPONDER);
        assert_eq!(hi.router().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_without_recommendation_selects_nothing() {
        let clock = manual_clock();
        let hi = interrupts(&clock, true);
        let q = hi.new_question("run-1", 3, clarification(false), clock.now());
        let rx = hi.register(&q).unwrap();
        clock.advance(chrono::Duration::hours(25));

        let resolution = hi.await_response(&q, rx, &CancelSignal::never()).await;
        assert_eq!(
            resolution.response().and_then(|r| r.selected_option.clone()),
            None
        );
    }

    #[tokio::test]
    async fn test_timeout_without_auto_proceed_times_out() {
        let clock = manual_clock();
        let hi = interrupts(&clock, false);
        let q = hi.new_question("run-1", 3, clarification(true), clock.now());
        let rx = hi.register(&q).unwrap();
        clock.advance(chrono::Duration::hours(24));

        let resolution = hi.await_response(&q, rx, &CancelSignal::never()).await;
        assert_eq!(resolution, QuestionResolution::TimedOut);
        assert!(hi.is_overdue(&q));
    }

    #[tokio::test]
    async fn test_response_before_deadline_wins() {
        let clock = manual_clock();
        let hi = interrupts(&clock, true);
        let q = hi.new_question("run-1", 3, clarification(true), clock.now());
        let rx = hi.register(&q).unwrap();

        let delivery = hi
            .router()
            .deliver(
                "run-1",
                QuestionResponse {
                    question_id: q.question_id.clone(),
                    response_type: ResponseType::Answer,
                    selected_option: Some("memory".to_string()),
                    custom_text: None,
                    responded_by: "bob".to_string(),
                },
            )
            .unwrap();
        assert_eq!(delivery, Delivery::Delivered);

        let resolution = hi.await_response(&q, rx, &CancelSignal::never()).await;
        assert_eq!(
            resolution.response().and_then(|r| r.selected_option.as_deref()),
            Some("memory")
        );
    }

    #[tokio::test]
    async fn test_cancel_resolves_wait() {
        let clock = manual_clock();
        let hi = interrupts(&clock, false);
        let q = hi.new_question("run-1", 3, clarification(true), clock.now());
        let rx = hi.register(&q).unwrap();
        let (handle, cancel) = cancel_pair();
        handle.cancel();

        let resolution = hi.await_response(&q, rx, &cancel).await;
        assert_eq!(resolution, QuestionResolution::Cancelled);
        assert_eq!(hi.router().pending_count(), 0);
    }
}
