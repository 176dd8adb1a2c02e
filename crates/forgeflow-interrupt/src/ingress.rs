use std::sync::Arc;
use tracing::info;

use forgeflow_journal::{HistoryEvent, JournalStore};
use forgeflow_utils::types::{QuestionResolution, QuestionResponse};

use crate::protocol::validate_response;
use crate::router::{Delivery, DiscardReason, SignalRouter};
use crate::InterruptError;

/// Entry point for responses arriving from outside the run.
///
/// A response goes to the live waiter when the run is suspended in this
/// process. Otherwise it is checked against the journal and, if it answers
/// the run's current unresolved question, recorded there so the resumed run
/// picks it up during replay.
#[derive(Debug, Clone)]
pub struct SignalIngress {
    router: Arc<SignalRouter>,
    journal: Arc<dyn JournalStore>,
}

impl SignalIngress {
    pub fn new(router: Arc<SignalRouter>, journal: Arc<dyn JournalStore>) -> Self {
        Self { router, journal }
    }

    pub fn deliver(
        &self,
        run_id: &str,
        response: QuestionResponse,
    ) -> Result<Delivery, InterruptError> {
        self.router
            .deliver_or_else(run_id, response, |response| self.record(run_id, response))
    }

    fn record(&self, run_id: &str, response: QuestionResponse) -> Result<Delivery, InterruptError> {
        let history = self.journal.history(run_id)?;
        if history.input.is_none() {
            return Err(InterruptError::UnknownRun {
                run_id: run_id.to_string(),
            });
        }
        if history.finished.is_some() {
            return Ok(Delivery::Discarded(DiscardReason::RunFinished));
        }

        let Some(pending) = history.pending_question() else {
            return Ok(Delivery::Discarded(DiscardReason::NoPendingQuestion));
        };
        if pending.question_id != response.question_id {
            info!(
                run_id = %run_id,
                pending = %pending.question_id,
                received = %response.question_id,
                "Discarding response for a question that is not pending"
            );
            return Ok(Delivery::Discarded(DiscardReason::StaleQuestion {
                pending: pending.question_id.clone(),
            }));
        }
        validate_response(pending, &response)?;

        let question_id = response.question_id.clone();
        self.journal.append(
            run_id,
            HistoryEvent::QuestionResolved {
                question_id: question_id.clone(),
                resolution: QuestionResolution::Responded { response },
            },
        )?;
        info!(run_id = %run_id, question_id = %question_id, "Response recorded for replay");
        Ok(Delivery::Recorded)
    }
}
