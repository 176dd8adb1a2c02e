use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, info};

use forgeflow_utils::types::{PendingQuestion, QuestionResponse};

use crate::InterruptError;
use crate::protocol::validate_response;

/// What happened to a delivered response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the live waiter.
    Delivered,
    /// No live waiter; written to the run's journal for replay.
    Recorded,
    /// Dropped without any state change.
    Discarded(DiscardReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    NoPendingQuestion,
    /// The response names a question other than the run's pending one.
    StaleQuestion { pending: String },
    RunFinished,
}

#[derive(Debug)]
enum Slot {
    Waiting {
        question: PendingQuestion,
        tx: oneshot::Sender<QuestionResponse>,
    },
    /// A live waiter already took a response for this question, or stopped
    /// waiting on it. Kept until the run registers its next question so late
    /// responses are dropped instead of reaching the journal ahead of the
    /// run's own resolution.
    Answered { question_id: String },
}

impl Slot {
    fn question_id(&self) -> &str {
        match self {
            Self::Waiting { question, .. } => &question.question_id,
            Self::Answered { question_id } => question_id,
        }
    }
}

/// Per-run pending-question slots for in-process waiters.
#[derive(Debug, Default)]
pub struct SignalRouter {
    slots: Mutex<HashMap<String, Slot>>,
}

impl SignalRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `question` the run's current pending question.
    ///
    /// Re-registering the same question id replaces the waiter (a resumed run
    /// re-awaiting its question); a different id is rejected while one is
    /// pending.
    pub fn register(
        &self,
        question: &PendingQuestion,
    ) -> Result<oneshot::Receiver<QuestionResponse>, InterruptError> {
        let mut slots = self.slots();
        if let Some(Slot::Waiting { question: existing, tx }) = slots.get(&question.run_id)
            && existing.question_id != question.question_id
            && !tx.is_closed()
        {
            return Err(InterruptError::QuestionAlreadyPending {
                run_id: question.run_id.clone(),
                pending: existing.question_id.clone(),
            });
        }
        let (tx, rx) = oneshot::channel();
        slots.insert(
            question.run_id.clone(),
            Slot::Waiting {
                question: question.clone(),
                tx,
            },
        );
        debug!(
            run_id = %question.run_id,
            question_id = %question.question_id,
            "Registered pending question"
        );
        Ok(rx)
    }

    /// Deliver a response, discarding it unless it matches the pending question.
    pub fn deliver(
        &self,
        run_id: &str,
        response: QuestionResponse,
    ) -> Result<Delivery, InterruptError> {
        self.deliver_or_else(run_id, response, |_| {
            Ok(Delivery::Discarded(DiscardReason::NoPendingQuestion))
        })
    }

    /// Like [`deliver`](Self::deliver), but runs `fallback` when the run has
    /// no live waiter.
    ///
    /// The fallback runs with the router locked, so a waiter registering at
    /// the same time observes either the live delivery or whatever the
    /// fallback persisted, never neither.
    pub fn deliver_or_else<F>(
        &self,
        run_id: &str,
        response: QuestionResponse,
        fallback: F,
    ) -> Result<Delivery, InterruptError>
    where
        F: FnOnce(QuestionResponse) -> Result<Delivery, InterruptError>,
    {
        let mut slots = self.slots();
        let question = match slots.get(run_id) {
            None => return fallback(response),
            Some(Slot::Answered { question_id }) if *question_id == response.question_id => {
                debug!(
                    run_id = %run_id,
                    question_id = %question_id,
                    "Discarding duplicate response for an answered question"
                );
                return Ok(Delivery::Discarded(DiscardReason::NoPendingQuestion));
            }
            Some(Slot::Answered { .. }) => return fallback(response),
            Some(Slot::Waiting { question, .. }) => question,
        };

        if question.question_id != response.question_id {
            info!(
                run_id = %run_id,
                pending = %question.question_id,
                received = %response.question_id,
                "Discarding response for a question that is not pending"
            );
            return Ok(Delivery::Discarded(DiscardReason::StaleQuestion {
                pending: question.question_id.clone(),
            }));
        }
        validate_response(question, &response)?;

        let question_id = response.question_id.clone();
        let Some(Slot::Waiting { tx, .. }) = slots.remove(run_id) else {
            return fallback(response);
        };
        match tx.send(response) {
            Ok(()) => {
                slots.insert(
                    run_id.to_string(),
                    Slot::Answered {
                        question_id: question_id.clone(),
                    },
                );
                info!(run_id = %run_id, question_id = %question_id, "Response delivered");
                Ok(Delivery::Delivered)
            }
            Err(response) => fallback(response),
        }
    }

    /// Remove the slot if it still holds `question_id`.
    ///
    /// Returns `false` when the slot was already taken by a delivery; the
    /// waiter's receiver then holds that response.
    pub fn clear(&self, run_id: &str, question_id: &str) -> bool {
        let mut slots = self.slots();
        match slots.get(run_id) {
            Some(Slot::Waiting { question, .. }) if question.question_id == question_id => {
                slots.remove(run_id);
                true
            }
            _ => false,
        }
    }

    /// Stop accepting responses for `question_id` without taking one.
    ///
    /// Used when the waiter gives up (deadline or cancellation). The slot
    /// becomes an answered marker, so a response racing the waiter is
    /// discarded rather than recorded. Returns `false` when a delivery got
    /// there first; the waiter's receiver then holds that response.
    pub fn close(&self, run_id: &str, question_id: &str) -> bool {
        let mut slots = self.slots();
        match slots.get(run_id) {
            Some(Slot::Waiting { question, .. }) if question.question_id == question_id => {
                slots.insert(
                    run_id.to_string(),
                    Slot::Answered {
                        question_id: question_id.to_string(),
                    },
                );
                true
            }
            _ => false,
        }
    }

    /// Forget the run entirely, including any answered marker.
    pub fn release(&self, run_id: &str) {
        self.slots().remove(run_id);
    }

    #[must_use]
    pub fn pending_question_id(&self, run_id: &str) -> Option<String> {
        match self.slots().get(run_id) {
            Some(Slot::Waiting { question, .. }) => Some(question.question_id.clone()),
            _ => None,
        }
    }

    /// Number of runs currently waiting on a human.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.slots()
            .values()
            .filter(|slot| matches!(slot, Slot::Waiting { .. }))
            .count()
    }
}
