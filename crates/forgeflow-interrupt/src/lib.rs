//! Human interrupt protocol.
//!
//! A run posts at most one [`PendingQuestion`] at a time and suspends until a
//! response with the matching question id arrives, the question times out,
//! or the run is cancelled. Responses are correlated per run by a guarded
//! compare-and-set in [`SignalRouter`]; anything that does not match the
//! run's current question is discarded without side effects.
//!
//! [`PendingQuestion`]: forgeflow_utils::types::PendingQuestion

mod ingress;
mod notify;
mod protocol;
mod router;

pub use ingress::SignalIngress;
pub use notify::{LogNotifier, QuestionNotifier, render_question};
pub use protocol::{
    AUTO_RESPONDER, HumanInterrupts, question_id, recommended_response, validate_response,
};
pub use router::{Delivery, DiscardReason, SignalRouter};

use forgeflow_journal::JournalError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InterruptError {
    #[error("run '{run_id}' already has pending question '{pending}'")]
    QuestionAlreadyPending { run_id: String, pending: String },

    #[error("response to question '{question_id}' is invalid: {reason}")]
    InvalidResponse { question_id: String, reason: String },

    #[error("failed to notify about question '{question_id}': {reason}")]
    Notify { question_id: String, reason: String },

    #[error("run '{run_id}' has no history")]
    UnknownRun { run_id: String },

    #[error(transparent)]
    Journal(#[from] JournalError),
}
