//! Respond command implementation
//!
//! Offline signal ingress: the response is checked against the run's journal
//! and recorded there, and the run picks it up when it is next driven.

use anyhow::Result;
use std::sync::Arc;

use forgeflow_config::Config;
use forgeflow_interrupt::{Delivery, DiscardReason, SignalIngress, SignalRouter};
use forgeflow_utils::exit_codes::ExitCode;
use forgeflow_utils::types::{QuestionResponse, ResponseType};

use super::open_journal;
use crate::ForgeflowError;

fn default_responder() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "cli".to_string())
}

pub fn execute_respond_command(
    run_id: &str,
    question_id: &str,
    response_type: ResponseType,
    option: Option<String>,
    text: Option<String>,
    by: Option<String>,
    config: &Config,
) -> Result<ExitCode> {
    let response = QuestionResponse {
        question_id: question_id.to_string(),
        response_type,
        selected_option: option,
        custom_text: text,
        responded_by: by.unwrap_or_else(default_responder),
    };

    let ingress = SignalIngress::new(Arc::new(SignalRouter::new()), open_journal(config));
    let delivery = ingress
        .deliver(run_id, response)
        .map_err(ForgeflowError::from)?;

    match delivery {
        Delivery::Delivered | Delivery::Recorded => {
            println!("Response to '{question_id}' recorded for run '{run_id}'");
            Ok(ExitCode::SUCCESS)
        }
        Delivery::Discarded(reason) => {
            let why = match reason {
                DiscardReason::NoPendingQuestion => "the run has no pending question".to_string(),
                DiscardReason::StaleQuestion { pending } => {
                    format!("the pending question is '{pending}'")
                }
                DiscardReason::RunFinished => "the run has already finished".to_string(),
            };
            eprintln!("Response discarded: {why}");
            Ok(ExitCode::CLI_ARGS)
        }
    }
}
