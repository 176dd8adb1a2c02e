//! Cancel command implementation

use anyhow::Result;

use forgeflow_config::Config;
use forgeflow_engine::request_cancel;
use forgeflow_utils::clock::SystemClock;
use forgeflow_utils::exit_codes::ExitCode;

use super::open_journal;
use crate::ForgeflowError;

/// Record a cancellation request. A live run stops at its next step
/// boundary; a suspended run stops when it is next resumed.
pub fn execute_cancel_command(run_id: &str, reason: &str, config: &Config) -> Result<ExitCode> {
    let journal = open_journal(config);
    let accepted =
        request_cancel(journal.as_ref(), &SystemClock, run_id, reason).map_err(ForgeflowError::from)?;
    if accepted {
        println!("Cancellation requested for run '{run_id}'");
    } else {
        println!("Run '{run_id}' has already finished; nothing to cancel");
    }
    Ok(ExitCode::SUCCESS)
}
