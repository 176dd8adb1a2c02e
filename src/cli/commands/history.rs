//! History command implementation

use anyhow::{Context, Result};

use forgeflow_config::Config;
use forgeflow_utils::canonicalization::emit_jcs;
use forgeflow_utils::exit_codes::ExitCode;

use super::open_journal;
use crate::ForgeflowError;

/// Print the run's journal, one canonical JSON entry per line.
pub fn execute_history_command(run_id: &str, config: &Config) -> Result<ExitCode> {
    let journal = open_journal(config);
    let entries = journal.load(run_id).map_err(ForgeflowError::from)?;
    if entries.is_empty() {
        return Err(ForgeflowError::from(forgeflow_engine::EngineError::UnknownRun {
            run_id: run_id.to_string(),
        })
        .into());
    }
    for entry in &entries {
        let line = emit_jcs(entry).context("Failed to emit journal entry")?;
        println!("{}", forgeflow_redaction::redact_user_string(&line));
    }
    Ok(ExitCode::SUCCESS)
}
