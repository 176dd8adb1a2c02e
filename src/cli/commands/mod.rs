//! CLI command implementations.
//!
//! Each handler returns the exit code to use on success paths that still
//! signal a problem (a failed doctor check, a discarded response). Errors are
//! reported by `run.rs`.

mod cancel;
mod config;
mod doctor;
mod history;
mod respond;
mod status;

pub use cancel::execute_cancel_command;
pub use config::execute_config_command;
pub use doctor::execute_doctor_command;
pub use history::execute_history_command;
pub use respond::execute_respond_command;
pub use status::execute_status_command;

use std::sync::Arc;

use forgeflow_config::Config;
use forgeflow_journal::{FileJournal, JournalStore};

/// Journal store rooted at the configured state directory.
fn open_journal(config: &Config) -> Arc<dyn JournalStore> {
    Arc::new(FileJournal::new(config.state_dir()))
}
