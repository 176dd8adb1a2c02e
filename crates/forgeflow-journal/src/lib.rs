//! Append-only run history.
//!
//! Every decision a run makes that depends on the outside world (activity
//! results, clock reads, human answers, cancellation) is recorded here as a
//! [`HistoryEvent`]. A restarted process replays the journal to reach the
//! exact position the run was in before the crash.
//!
//! Two stores are provided: [`InMemoryJournal`] for tests and embedders that
//! bring their own durability, and [`FileJournal`], one JSON-lines file per
//! run under `<state>/runs/<run_id>/journal.jsonl`.

mod error;
mod event;
mod file;
mod history;
mod lock;
mod memory;

pub use error::JournalError;
pub use event::{HistoryEvent, JournalEntry};
pub use file::FileJournal;
pub use history::{ActivityRecord, FinishedRun, RunHistory};
pub use lock::RunLock;
pub use memory::InMemoryJournal;

/// Durable, per-run, append-only event store.
///
/// Implementations must assign strictly increasing sequence numbers per run
/// and return entries in append order.
pub trait JournalStore: Send + Sync + std::fmt::Debug {
    /// Append `event`, returning its sequence number (0-based).
    fn append(&self, run_id: &str, event: HistoryEvent) -> Result<u64, JournalError>;

    /// All entries for a run in order. Unknown runs yield an empty list.
    fn load(&self, run_id: &str) -> Result<Vec<JournalEntry>, JournalError>;

    /// Run ids with at least one entry, sorted.
    fn list_runs(&self) -> Result<Vec<String>, JournalError>;

    /// Replay projection for a run.
    fn history(&self, run_id: &str) -> Result<RunHistory, JournalError> {
        Ok(RunHistory::from_entries(&self.load(run_id)?))
    }

    fn exists(&self, run_id: &str) -> Result<bool, JournalError> {
        Ok(!self.load(run_id)?.is_empty())
    }
}

fn check_run_id(run_id: &str) -> Result<(), JournalError> {
    if forgeflow_utils::ids::is_valid_run_id(run_id) {
        Ok(())
    } else {
        Err(JournalError::InvalidRunId {
            run_id: run_id.to_string(),
        })
    }
}
