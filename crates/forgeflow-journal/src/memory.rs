use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::{HistoryEvent, JournalEntry, JournalError, JournalStore, check_run_id};

/// Journal kept in process memory. Lost on exit.
#[derive(Debug, Default)]
pub struct InMemoryJournal {
    runs: RwLock<HashMap<String, Vec<JournalEntry>>>,
}

impl InMemoryJournal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl JournalStore for InMemoryJournal {
    fn append(&self, run_id: &str, event: HistoryEvent) -> Result<u64, JournalError> {
        check_run_id(run_id)?;
        let mut runs = self.runs.write().unwrap_or_else(|e| e.into_inner());
        let entries = runs.entry(run_id.to_string()).or_default();
        let seq = entries.len() as u64;
        entries.push(JournalEntry {
            seq,
            recorded_at: Utc::now(),
            event,
        });
        Ok(seq)
    }

    fn load(&self, run_id: &str) -> Result<Vec<JournalEntry>, JournalError> {
        check_run_id(run_id)?;
        let runs = self.runs.read().unwrap_or_else(|e| e.into_inner());
        Ok(runs.get(run_id).cloned().unwrap_or_default())
    }

    fn list_runs(&self) -> Result<Vec<String>, JournalError> {
        let runs = self.runs.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = runs.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
