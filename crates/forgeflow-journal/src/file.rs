use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use tracing::{debug, warn};

use forgeflow_utils::paths;

use crate::{HistoryEvent, JournalEntry, JournalError, JournalStore, check_run_id};

const JOURNAL_FILE: &str = "journal.jsonl";

/// One JSON-lines file per run.
///
/// Appends take an exclusive `fd-lock` on the file so that an offline
/// `respond` or `cancel` from another process cannot interleave with the
/// running process. Each append is fsynced before returning.
#[derive(Debug, Clone)]
pub struct FileJournal {
    root: Utf8PathBuf,
}

impl FileJournal {
    /// `root` is the forgeflow state directory.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    #[must_use]
    pub fn journal_path(&self, run_id: &str) -> Utf8PathBuf {
        paths::run_dir(&self.root, run_id).join(JOURNAL_FILE)
    }
}

/// Split journal text into complete lines, reporting a torn tail.
fn complete_lines(content: &str) -> (Vec<&str>, Option<usize>) {
    let complete_len = content.rfind('\n').map_or(0, |i| i + 1);
    let lines = content[..complete_len]
        .lines()
        .filter(|l| !l.trim().is_empty())
        .collect();
    let torn = (complete_len < content.len()).then_some(complete_len);
    (lines, torn)
}

impl JournalStore for FileJournal {
    fn append(&self, run_id: &str, event: HistoryEvent) -> Result<u64, JournalError> {
        check_run_id(run_id)?;
        let path = self.journal_path(run_id);
        if let Some(dir) = path.parent() {
            paths::ensure_dir_all(dir).map_err(|e| JournalError::io(dir, e))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|e| JournalError::io(&path, e))?;
        let mut lock = fd_lock::RwLock::new(file);
        let mut guard = lock.write().map_err(|e| JournalError::io(&path, e))?;
        let file: &mut File = &mut guard;

        let mut content = String::new();
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.read_to_string(&mut content))
            .map_err(|e| JournalError::io(&path, e))?;

        let (lines, torn) = complete_lines(&content);
        if let Some(keep) = torn {
            warn!(run_id = %run_id, path = %path, "Discarding torn journal tail before append");
            file.set_len(keep as u64)
                .map_err(|e| JournalError::io(&path, e))?;
        }
        let seq = lines.len() as u64;

        let entry = JournalEntry {
            seq,
            recorded_at: Utc::now(),
            event,
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        file.write_all(line.as_bytes())
            .and_then(|()| file.sync_data())
            .map_err(|e| JournalError::io(&path, e))?;

        debug!(run_id = %run_id, seq, event = entry.event.label(), "Journal append");
        Ok(seq)
    }

    fn load(&self, run_id: &str) -> Result<Vec<JournalEntry>, JournalError> {
        check_run_id(run_id)?;
        let path = self.journal_path(run_id);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(JournalError::io(&path, e)),
        };

        let (lines, torn) = complete_lines(&content);
        if torn.is_some() {
            warn!(run_id = %run_id, path = %path, "Ignoring torn journal tail");
        }

        lines
            .into_iter()
            .enumerate()
            .map(|(idx, line)| {
                serde_json::from_str::<JournalEntry>(line).map_err(|e| JournalError::Corrupt {
                    run_id: run_id.to_string(),
                    line: idx + 1,
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    fn list_runs(&self) -> Result<Vec<String>, JournalError> {
        let dir = paths::runs_dir(&self.root);
        let read = match std::fs::read_dir(&dir) {
            Ok(r) => r,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(JournalError::io(&dir, e)),
        };

        let mut ids = Vec::new();
        for entry in read {
            let entry = entry.map_err(|e| JournalError::io(&dir, e))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if entry.path().join(JOURNAL_FILE).is_file() {
                ids.push(name);
            }
        }
        ids.sort();
        Ok(ids)
    }
}
