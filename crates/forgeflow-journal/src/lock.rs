use camino::Utf8PathBuf;
use std::fs::{File, OpenOptions};

use forgeflow_utils::paths;

use crate::JournalError;

/// Exclusive per-run driver lock.
///
/// Only one process may drive a run at a time. The lock is advisory
/// (`fd-lock`) and released when the guard or the process goes away, so a
/// crashed driver never leaves a stale lock behind.
#[derive(Debug)]
pub struct RunLock {
    run_id: String,
    path: Utf8PathBuf,
    lock: fd_lock::RwLock<File>,
}

impl RunLock {
    pub fn open(root: &camino::Utf8Path, run_id: &str) -> Result<Self, JournalError> {
        crate::check_run_id(run_id)?;
        let dir = paths::run_dir(root, run_id);
        paths::ensure_dir_all(&dir).map_err(|e| JournalError::io(&dir, e))?;
        let path = dir.join("run.lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| JournalError::io(&path, e))?;
        Ok(Self {
            run_id: run_id.to_string(),
            path,
            lock: fd_lock::RwLock::new(file),
        })
    }

    /// Take the lock without blocking.
    pub fn try_acquire(&mut self) -> Result<fd_lock::RwLockWriteGuard<'_, File>, JournalError> {
        match self.lock.try_write() {
            Ok(guard) => Ok(guard),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(JournalError::Locked {
                run_id: self.run_id.clone(),
            }),
            Err(e) => Err(JournalError::io(&self.path, e)),
        }
    }
}
