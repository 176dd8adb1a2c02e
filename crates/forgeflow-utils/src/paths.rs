//! State directory layout.
//!
//! ```text
//! <FORGEFLOW_HOME>/
//!   runs/<run_id>/journal.jsonl    append-only history
//!   runs/<run_id>/progress.json    step records + current-state projection
//!   sandboxes/                     ephemeral validation workspaces
//! ```

use camino::{Utf8Path, Utf8PathBuf};
use std::cell::RefCell;

thread_local! {
    static THREAD_HOME: RefCell<Option<Utf8PathBuf>> = const { RefCell::new(None) };
}

/// Resolve forgeflow home:
/// 1) thread-local override (tests use this)
/// 2) env `FORGEFLOW_HOME`
/// 3) default ".forgeflow"
#[must_use]
pub fn forgeflow_home() -> Utf8PathBuf {
    if let Some(tl) = THREAD_HOME.with(|tl| tl.borrow().clone()) {
        return tl;
    }
    if let Ok(p) = std::env::var("FORGEFLOW_HOME") {
        return Utf8PathBuf::from(p);
    }
    Utf8PathBuf::from(".forgeflow")
}

#[must_use]
pub fn runs_dir(home: &Utf8Path) -> Utf8PathBuf {
    home.join("runs")
}

#[must_use]
pub fn run_dir(home: &Utf8Path, run_id: &str) -> Utf8PathBuf {
    runs_dir(home).join(run_id)
}

#[must_use]
pub fn sandboxes_dir(home: &Utf8Path) -> Utf8PathBuf {
    home.join("sandboxes")
}

/// mkdir -p; treat `AlreadyExists` as success
pub fn ensure_dir_all<P: AsRef<std::path::Path>>(p: P) -> std::io::Result<()> {
    match std::fs::create_dir_all(&p) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}

/// RAII guard for an isolated home that clears the thread-local override on drop
#[cfg(any(test, feature = "test-utils"))]
pub struct HomeGuard {
    inner: tempfile::TempDir,
}

#[cfg(any(test, feature = "test-utils"))]
impl HomeGuard {
    #[must_use]
    pub fn home(&self) -> Utf8PathBuf {
        forgeflow_home()
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Drop for HomeGuard {
    fn drop(&mut self) {
        THREAD_HOME.with(|tl| *tl.borrow_mut() = None);
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl std::ops::Deref for HomeGuard {
    type Target = tempfile::TempDir;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// Give this thread a unique home under the system temp dir.
#[cfg(any(test, feature = "test-utils"))]
#[must_use]
pub fn with_isolated_home() -> HomeGuard {
    let td = tempfile::TempDir::new().expect("create temp home");
    let p = Utf8PathBuf::from_path_buf(td.path().to_path_buf()).expect("utf-8 temp path");
    THREAD_HOME.with(|tl| *tl.borrow_mut() = Some(p));
    HomeGuard { inner: td }
}
