//! Sandboxed validation executor.
//!
//! Each call to [`ValidationExecutor::execute`] provisions a fresh workspace,
//! applies the generated edits, runs the configured install/lint/typecheck/
//! test commands under one shared deadline, and classifies the first failure.
//! The workspace is removed on every exit path.

mod command_spec;
mod executor;
mod gate;
mod parse;
mod process;
mod workspace;

pub use command_spec::{CommandSpec, ENV_ALLOWLIST};
pub use executor::{SandboxExecutor, ValidationCommands, ValidationExecutor, secrets_from_env};
pub use gate::{ConcurrencyGate, GatePermit};
pub use parse::parse_test_counts;
pub use process::{BoundedRun, ProcessLimits, run_bounded};
pub use workspace::{
    GitCloneProvider, LocalCopyProvider, SandboxWorkspace, WorkspaceProvider, confined_path,
};

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("sandbox provisioning failed: {0}")]
    Provision(String),

    #[error("edit path '{path}' rejected: {reason}")]
    InvalidEditPath { path: String, reason: String },

    #[error("failed to start '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("sandbox I/O failed at {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("all {capacity} sandbox slots are busy")]
    CapacityExhausted { capacity: usize },

    #[error("sandbox gate is closed")]
    GateClosed,
}

impl SandboxError {
    pub(crate) fn io(path: &Utf8Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_owned(),
            source,
        }
    }

    /// Whether retrying the whole execution later can help.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::CapacityExhausted { .. })
    }
}
