use camino::Utf8PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal I/O failed at {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize history event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("journal for run '{run_id}' is corrupt at line {line}: {reason}")]
    Corrupt {
        run_id: String,
        line: usize,
        reason: String,
    },

    #[error("run '{run_id}' is locked by another process")]
    Locked { run_id: String },

    #[error("invalid run id '{run_id}'")]
    InvalidRunId { run_id: String },
}

impl JournalError {
    pub(crate) fn io(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
