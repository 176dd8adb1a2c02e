//! Progress/audit log.
//!
//! Records one [`StepRecord`] per `(run_id, step_name)` plus a denormalized
//! [`RunRecord`] used for live status queries. Recording never fails from the
//! caller's point of view: store errors are logged at `warn` and dropped.

mod log;
mod store;

pub use log::{ProgressLog, StepEnd};
pub use store::{FileProgressStore, InMemoryProgressStore, ProgressError, ProgressSnapshot, ProgressStore};

pub use forgeflow_utils::types::{RunRecord, StepRecord};
