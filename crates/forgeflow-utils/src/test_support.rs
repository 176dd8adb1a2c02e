//! Deterministic fixtures for tests.
//!
//! Secret-shaped strings are generated rather than written literally so that
//! secret scanners do not flag the repository.

use chrono::{DateTime, TimeZone, Utc};

use crate::clock::ManualClock;
use crate::types::{RepoRef, RunInput, TechnicalPlan};

const ALNUM: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const ALNUM_UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

fn make_from(alphabet: &[u8], len: usize, seed: usize) -> String {
    let mut output = String::with_capacity(len);
    let mut idx = seed % alphabet.len();

    for _ in 0..len {
        output.push(alphabet[idx] as char);
        idx = (idx + 7) % alphabet.len();
    }

    output
}

pub fn github_pat() -> String {
    format!("ghp_{}", make_from(ALNUM, 36, 1))
}

pub fn gitlab_token() -> String {
    format!("glpat-{}", make_from(ALNUM, 24, 4))
}

pub fn aws_access_key_id() -> String {
    format!("AKIA{}", make_from(ALNUM_UPPER, 16, 11))
}

/// A secret with no recognizable shape; only literal masking catches it.
pub fn opaque_secret() -> String {
    format!("opq{}", make_from(ALNUM, 29, 17))
}

/// Fixed instant tests start from.
#[must_use]
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0)
        .single()
        .expect("valid fixed timestamp")
}

#[must_use]
pub fn manual_clock() -> ManualClock {
    ManualClock::new(epoch())
}

#[must_use]
pub fn sample_input(run_id: &str) -> RunInput {
    RunInput {
        run_id: run_id.to_string(),
        task_id: "TASK-42".to_string(),
        project_id: "proj-1".to_string(),
        repo: RepoRef {
            owner: "acme".to_string(),
            name: "widgets".to_string(),
            base_branch: "main".to_string(),
            clone_url: "https://example.invalid/acme/widgets.git".to_string(),
        },
        plan: TechnicalPlan {
            title: "Add rate limiting".to_string(),
            summary: "Limit requests per API key".to_string(),
            body: "Use a token bucket per key.".to_string(),
            clarifications: Vec::new(),
        },
    }
}
