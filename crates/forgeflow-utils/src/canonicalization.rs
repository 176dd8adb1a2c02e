//! Canonical JSON emission (JCS, RFC 8785) for CLI output.

use anyhow::{Context, Result};
use serde::Serialize;

/// Serialize `value` as JCS canonical JSON.
///
/// Keys are sorted and numbers normalized, so the same value always yields
/// byte-identical output regardless of field declaration order.
///
/// ```rust
/// use forgeflow_utils::canonicalization::emit_jcs;
///
/// let json = emit_jcs(&serde_json::json!({"b": 1, "a": 2})).unwrap();
/// assert_eq!(json, r#"{"a":2,"b":1}"#);
/// ```
pub fn emit_jcs<T: Serialize>(value: &T) -> Result<String> {
    let json_value =
        serde_json::to_value(value).with_context(|| "Failed to serialize value to JSON")?;
    let json_bytes = serde_json_canonicalizer::to_vec(&json_value)
        .with_context(|| "Failed to canonicalize JSON using JCS")?;
    String::from_utf8(json_bytes).with_context(|| "JCS output contained invalid UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RunStatus, StepStatus};

    #[derive(Serialize)]
    struct Row {
        zeta: StepStatus,
        alpha: RunStatus,
    }

    #[test]
    fn test_emit_jcs_sorts_keys() {
        let json = emit_jcs(&Row {
            zeta: StepStatus::Skipped,
            alpha: RunStatus::Running,
        })
        .unwrap();
        assert_eq!(json, r#"{"alpha":"running","zeta":"skipped"}"#);
    }
}
