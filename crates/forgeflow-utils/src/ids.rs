//! Deterministic identifiers derived with BLAKE3.
//!
//! Ids are a pure function of their inputs so that a replayed run derives
//! exactly the same question and sub-run ids as the original execution.

/// Hex prefix length used for derived ids.
pub const ID_HEX_LEN: usize = 16;

/// Hash `parts` (length-prefixed, so `["ab","c"]` and `["a","bc"]` differ)
/// and return the first [`ID_HEX_LEN`] hex characters.
#[must_use]
pub fn short_digest(parts: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    let hex = hasher.finalize().to_hex();
    hex[..ID_HEX_LEN].to_string()
}

/// `"{prefix}-{digest}"`.
#[must_use]
pub fn derive_id(prefix: &str, parts: &[&str]) -> String {
    format!("{prefix}-{}", short_digest(parts))
}

/// Run ids end up in file paths, so only a conservative alphabet is allowed.
#[must_use]
pub fn is_valid_run_id(run_id: &str) -> bool {
    !run_id.is_empty()
        && run_id.len() <= 128
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !run_id.starts_with('.')
}
