//! Usage: Security-sensitive helpers (credential masking and constant-time equality).

use subtle::ConstantTimeEq;

const MASK_PREFIX_LEN: usize = 4;
const MASK_SUFFIX_LEN: usize = 4;

/// Redact a bearer credential for logs: keep a short prefix/suffix, hide the rest.
/// Values too short to mask meaningfully are replaced entirely. Counts
/// characters, not bytes; the input can be arbitrary provider-supplied text.
pub fn mask_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let char_count = trimmed.chars().count();
    if char_count <= MASK_PREFIX_LEN + MASK_SUFFIX_LEN {
        return "*".repeat(char_count);
    }

    let prefix: String = trimmed.chars().take(MASK_PREFIX_LEN).collect();
    let suffix: String = trimmed.chars().skip(char_count - MASK_SUFFIX_LEN).collect();
    format!("{prefix}...{suffix}")
}

/// Timing-safe byte comparison for OAuth `state` validation.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}
