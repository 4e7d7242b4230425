//! Log sanitization utilities
//!
//! Keeps bearer tokens, passwords and base64 image payloads out of
//! debug/error logs.

/// Maximum number of characters to include in truncated log output.
const TRUNCATE_LIMIT: usize = 512;

/// Number of leading characters of a secret that stay visible.
const MASK_VISIBLE: usize = 4;

/// MSRV-compatible replacement for `str::floor_char_boundary` (stable since 1.91.0).
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        s.len()
    } else {
        let mut i = index;
        while i > 0 && !s.is_char_boundary(i) {
            i -= 1;
        }
        i
    }
}

/// Truncate a response body for safe logging.
///
/// Bodies within the limit are returned unchanged; longer ones keep the first
/// `TRUNCATE_LIMIT` bytes and report the total length.
pub fn truncate_for_log(s: &str) -> String {
    if s.len() <= TRUNCATE_LIMIT {
        s.to_string()
    } else {
        format!(
            "{}... [truncated, total {} bytes]",
            &s[..floor_char_boundary(s, TRUNCATE_LIMIT)],
            s.len()
        )
    }
}

/// Mask a token or password, keeping only a short prefix.
///
/// `"eyJhbGciOi..."` -> `"eyJh***"`, secrets of `MASK_VISIBLE` bytes or fewer
/// are masked entirely.
pub fn mask_secret(secret: &str) -> String {
    if secret.len() <= MASK_VISIBLE {
        "***".to_string()
    } else {
        format!("{}***", &secret[..floor_char_boundary(secret, MASK_VISIBLE)])
    }
}
