//! Utility modules.

/// Serde helpers for `Timeout`-style duration settings.
pub mod duration;

/// Log sanitization utilities to prevent sensitive data exposure.
pub mod log_sanitizer;
