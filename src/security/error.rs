//! Error types for the security core.

use thiserror::Error;

/// Errors surfaced while wiring the security core together.
///
/// None of these are produced on the request path: they are raised while
/// building handlers or loading rules, so a bad setup fails at startup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecurityError {
    /// A handler was requested for a rule name that is not configured.
    #[error("unknown rate limit rule: {0}")]
    UnknownRule(String),

    /// A rule violates `max_requests > 0` or `window_ms > 0`.
    #[error("invalid rate limit rule '{name}': {reason}")]
    InvalidRule { name: String, reason: String },
}

/// A mitigation hook failed. Logged and swallowed by the detector.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("mitigation '{pattern}' failed: {reason}")]
pub struct MitigationError {
    pub pattern: String,
    pub reason: String,
}

impl MitigationError {
    pub fn new(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }
}
