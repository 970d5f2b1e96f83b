//! Error code convention shared by every service error.
//!
//! Routes surface `error_code()` and `retryable()` in JSON error bodies so
//! clients can branch on a stable, grepable code instead of message text.

/// Grepable error code and retryable flag for structured error responses.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}
