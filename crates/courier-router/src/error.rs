//! Registration error types.
//!
//! Malformed patterns are programmer errors and fail fast at registration
//! time; dispatch itself is infallible.

use thiserror::Error;

/// Errors a registration call can return.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The command fallback pattern is not a valid regular expression.
    #[error("invalid command pattern '{pattern}': {source}")]
    InvalidCommandPattern {
        /// The rejected pattern.
        pattern: String,
        /// The regex compiler's diagnosis.
        #[source]
        source: regex::Error,
    },

    /// The text guard pattern is not a valid regular expression.
    #[error("invalid text pattern '{pattern}': {source}")]
    InvalidTextPattern {
        /// The rejected pattern.
        pattern: String,
        /// The regex compiler's diagnosis.
        #[source]
        source: regex::Error,
    },

    /// The callback route pattern is malformed.
    #[error("invalid route pattern '{pattern}': {reason}")]
    InvalidRoutePattern {
        /// The rejected pattern.
        pattern: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}

/// Result type for registration calls.
pub type RouterResult<T> = Result<T, RouterError>;
