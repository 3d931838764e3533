//! Error types for the outbound API boundary.

use thiserror::Error;

/// Errors an outbound API call can return.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// No API client is attached to the router.
    #[error("no API client attached")]
    NotConnected,

    /// The call timed out.
    #[error("API call timed out")]
    Timeout,

    /// The platform rejected the call.
    #[error("platform error ({code}): {message}")]
    Platform {
        /// Platform error code.
        code: i64,
        /// Platform error description.
        message: String,
    },

    /// Failed to serialize or deserialize a payload.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The update carries no message to act on.
    #[error("update carries no message")]
    MissingMessage,

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for API calls.
pub type ApiResult<T> = Result<T, ApiError>;
