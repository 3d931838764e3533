//! Pipeline error types.

use thiserror::Error;

/// Errors the ingestion pipeline can return.
#[derive(Debug, Error)]
pub enum IngestError {
    /// `run` was called on a pipeline that already ran.
    #[error("pipeline already started")]
    AlreadyStarted,
}

/// Result type for pipeline operations.
pub type IngestResult<T> = Result<T, IngestError>;
