//! Runtime error types.

use thiserror::Error;

use crate::config::ConfigError;
use courier_ingest::IngestError;

/// Errors surfaced by the runtime layer.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Configuration loading or validation failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The ingestion pipeline refused to start.
    #[error(transparent)]
    Ingest(#[from] IngestError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
