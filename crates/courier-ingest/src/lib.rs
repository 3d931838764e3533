//! Concurrent update ingestion for the Courier router.
//!
//! A [`Pipeline`] connects an [`UpdateSource`] (the platform's long-poll
//! client, or anything else that yields updates) to a [`Router`]: one
//! producer task pulls updates and pushes them onto a bounded queue, a
//! fixed pool of workers pops from the queue and dispatches. Cancellation
//! triggers a bounded drain phase so shutdown never loses work that was
//! already accepted, and never blocks indefinitely on work that wasn't.
//!
//! [`Router`]: courier_router::Router

pub mod error;
pub mod pipeline;
pub mod source;

pub use error::{IngestError, IngestResult};
pub use pipeline::{IngestConfig, Pipeline, PipelineState};
pub use source::UpdateSource;
