//! # Courier
//!
//! A routing and dispatch layer for inbound chat-platform updates.
//!
//! ## Overview
//!
//! Courier classifies each update by payload kind, matches it against
//! registered handler chains (exact command, free-form predicate, or
//! pattern-matched callback path with parameters and query string),
//! composes global middleware around matched handlers, and executes the
//! resulting chain with abort/continue control. Updates are ingested
//! concurrently from a long-poll source with bounded backpressure and
//! graceful shutdown.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐    ┌──────────┐    ┌─────────────┐    ┌───────────────────┐
//! │ UpdateSource │───▶│ Pipeline │───▶│   Router    │───▶│ middleware + chain │──▶ BotApi
//! │ (long poll)  │    │ (workers)│    │ (dispatch)  │    │ (per category)     │
//! └──────────────┘    └──────────┘    └─────────────┘    └───────────────────┘
//! ```
//!
//! - **Router**: registration store, composed-table cache, dispatcher
//! - **Pipeline**: producer task, bounded queue, worker pool, bounded drain
//! - **Runtime**: configuration, logging, signal-driven lifecycle
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use courier::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = CourierRuntime::new();
//!
//!     runtime.router()
//!         .use_middleware(middleware::recover())
//!         .on_command("start", |ctx: std::sync::Arc<Context>| async move {
//!             ctx.reply("hello").await.ok();
//!         });
//!     runtime.router()
//!         .on_callback("user/:id/profile", show_profile)?;
//!
//!     runtime.run(source).await?;
//!     Ok(())
//! }
//! ```

pub use courier_core as core;
pub use courier_ingest as ingest;
pub use courier_router as router;
pub use courier_runtime as runtime;

pub use courier_router::middleware;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use courier::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use courier_runtime::{ConfigLoader, CourierConfig, CourierRuntime};

    // Routing - registration surface and matcher keys
    pub use courier_router::{FileFilter, GeoRange, Pattern, PollFilter, Router, middleware};

    // Ingestion - pipeline and source boundary
    pub use courier_ingest::{IngestConfig, Pipeline, PipelineState, UpdateSource};

    // Core - update model, context, handlers, API boundary
    pub use courier_core::{
        ApiError, ApiResult, BotApi, BoxedApi, BoxedHandler, Context, Handler, Message, Payload,
        Update, UpdateKind,
    };
}
