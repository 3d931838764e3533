//! Runtime orchestration for the Courier update router.
//!
//! This crate wires the routing engine and the ingestion pipeline into a
//! runnable whole: layered configuration loading, logging initialisation,
//! and signal-driven lifecycle management.
//!
//! ```rust,ignore
//! use courier_runtime::CourierRuntime;
//!
//! let runtime = CourierRuntime::new();
//! runtime.router().on_command("start", start_handler);
//! runtime.run(source).await?;
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{ConfigLoader, CourierConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use runtime::{CourierRuntime, RuntimeBuilder};
