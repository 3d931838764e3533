//! Configuration for the Courier runtime.
//!
//! - [`schema`] — the typed configuration tree with serde defaults
//! - [`loader`] — figment-based layered loading (files, env, overrides)

pub mod error;
pub mod loader;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use schema::{
    CourierConfig, IngestSettings, LogFormat, LogLevel, LogOutput, LoggingConfig,
};
