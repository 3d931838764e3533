//! Runtime orchestration: config, router, pipeline and signals.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use courier_runtime::CourierRuntime;
//!
//! // Simplest way - auto-loads courier.toml from the usual places
//! let runtime = CourierRuntime::new();
//!
//! // Custom configuration
//! let runtime = CourierRuntime::builder()
//!     .config_file("config/courier.toml")
//!     .profile("production")
//!     .build()?;
//!
//! runtime.router().on_command("start", start_handler);
//! runtime.run(source).await?;
//! ```

use std::future::Future;
use std::sync::Arc;

use tokio::signal;
use tracing::info;

use courier_core::api::BoxedApi;
use courier_ingest::{Pipeline, UpdateSource};
use courier_router::Router;

use crate::config::{ConfigLoader, CourierConfig};
use crate::error::RuntimeResult;
use crate::logging;

/// The runtime that owns the router and drives the ingestion pipeline.
pub struct CourierRuntime {
    config: CourierConfig,
    router: Arc<Router>,
}

impl CourierRuntime {
    /// Creates a runtime with automatic configuration loading.
    ///
    /// Searches the current directory and the user config directory for
    /// `courier.toml`; falls back to defaults when nothing is found.
    pub fn new() -> Self {
        let config = ConfigLoader::new()
            .with_current_dir()
            .load()
            .unwrap_or_else(|e| {
                eprintln!("Warning: failed to load config ({e}), using defaults");
                CourierConfig::default()
            });
        Self::from_config(&config)
    }

    /// Creates a runtime builder for custom configuration.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from a loaded configuration.
    ///
    /// Initializes logging from the config's `logging` section; the call
    /// is a no-op if a subscriber is already installed.
    pub fn from_config(config: &CourierConfig) -> Self {
        Self::from_parts(config, None)
    }

    fn from_parts(config: &CourierConfig, api: Option<BoxedApi>) -> Self {
        logging::init_from_config(&config.logging);

        info!(
            log_level = config.logging.level.as_str(),
            workers = config.ingest.workers,
            queue_capacity = config.ingest.queue_capacity,
            "runtime initialized from configuration"
        );

        let router = match api {
            Some(api) => Router::with_api(api),
            None => Router::new(),
        };
        Self {
            config: config.clone(),
            router: Arc::new(router),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CourierConfig {
        &self.config
    }

    /// Returns the router, for handler and middleware registration.
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Runs until the source is exhausted or a shutdown signal (Ctrl+C or
    /// SIGTERM) triggers the drain.
    pub async fn run<S: UpdateSource>(&self, source: S) -> RuntimeResult<()> {
        let pipeline = Pipeline::new(
            Arc::clone(&self.router),
            self.config.ingest.to_ingest_config(),
        );
        let token = pipeline.shutdown_token();
        let signal_task = tokio::spawn(async move {
            wait_for_shutdown().await;
            token.cancel();
        });

        let result = pipeline.run(source).await;
        signal_task.abort();
        result.map_err(Into::into)
    }

    /// Runs until the source is exhausted or the given future resolves.
    pub async fn run_until<S, F>(&self, source: S, shutdown: F) -> RuntimeResult<()>
    where
        S: UpdateSource,
        F: Future<Output = ()>,
    {
        let pipeline = Pipeline::new(
            Arc::clone(&self.router),
            self.config.ingest.to_ingest_config(),
        );
        let token = pipeline.shutdown_token();

        let run = pipeline.run(source);
        tokio::pin!(run);
        tokio::select! {
            result = &mut run => return result.map_err(Into::into),
            () = shutdown => {
                info!("shutdown future resolved, draining");
                token.cancel();
            }
        }
        run.await.map_err(Into::into)
    }
}

impl Default for CourierRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits for Ctrl+C or SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");

        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("received Ctrl+C, shutting down");
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.expect("failed to listen for Ctrl+C");
        info!("received Ctrl+C, shutting down");
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for a [`CourierRuntime`] with custom configuration.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    api: Option<BoxedApi>,
}

impl RuntimeBuilder {
    /// Creates a builder searching the usual config locations.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
            api: None,
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g. "production").
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges additional configuration programmatically.
    pub fn merge(mut self, config: CourierConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Attaches the outbound API client handlers reply through.
    pub fn api(mut self, api: BoxedApi) -> Self {
        self.api = Some(api);
        self
    }

    /// Builds the runtime.
    pub fn build(self) -> RuntimeResult<CourierRuntime> {
        let config = self.config_loader.load()?;
        Ok(CourierRuntime::from_parts(&config, self.api))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::handler::BoxedHandler;
    use courier_core::update::{Chat, Message, Payload, Update};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::sleep;

    #[tokio::test]
    async fn run_until_drains_and_returns() {
        let config = CourierConfig::default();
        let runtime = CourierRuntime::from_config(&config);

        let counter = Arc::new(AtomicUsize::new(0));
        {
            let counter = Arc::clone(&counter);
            runtime.router().on_text(BoxedHandler::new(move |_ctx| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }

        let (tx, rx) = mpsc::channel(8);
        for id in 0..3u64 {
            let message = Message::new(id as i64, Chat::private(1)).with_text("hello");
            tx.send(Update::new(id, Payload::Message(message)))
                .await
                .unwrap();
        }

        runtime
            .run_until(rx, async {
                sleep(Duration::from_millis(200)).await;
            })
            .await
            .unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
