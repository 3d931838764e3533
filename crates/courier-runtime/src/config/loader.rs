//! Configuration loader using figment.
//!
//! Sources are layered, lowest priority first:
//!
//! 1. Built-in defaults
//! 2. Profile-specific config file (`courier.{profile}.toml`)
//! 3. Main config file (`courier.toml`)
//! 4. Environment variables (`COURIER_*`, `__` as nesting separator)
//! 5. Programmatic overrides via [`ConfigLoader::merge`]
//!
//! Environment variable mapping: `COURIER_INGEST__WORKERS=8` sets
//! `ingest.workers = 8`, `COURIER_LOGGING__LEVEL=debug` sets
//! `logging.level = "debug"`.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Serialized};
#[cfg(feature = "toml-config")]
use figment::providers::{Format, Toml};
use tracing::debug;

use crate::config::error::ConfigResult;
use crate::config::schema::CourierConfig;

/// The config file stem searched for in each search path.
const FILE_STEM: &str = "courier";

/// Layered configuration loader.
///
/// ```rust,ignore
/// let config = ConfigLoader::new()
///     .with_current_dir()
///     .profile("production")
///     .load()?;
/// ```
pub struct ConfigLoader {
    overrides: Vec<CourierConfig>,
    profile: Option<String>,
    search_paths: Vec<PathBuf>,
    config_file: Option<PathBuf>,
    load_env: bool,
}

impl ConfigLoader {
    /// Creates a loader with no search paths and env loading enabled.
    pub fn new() -> Self {
        Self {
            overrides: Vec::new(),
            profile: std::env::var("COURIER_PROFILE").ok(),
            search_paths: Vec::new(),
            config_file: None,
            load_env: true,
        }
    }

    /// Adds the current directory and the user config directory
    /// (`<config_dir>/courier`) to the search paths.
    pub fn with_current_dir(mut self) -> Self {
        self.search_paths.push(PathBuf::from("."));
        if let Some(config_dir) = dirs::config_dir() {
            self.search_paths.push(config_dir.join("courier"));
        }
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Sets a specific configuration file, bypassing the search.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets the configuration profile (e.g. "production").
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    /// Enables loading environment variables (the default).
    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges a programmatic override on top of everything else.
    pub fn merge(mut self, config: CourierConfig) -> Self {
        self.overrides.push(config);
        self
    }

    /// Loads, extracts and validates the configuration.
    pub fn load(self) -> ConfigResult<CourierConfig> {
        let mut figment = Figment::from(Serialized::defaults(CourierConfig::default()));

        #[cfg(feature = "toml-config")]
        {
            for path in self.candidate_files() {
                if path.is_file() {
                    debug!(path = %path.display(), "loading config file");
                    figment = figment.merge(Toml::file(&path));
                }
            }
        }

        if self.load_env {
            figment = figment.merge(Env::prefixed("COURIER_").split("__"));
        }

        for config in &self.overrides {
            figment = figment.merge(Serialized::defaults(config.clone()));
        }

        let config: CourierConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Candidate config files, lowest priority first.
    #[cfg(feature = "toml-config")]
    fn candidate_files(&self) -> Vec<PathBuf> {
        if let Some(file) = &self.config_file {
            return vec![file.clone()];
        }
        let mut files = Vec::new();
        for dir in &self.search_paths {
            if let Some(profile) = &self.profile {
                files.push(dir.join(format!("{FILE_STEM}.{profile}.toml")));
            }
            files.push(dir.join(format!("{FILE_STEM}.toml")));
        }
        files
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
