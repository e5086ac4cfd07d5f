//! Configuration Loader
//!
//! Environment-aware layered loading:
//!
//! 1. built-in defaults (`DispatchConfig::default()`)
//! 2. `{config_dir}/default.toml` (optional)
//! 3. `{config_dir}/{environment}.toml` (optional)
//! 4. `DISPATCH__SECTION__FIELD` environment variables
//!
//! The environment name comes from `DISPATCH_ENV` and defaults to
//! `development`.

use super::error::{ConfigResult, ConfigurationError};
use super::DispatchConfig;
use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const ENV_PREFIX: &str = "DISPATCH";
const ENV_SEPARATOR: &str = "__";

/// Loaded, validated configuration plus the environment it was resolved for
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: DispatchConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment.
    /// Useful for tests that must not touch process-wide environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            environment = %environment,
            config_directory = %config_directory.display(),
            "Loading dispatch configuration"
        );

        let config = Self::build(&config_directory, environment)?;
        config.validate()?;

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration (tests, embedding)
    pub fn from_config(config: DispatchConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            config_directory: PathBuf::from("config"),
        }))
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    fn build(config_directory: &Path, environment: &str) -> ConfigResult<DispatchConfig> {
        let defaults = Config::try_from(&DispatchConfig::default())?;

        let settings = Config::builder()
            .add_source(defaults)
            .add_source(File::from(config_directory.join("default.toml")).required(false))
            .add_source(
                File::from(config_directory.join(format!("{environment}.toml"))).required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?;

        settings
            .try_deserialize::<DispatchConfig>()
            .map_err(ConfigurationError::load_error)
    }

    fn detect_environment() -> String {
        env::var("DISPATCH_ENV").unwrap_or_else(|_| "development".to_string())
    }
}
