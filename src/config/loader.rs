//! Configuration Loader
//!
//! Layers the built-in defaults, an optional TOML file and environment
//! overrides using the `config` crate, then validates the merged result.
//!
//! Lookup order for the file: an explicit path, then `COURSEGEN_CONFIG_PATH`,
//! then `config/coursegen.toml` (skipped when absent). Environment overrides use
//! double underscores as separators: `COURSEGEN__QUEUE__LEASE_SECONDS=120`.

use super::OrchestratorConfig;
use crate::error::TaskerResult;
use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const ENV_PREFIX: &str = "COURSEGEN";
const DEFAULT_CONFIG_PATH: &str = "config/coursegen.toml";

/// Loaded, validated configuration plus where it came from
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: OrchestratorConfig,
    environment: String,
    source_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> TaskerResult<Arc<ConfigManager>> {
        Self::load_from_path(None)
    }

    /// Load configuration from a specific file (which must exist)
    pub fn load_from_path(path: Option<&Path>) -> TaskerResult<Arc<ConfigManager>> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| env::var("COURSEGEN_CONFIG_PATH").ok().map(PathBuf::from));
        Self::load_with_prefix(explicit.as_deref(), ENV_PREFIX)
    }

    pub(crate) fn load_with_prefix(
        path: Option<&Path>,
        env_prefix: &str,
    ) -> TaskerResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();

        let (file_source, source_path) = match path {
            Some(path) => (
                File::from(path).format(FileFormat::Toml).required(true),
                Some(path.to_path_buf()),
            ),
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
                let found = default_path.is_file().then(|| default_path.clone());
                (
                    File::from(default_path.as_path())
                        .format(FileFormat::Toml)
                        .required(false),
                    found,
                )
            }
        };

        debug!(
            environment = %environment,
            source = ?source_path,
            "Loading orchestrator configuration"
        );

        let config: OrchestratorConfig = Config::builder()
            .add_source(Config::try_from(&OrchestratorConfig::default())?)
            .add_source(file_source)
            .add_source(
                Environment::with_prefix(env_prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;

        info!(
            environment = %environment,
            source = ?source_path,
            workers = config.workers.count,
            lease_seconds = config.queue.lease_seconds,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment,
            source_path,
        }))
    }

    /// Wrap an already-built configuration (embedded use and tests)
    pub fn from_config(config: OrchestratorConfig) -> TaskerResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            source_path: None,
        }))
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    /// Effective configuration with the database URL masked
    pub fn debug_config(&self) -> serde_json::Value {
        let mut value = serde_json::json!(self.config);
        if let Some(url) = value.pointer_mut("/database/url") {
            if url.as_str().is_some_and(|s| !s.is_empty()) {
                *url = serde_json::Value::String("[MASKED]".to_string());
            }
        }
        value
    }

    pub fn detect_environment() -> String {
        env::var("COURSEGEN_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }
}
