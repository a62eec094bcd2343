//! Configuration file resolution and TOML loading
//!
//! Configuration files are located in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Platform config directory (`<config_dir>/<app>/config.toml`)
//! 4. Compiled defaults (no file)
//!
//! A missing file at the platform location is not an error: the caller gets
//! `None` and falls back to defaults. A path given explicitly on the command
//! line or through the environment must exist.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "JUMPSENSE_CONFIG";

/// Where a resolved configuration file came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    CommandLine,
    Environment,
    PlatformDefault,
}

/// Resolved configuration file location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub path: PathBuf,
    pub source: ConfigSource,
}

/// Resolves the configuration file for one application
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    app_name: String,
    env_var: String,
}

impl ConfigResolver {
    /// Create a resolver reading [`CONFIG_ENV_VAR`]
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            env_var: CONFIG_ENV_VAR.to_string(),
        }
    }

    /// Override the environment variable consulted at priority 2
    pub fn with_env_var(mut self, env_var: impl Into<String>) -> Self {
        self.env_var = env_var.into();
        self
    }

    /// Platform location of the configuration file, whether or not it exists
    pub fn platform_config_path(&self) -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(&self.app_name).join("config.toml"))
    }

    /// Resolve the configuration file to load
    ///
    /// Returns `Ok(None)` when no explicit file was requested and nothing
    /// exists at the platform location.
    pub fn resolve(&self, cli_arg: Option<&Path>) -> Result<Option<ResolvedConfig>> {
        // Priority 1: Command-line argument
        if let Some(path) = cli_arg {
            return explicit(path.to_path_buf(), ConfigSource::CommandLine);
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(&self.env_var) {
            if !path.trim().is_empty() {
                return explicit(PathBuf::from(path), ConfigSource::Environment);
            }
        }

        // Priority 3: Platform config directory
        if let Some(path) = self.platform_config_path() {
            if path.exists() {
                return Ok(Some(ResolvedConfig {
                    path,
                    source: ConfigSource::PlatformDefault,
                }));
            }
            debug!(path = %path.display(), "No configuration file at platform location");
        }

        // Priority 4: compiled defaults
        Ok(None)
    }

    /// Default data directory for this application (artifacts, exports)
    pub fn data_dir(&self) -> PathBuf {
        dirs::data_local_dir()
            .map(|d| d.join(&self.app_name))
            .unwrap_or_else(|| PathBuf::from(format!("./{}_data", self.app_name)))
    }
}

fn explicit(path: PathBuf, source: ConfigSource) -> Result<Option<ResolvedConfig>> {
    if path.exists() {
        Ok(Some(ResolvedConfig { path, source }))
    } else {
        Err(Error::Config(format!(
            "Config file not found: {} (from {:?})",
            path.display(),
            source
        )))
    }
}

/// Parse a TOML file into `T`
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;
    let value = toml::from_str(&content)?;
    Ok(value)
}

/// Load the resolved configuration, or defaults when there is none
///
/// Parse errors are reported; a missing optional file only warns.
pub fn load_or_default<T: DeserializeOwned + Default>(resolved: Option<&ResolvedConfig>) -> Result<T> {
    match resolved {
        Some(resolved) => {
            info!(
                path = %resolved.path.display(),
                source = ?resolved.source,
                "Loading configuration"
            );
            load_toml(&resolved.path)
        }
        None => {
            warn!("No configuration file found, using compiled defaults");
            Ok(T::default())
        }
    }
}

/// Write a configuration to TOML atomically (temp file + rename)
pub fn write_toml_config<T: Serialize>(config: &T, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
