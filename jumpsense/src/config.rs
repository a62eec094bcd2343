//! Application configuration
//!
//! One TOML file with a section per stage. Every field has a default, so an
//! empty or missing file yields a working configuration.

use crate::buffer::nominal_period;
use crate::features::FeatureConfig;
use crate::pipeline::ReviewPolicy;
use crate::segmenter::SegmenterConfig;
use crate::training::TrainingConfig;
use jumpsense_common::config::{load_or_default, write_toml_config, ConfigResolver, LoggingConfig, ResolvedConfig};
use jumpsense_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application name used for config and data directories
pub const APP_NAME: &str = "jumpsense";

/// Recording input settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Nominal sensor rate (Movella DOT streams at 60 Hz)
    pub sample_rate_hz: f64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self { sample_rate_hz: 60.0 }
    }
}

impl RecordingConfig {
    /// One nominal sample period
    pub fn sample_period(&self) -> Duration {
        nominal_period(self.sample_rate_hz)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Artifact directory; platform data directory when unset
    pub artifacts_dir: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub recording: RecordingConfig,
    pub segmenter: SegmenterConfig,
    pub features: FeatureConfig,
    pub training: TrainingConfig,
    pub review: ReviewPolicy,
}

impl AppConfig {
    /// Resolve and load the configuration file, falling back to defaults
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let resolved = ConfigResolver::new(APP_NAME).resolve(cli_path)?;
        Self::load_resolved(resolved.as_ref())
    }

    pub fn load_resolved(resolved: Option<&ResolvedConfig>) -> Result<Self> {
        let config: Self = load_or_default(resolved)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no stage can work with
    pub fn validate(&self) -> Result<()> {
        if !(self.recording.sample_rate_hz.is_finite() && self.recording.sample_rate_hz > 0.0) {
            return Err(Error::Config(format!(
                "recording.sample_rate_hz must be positive, got {}",
                self.recording.sample_rate_hz
            )));
        }
        self.segmenter
            .validate()
            .map_err(|e| Error::Config(format!("segmenter: {}", e)))?;
        self.training
            .validate()
            .map_err(|e| Error::Config(format!("training: {}", e)))?;
        for (name, value) in [
            ("review.min_type_confidence", self.review.min_type_confidence),
            ("review.min_success_confidence", self.review.min_success_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!("{} must be in [0, 1], got {}", name, value)));
            }
        }
        Ok(())
    }

    /// Write this configuration as TOML to `path`, or the platform location
    ///
    /// An existing file is only replaced when `overwrite` is set.
    pub fn write_to(&self, path: Option<&Path>, overwrite: bool) -> Result<PathBuf> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => ConfigResolver::new(APP_NAME)
                .platform_config_path()
                .ok_or_else(|| Error::Config("No platform configuration directory".to_string()))?,
        };
        if path.exists() && !overwrite {
            return Err(Error::Config(format!(
                "{} already exists (use --force to replace it)",
                path.display()
            )));
        }
        self.validate()?;
        write_toml_config(self, &path)?;
        Ok(path)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.artifacts_dir
            .clone()
            .unwrap_or_else(|| ConfigResolver::new(APP_NAME).data_dir().join("artifacts"))
    }
}
