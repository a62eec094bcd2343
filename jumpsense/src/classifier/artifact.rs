//! Versioned model artifacts and their on-disk store
//!
//! An artifact is immutable once written. The store assigns versions per
//! model type and publishes each file from a fully written temp file with
//! no-clobber semantics, so an existing version can never be overwritten and
//! readers never see a partial file under an artifact name.

use super::softmax::SoftmaxModel;
use crate::features::FeatureSchema;
use crate::labels::ModelType;
use crate::training::{TrainingConfig, TrainingMetrics};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Attempts at claiming a version number before giving up
const SAVE_ATTEMPTS: u32 = 8;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid artifact JSON in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Artifact already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("No {model_type} artifact{}", .version.map(|v| format!(" version {v}")).unwrap_or_default())]
    NotFound {
        model_type: ModelType,
        version: Option<u32>,
    },

    #[error("Artifact {} holds a {found} model, expected {expected}", .path.display())]
    ModelTypeMismatch {
        path: PathBuf,
        expected: ModelType,
        found: ModelType,
    },
}

/// Trained classifier parameters plus everything needed to reproduce them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub artifact_id: Uuid,
    pub model_type: ModelType,
    /// Assigned by [`ArtifactStore::save`]; 0 until stored
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub seed: u64,
    pub feature_schema: FeatureSchema,
    /// Class names in class-index order
    pub labels: Vec<String>,
    pub label_set_version: u32,
    pub parameters: SoftmaxModel,
    /// Logit divisor fitted on the validation partition
    pub temperature: f64,
    pub metrics: TrainingMetrics,
    pub training_config: TrainingConfig,
}

impl ModelArtifact {
    pub fn file_name(model_type: ModelType, version: u32) -> String {
        format!("{}-v{:04}.json", model_type.as_str(), version)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Directory of artifact files named `{model_type}-v{version:04}.json`
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open (creating if needed) an artifact directory
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ArtifactError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| ArtifactError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, model_type: ModelType, version: u32) -> PathBuf {
        self.root.join(ModelArtifact::file_name(model_type, version))
    }

    /// Stored versions of a model type, ascending
    pub fn versions(&self, model_type: ModelType) -> Result<Vec<u32>, ArtifactError> {
        let entries = fs::read_dir(&self.root).map_err(|source| ArtifactError::Io {
            path: self.root.clone(),
            source,
        })?;
        let prefix = format!("{}-v", model_type.as_str());

        let mut versions: Vec<u32> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                name.strip_prefix(&prefix)?.strip_suffix(".json")?.parse().ok()
            })
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }

    /// Store an artifact under the next free version and return it as stored
    pub fn save(&self, mut artifact: ModelArtifact) -> Result<ModelArtifact, ArtifactError> {
        let mut version = self.versions(artifact.model_type)?.last().copied().unwrap_or(0) + 1;

        for _ in 0..SAVE_ATTEMPTS {
            artifact.version = version;
            let path = self.path_for(artifact.model_type, version);
            match self.write_new(&artifact, &path) {
                Ok(()) => {
                    tracing::info!(
                        model_type = %artifact.model_type,
                        version,
                        artifact_id = %artifact.artifact_id,
                        path = %path.display(),
                        "Model artifact stored"
                    );
                    return Ok(artifact);
                }
                Err(ArtifactError::AlreadyExists(_)) => {
                    tracing::debug!(version, "Artifact version taken, trying next");
                    version += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Err(ArtifactError::AlreadyExists(self.path_for(artifact.model_type, version)))
    }

    fn write_new(&self, artifact: &ModelArtifact, path: &Path) -> Result<(), ArtifactError> {
        let json = artifact.to_json().map_err(|source| ArtifactError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        let io_err = |source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        };

        // Temp names never match `{model_type}-v` so `versions` skips them
        let mut tmp = tempfile::Builder::new()
            .prefix(".artifact-")
            .suffix(".tmp")
            .tempfile_in(&self.root)
            .map_err(io_err)?;
        tmp.write_all(json.as_bytes()).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;

        match tmp.persist_noclobber(path) {
            Ok(_) => Ok(()),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                Err(ArtifactError::AlreadyExists(path.to_path_buf()))
            }
            Err(e) => Err(io_err(e.error)),
        }
    }

    pub fn load(&self, model_type: ModelType, version: u32) -> Result<ModelArtifact, ArtifactError> {
        let path = self.path_for(model_type, version);
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ArtifactError::NotFound {
                    model_type,
                    version: Some(version),
                })
            }
            Err(source) => return Err(ArtifactError::Io { path, source }),
        };
        let artifact = ModelArtifact::from_json(&json).map_err(|source| ArtifactError::Json {
            path: path.clone(),
            source,
        })?;
        if artifact.model_type != model_type {
            return Err(ArtifactError::ModelTypeMismatch {
                path,
                expected: model_type,
                found: artifact.model_type,
            });
        }
        Ok(artifact)
    }

    /// Highest readable version of a model type
    ///
    /// Versions that fail to parse are logged and skipped, so a damaged file
    /// does not hide the last good artifact.
    pub fn load_latest(&self, model_type: ModelType) -> Result<ModelArtifact, ArtifactError> {
        let mut first_error = None;
        for version in self.versions(model_type)?.into_iter().rev() {
            match self.load(model_type, version) {
                Ok(artifact) => return Ok(artifact),
                Err(e @ ArtifactError::Json { .. }) => {
                    tracing::warn!(%model_type, version, error = %e, "Skipping unreadable artifact");
                    first_error.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(first_error.unwrap_or(ArtifactError::NotFound {
            model_type,
            version: None,
        }))
    }
}
