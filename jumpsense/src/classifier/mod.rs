//! Jump-type and landing-success classifiers
//!
//! Both classifiers are thin, immutable wrappers around a shared
//! [`ModelArtifact`] handle. They differ only in label space, so a single
//! generic [`ArtifactClassifier`] implements both.

pub mod artifact;
pub mod softmax;

pub use artifact::{ArtifactError, ArtifactStore, ModelArtifact};
pub use softmax::{SoftmaxModel, Standardizer};

use crate::features::{FeatureSchema, FeatureVector};
use crate::labels::{JumpType, LabelSpace, LandingOutcome, ModelType};
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClassifierError {
    /// Vector computed under a different feature layout than the model
    #[error(
        "Feature schema mismatch: model expects v{} ({} features), vector has v{} ({} features)",
        .expected.version, .expected.len(), .found.version, .found.len()
    )]
    SchemaMismatch {
        expected: FeatureSchema,
        found: FeatureSchema,
    },

    #[error("Artifact is a {found} model, expected {expected}")]
    WrongModelType { expected: ModelType, found: ModelType },

    #[error("Artifact labels {found:?} (set v{found_version}) do not match {expected:?} (set v{expected_version})")]
    LabelSetMismatch {
        expected: Vec<String>,
        expected_version: u32,
        found: Vec<String>,
        found_version: u32,
    },

    #[error("Dimension mismatch: expected {expected}, got {found}")]
    Dimension { expected: usize, found: usize },

    #[error("Feature {index} is not a finite number")]
    NonFiniteFeature { index: usize },
}

/// Classifier output
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction<L> {
    pub label: L,
    /// Calibrated probability of `label`, in [0, 1]
    pub confidence: f64,
    /// Calibrated probabilities of every label in class-index order
    pub probabilities: Vec<f64>,
}

/// Common prediction interface of both classifiers
pub trait Classifier {
    type Label;

    fn predict(&self, features: &FeatureVector) -> Result<Prediction<Self::Label>, ClassifierError>;
}

/// Classifier backed by a trained artifact for label space `L`
#[derive(Debug, Clone)]
pub struct ArtifactClassifier<L> {
    artifact: Arc<ModelArtifact>,
    _labels: PhantomData<L>,
}

/// Multi-class jump element classifier
pub type JumpTypeClassifier = ArtifactClassifier<JumpType>;

/// Binary landed/fall classifier
pub type SuccessClassifier = ArtifactClassifier<LandingOutcome>;

impl<L: LabelSpace> ArtifactClassifier<L> {
    /// Wrap an artifact, checking that it was trained for this label space
    pub fn new(artifact: Arc<ModelArtifact>) -> Result<Self, ClassifierError> {
        if artifact.model_type != L::MODEL_TYPE {
            return Err(ClassifierError::WrongModelType {
                expected: L::MODEL_TYPE,
                found: artifact.model_type,
            });
        }
        let expected = L::names();
        if artifact.labels != expected || artifact.label_set_version != L::LABEL_SET_VERSION {
            return Err(ClassifierError::LabelSetMismatch {
                expected,
                expected_version: L::LABEL_SET_VERSION,
                found: artifact.labels.clone(),
                found_version: artifact.label_set_version,
            });
        }

        let model = &artifact.parameters;
        if !model.is_consistent() || model.dim() != artifact.feature_schema.len() {
            return Err(ClassifierError::Dimension {
                expected: artifact.feature_schema.len(),
                found: model.dim(),
            });
        }
        if model.classes() != L::ALL.len() {
            return Err(ClassifierError::Dimension {
                expected: L::ALL.len(),
                found: model.classes(),
            });
        }

        Ok(Self {
            artifact,
            _labels: PhantomData,
        })
    }

    pub fn artifact(&self) -> &Arc<ModelArtifact> {
        &self.artifact
    }
}

impl<L: LabelSpace> Classifier for ArtifactClassifier<L> {
    type Label = L;

    fn predict(&self, features: &FeatureVector) -> Result<Prediction<L>, ClassifierError> {
        if features.schema != self.artifact.feature_schema {
            return Err(ClassifierError::SchemaMismatch {
                expected: self.artifact.feature_schema.clone(),
                found: features.schema.clone(),
            });
        }
        if features.len() != self.artifact.feature_schema.len() {
            return Err(ClassifierError::Dimension {
                expected: self.artifact.feature_schema.len(),
                found: features.len(),
            });
        }
        if let Some(index) = features.values.iter().position(|v| !v.is_finite()) {
            return Err(ClassifierError::NonFiniteFeature { index });
        }

        let probabilities = self
            .artifact
            .parameters
            .probabilities(&features.values, self.artifact.temperature);
        let (index, confidence) = softmax::argmax(&probabilities);
        let label = L::from_class_index(index).ok_or(ClassifierError::Dimension {
            expected: L::ALL.len(),
            found: probabilities.len(),
        })?;

        Ok(Prediction {
            label,
            confidence: confidence.clamp(0.0, 1.0),
            probabilities,
        })
    }
}
