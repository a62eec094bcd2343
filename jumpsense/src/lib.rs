//! # JumpSense
//!
//! Jump detection and classification for figure skating from body-worn IMU
//! recordings:
//! - `buffer`: per-sensor sample ingestion into recording sessions
//! - `segmenter`: takeoff / landing detection per sensor stream
//! - `features`: fixed-schema feature vectors per segment
//! - `classifier`: jump type and landing outcome prediction
//! - `training`: seeded, cancellable training of model artifacts
//! - `pipeline`: end-to-end processing and review decisions
//!
//! Recording input, annotation exchange and record export live beside them.

pub mod annotation;
pub mod buffer;
pub mod classifier;
pub mod config;
pub mod export;
pub mod features;
pub mod labels;
pub mod pipeline;
pub mod recording;
pub mod segmenter;
pub mod training;
pub mod types;

pub use buffer::{IngestError, SampleBuffer, SensorStream, Session};
pub use classifier::{
    ArtifactClassifier, ArtifactStore, Classifier, ClassifierError, JumpTypeClassifier, ModelArtifact, Prediction,
    SuccessClassifier,
};
pub use config::AppConfig;
pub use features::{FeatureExtractor, FeatureSchema, FeatureVector};
pub use labels::{JumpLabels, JumpType, LabelSpace, LandingOutcome, ModelType};
pub use pipeline::{JumpPipeline, JumpRecord, ReviewOutcome, ReviewPolicy};
pub use segmenter::{JumpSegment, JumpSegmenter, SegmentFlags, SegmenterConfig};
pub use training::{train, CancelReason, TrainingConfig, TrainingError};
pub use types::{Quaternion, Sample, SensorId, SessionId};
