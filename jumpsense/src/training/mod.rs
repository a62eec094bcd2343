//! Offline classifier training
//!
//! Turns a corpus of labeled segments into an immutable [`ModelArtifact`]:
//!
//! 1. Collect segments carrying features and the label the model predicts
//! 2. Refuse to train when any class is under-represented
//! 3. Stratified train/validation split with a seeded RNG
//! 4. Full-batch gradient descent on softmax cross-entropy with L2
//! 5. Temperature calibration and metrics on the validation partition
//!
//! Training is blocking and CPU-bound. The cancellation token and optional
//! deadline are checked once per epoch.

mod calibration;
mod metrics;

pub use calibration::{fit_temperature, MAX_TEMPERATURE, MIN_TEMPERATURE};
pub use metrics::{ClassMetrics, TrainingMetrics};

use crate::classifier::softmax::{softmax, SoftmaxModel, Standardizer};
use crate::classifier::ModelArtifact;
use crate::features::FeatureSchema;
use crate::labels::ModelType;
use crate::segmenter::JumpSegment;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Epoch interval between progress log lines
const LOG_EVERY_EPOCHS: usize = 100;

/// Why a training run stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    /// Cancellation token triggered
    Requested,
    /// `max_duration_secs` elapsed
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Requested => f.write_str("cancellation requested"),
            CancelReason::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrainingError {
    #[error("Insufficient data: class '{label}' has {count} examples, {required} required")]
    InsufficientData {
        label: String,
        count: usize,
        required: usize,
    },

    #[error("Segment features use schema v{found}, expected v{expected}")]
    SchemaMismatch { expected: u32, found: u32 },

    #[error("Training cancelled ({reason}) after {epochs_completed} epochs")]
    Cancelled {
        reason: CancelReason,
        epochs_completed: usize,
    },

    #[error("Invalid training configuration: {0}")]
    InvalidConfig(String),

    #[error("No labeled segments with features for the {0} model")]
    NoExamples(ModelType),
}

/// Hyper-parameters of a training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub seed: u64,
    /// Share of each class held out for validation
    pub validation_fraction: f64,
    pub min_samples_per_class: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    /// L2 penalty on weights (not biases)
    pub l2: f64,
    /// Wall-clock limit; `None` runs to completion
    pub max_duration_secs: Option<f64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            validation_fraction: 0.2,
            min_samples_per_class: 5,
            epochs: 500,
            learning_rate: 0.5,
            l2: 1e-3,
            max_duration_secs: None,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<(), TrainingError> {
        let invalid = |msg: String| Err(TrainingError::InvalidConfig(msg));
        if !(self.validation_fraction > 0.0 && self.validation_fraction < 1.0) {
            return invalid(format!(
                "validation_fraction must be in (0, 1), got {}",
                self.validation_fraction
            ));
        }
        // One example per partition at minimum
        if self.min_samples_per_class < 2 {
            return invalid(format!(
                "min_samples_per_class must be at least 2, got {}",
                self.min_samples_per_class
            ));
        }
        if self.epochs == 0 {
            return invalid("epochs must be at least 1".to_string());
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return invalid(format!("learning_rate must be positive, got {}", self.learning_rate));
        }
        if !(self.l2 >= 0.0 && self.l2.is_finite()) {
            return invalid(format!("l2 must be non-negative, got {}", self.l2));
        }
        if let Some(secs) = self.max_duration_secs {
            if !(secs > 0.0 && secs.is_finite()) {
                return invalid(format!("max_duration_secs must be positive, got {secs}"));
            }
        }
        Ok(())
    }
}

/// Feature rows and class targets of one partition
#[derive(Debug, Default)]
struct Dataset {
    rows: Vec<Vec<f64>>,
    targets: Vec<usize>,
}

impl Dataset {
    fn push(&mut self, row: Vec<f64>, target: usize) {
        self.rows.push(row);
        self.targets.push(target);
    }

    fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Group usable examples by class; errors on schema skew
fn collect_examples(
    segments: &[JumpSegment],
    model_type: ModelType,
    schema: &FeatureSchema,
    classes: usize,
) -> Result<Vec<Vec<Vec<f64>>>, TrainingError> {
    let mut by_class = vec![Vec::new(); classes];
    let mut skipped = 0usize;

    for segment in segments {
        let (Some(features), Some(class)) = (&segment.features, model_type.class_of(&segment.labels)) else {
            skipped += 1;
            continue;
        };
        if features.schema != *schema {
            return Err(TrainingError::SchemaMismatch {
                expected: schema.version,
                found: features.schema.version,
            });
        }
        if features.values.iter().any(|v| !v.is_finite()) {
            skipped += 1;
            continue;
        }
        by_class[class].push(features.values.clone());
    }

    if skipped > 0 {
        tracing::info!(%model_type, skipped, "Segments without usable features or label skipped");
    }
    Ok(by_class)
}

/// Per-class seeded shuffle and hold-out
fn stratified_split(by_class: Vec<Vec<Vec<f64>>>, fraction: f64, seed: u64) -> (Dataset, Dataset) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Dataset::default();
    let mut validation = Dataset::default();

    for (class, mut rows) in by_class.into_iter().enumerate() {
        rows.shuffle(&mut rng);
        let count = rows.len();
        let held_out = ((count as f64 * fraction).round() as usize).clamp(1, count.saturating_sub(1));
        for (i, row) in rows.into_iter().enumerate() {
            if i < held_out {
                validation.push(row, class);
            } else {
                train.push(row, class);
            }
        }
    }
    (train, validation)
}

/// Train a classifier of `model_type` from labeled segments
///
/// Returns an unsaved artifact (version 0); persist it with
/// [`ArtifactStore::save`](crate::classifier::ArtifactStore::save).
pub fn train(
    segments: &[JumpSegment],
    model_type: ModelType,
    config: &TrainingConfig,
    cancel: &CancellationToken,
) -> Result<ModelArtifact, TrainingError> {
    config.validate()?;
    let started = Instant::now();
    let deadline = config.max_duration_secs.map(Duration::from_secs_f64);
    let check_cancel = |epochs_completed: usize| -> Result<(), TrainingError> {
        if cancel.is_cancelled() {
            return Err(TrainingError::Cancelled {
                reason: CancelReason::Requested,
                epochs_completed,
            });
        }
        if deadline.is_some_and(|d| started.elapsed() >= d) {
            return Err(TrainingError::Cancelled {
                reason: CancelReason::DeadlineExceeded,
                epochs_completed,
            });
        }
        Ok(())
    };

    check_cancel(0)?;

    let schema = FeatureSchema::current();
    let labels = model_type.label_names();
    let by_class = collect_examples(segments, model_type, &schema, labels.len())?;

    if by_class.iter().all(Vec::is_empty) {
        return Err(TrainingError::NoExamples(model_type));
    }
    for (label, rows) in labels.iter().zip(&by_class) {
        if rows.len() < config.min_samples_per_class {
            tracing::warn!(
                %model_type,
                label = %label,
                count = rows.len(),
                required = config.min_samples_per_class,
                "Not enough examples to train"
            );
            return Err(TrainingError::InsufficientData {
                label: label.clone(),
                count: rows.len(),
                required: config.min_samples_per_class,
            });
        }
    }

    let (train_set, validation_set) = stratified_split(by_class, config.validation_fraction, config.seed);
    tracing::info!(
        %model_type,
        train = train_set.len(),
        validation = validation_set.len(),
        seed = config.seed,
        epochs = config.epochs,
        "Training started"
    );

    let standardizer = Standardizer::fit(&train_set.rows);
    let train_z: Vec<Vec<f64>> = train_set.rows.iter().map(|r| standardizer.transform(r)).collect();
    let mut model = SoftmaxModel::zeros(standardizer, labels.len());

    for epoch in 0..config.epochs {
        check_cancel(epoch)?;
        let loss = gradient_step(&mut model, &train_z, &train_set.targets, config);
        if (epoch + 1) % LOG_EVERY_EPOCHS == 0 {
            tracing::debug!(%model_type, epoch = epoch + 1, loss, "Training progress");
        }
    }

    let logits = |rows: &[Vec<f64>]| -> Vec<Vec<f64>> { rows.iter().map(|r| model.logits(r)).collect() };
    let train_logits = logits(&train_set.rows);
    let validation_logits = logits(&validation_set.rows);

    let temperature = fit_temperature(&validation_logits, &validation_set.targets);
    let calibrated = |logits: &[Vec<f64>]| -> Vec<Vec<f64>> {
        logits.iter().map(|l| softmax(l, temperature)).collect()
    };
    let train_probs = calibrated(&train_logits);
    let validation_probs = calibrated(&validation_logits);

    let confusion = metrics::confusion_matrix(&validation_probs, &validation_set.targets, labels.len());
    let training_metrics = TrainingMetrics {
        train_examples: train_set.len(),
        validation_examples: validation_set.len(),
        epochs_completed: config.epochs,
        train_accuracy: metrics::accuracy(&train_probs, &train_set.targets),
        validation_accuracy: metrics::accuracy(&validation_probs, &validation_set.targets),
        validation_log_loss: metrics::log_loss(&validation_probs, &validation_set.targets),
        per_class: metrics::per_class(&confusion, &labels),
        confusion_matrix: confusion,
    };

    tracing::info!(
        %model_type,
        train_accuracy = training_metrics.train_accuracy,
        validation_accuracy = training_metrics.validation_accuracy,
        validation_log_loss = training_metrics.validation_log_loss,
        temperature,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Training finished"
    );

    Ok(ModelArtifact {
        artifact_id: Uuid::new_v4(),
        model_type,
        version: 0,
        created_at: Utc::now(),
        seed: config.seed,
        feature_schema: schema,
        label_set_version: model_type.label_set_version(),
        labels,
        parameters: model,
        temperature,
        metrics: training_metrics,
        training_config: config.clone(),
    })
}

/// One full-batch gradient descent update; returns the pre-update loss
fn gradient_step(model: &mut SoftmaxModel, rows: &[Vec<f64>], targets: &[usize], config: &TrainingConfig) -> f64 {
    let classes = model.classes();
    let dim = model.dim();
    let n = rows.len().max(1) as f64;

    let mut grad_w = vec![vec![0.0; dim]; classes];
    let mut grad_b = vec![0.0; classes];
    let mut loss = 0.0;

    for (z, &target) in rows.iter().zip(targets) {
        let p = softmax(&model.logits_standardized(z), 1.0);
        loss -= p[target].max(1e-15).ln();
        for c in 0..classes {
            let err = p[c] - if c == target { 1.0 } else { 0.0 };
            grad_b[c] += err;
            for (g, x) in grad_w[c].iter_mut().zip(z) {
                *g += err * x;
            }
        }
    }

    for c in 0..classes {
        for (w, g) in model.weights[c].iter_mut().zip(&grad_w[c]) {
            *w -= config.learning_rate * (g / n + config.l2 * *w);
        }
        model.bias[c] -= config.learning_rate * grad_b[c] / n;
    }
    loss / n
}
