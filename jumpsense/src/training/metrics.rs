//! Evaluation metrics recorded in model artifacts

use crate::classifier::softmax::argmax;
use serde::{Deserialize, Serialize};

/// Lower bound on probabilities inside log-loss
const MIN_PROBABILITY: f64 = 1e-15;

/// Precision/recall of one class on the validation partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub label: String,
    pub precision: f64,
    pub recall: f64,
    /// Validation examples with this true label
    pub support: u32,
}

/// Training outcome summary
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub train_examples: usize,
    pub validation_examples: usize,
    pub epochs_completed: usize,
    pub train_accuracy: f64,
    pub validation_accuracy: f64,
    /// Mean negative log-likelihood after temperature calibration
    pub validation_log_loss: f64,
    /// `confusion_matrix[actual][predicted]`
    pub confusion_matrix: Vec<Vec<u32>>,
    pub per_class: Vec<ClassMetrics>,
}

/// Fraction of rows whose most probable class is the target
pub fn accuracy(probabilities: &[Vec<f64>], targets: &[usize]) -> f64 {
    if targets.is_empty() {
        return 0.0;
    }
    let correct = probabilities
        .iter()
        .zip(targets)
        .filter(|(p, &t)| argmax(p).0 == t)
        .count();
    correct as f64 / targets.len() as f64
}

/// Mean negative log-likelihood of the targets
pub fn log_loss(probabilities: &[Vec<f64>], targets: &[usize]) -> f64 {
    if targets.is_empty() {
        return 0.0;
    }
    let total: f64 = probabilities
        .iter()
        .zip(targets)
        .map(|(p, &t)| -p.get(t).copied().unwrap_or(0.0).max(MIN_PROBABILITY).ln())
        .sum();
    total / targets.len() as f64
}

pub fn confusion_matrix(probabilities: &[Vec<f64>], targets: &[usize], classes: usize) -> Vec<Vec<u32>> {
    let mut matrix = vec![vec![0u32; classes]; classes];
    for (p, &t) in probabilities.iter().zip(targets) {
        let predicted = argmax(p).0;
        if t < classes && predicted < classes {
            matrix[t][predicted] += 1;
        }
    }
    matrix
}

/// Per-class precision and recall from a confusion matrix
pub fn per_class(matrix: &[Vec<u32>], labels: &[String]) -> Vec<ClassMetrics> {
    labels
        .iter()
        .enumerate()
        .map(|(c, label)| {
            let tp = matrix.get(c).and_then(|row| row.get(c)).copied().unwrap_or(0) as f64;
            let support: u32 = matrix.get(c).map_or(0, |row| row.iter().sum());
            let predicted: u32 = matrix.iter().filter_map(|row| row.get(c)).sum();
            ClassMetrics {
                label: label.clone(),
                precision: if predicted == 0 { 0.0 } else { tp / predicted as f64 },
                recall: if support == 0 { 0.0 } else { tp / support as f64 },
                support,
            }
        })
        .collect()
}
