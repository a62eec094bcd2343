//! Multinomial logistic regression over standardised features

use serde::{Deserialize, Serialize};

/// Per-feature standardisation `(x - mean) / scale`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standardizer {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl Standardizer {
    /// Statistics of the given rows; constant columns get unit scale
    pub fn fit(rows: &[Vec<f64>]) -> Self {
        let dim = rows.first().map_or(0, Vec::len);
        let n = rows.len().max(1) as f64;

        let mut mean = vec![0.0; dim];
        for row in rows {
            for (m, x) in mean.iter_mut().zip(row) {
                *m += x;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut var = vec![0.0; dim];
        for row in rows {
            for ((v, x), m) in var.iter_mut().zip(row).zip(&mean) {
                *v += (x - m) * (x - m);
            }
        }
        let scale = var
            .into_iter()
            .map(|v| {
                let s = (v / n).sqrt();
                if s > 1e-12 && s.is_finite() {
                    s
                } else {
                    1.0
                }
            })
            .collect();

        Self { mean, scale }
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (m, s))| (x - m) / s)
            .collect()
    }
}

/// Fitted softmax model
///
/// `weights[c]` holds the coefficients of class `c` over standardised
/// features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftmaxModel {
    pub standardizer: Standardizer,
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

impl SoftmaxModel {
    /// All-zero model (uniform predictions)
    pub fn zeros(standardizer: Standardizer, classes: usize) -> Self {
        let dim = standardizer.dim();
        Self {
            standardizer,
            weights: vec![vec![0.0; dim]; classes],
            bias: vec![0.0; classes],
        }
    }

    pub fn classes(&self) -> usize {
        self.bias.len()
    }

    pub fn dim(&self) -> usize {
        self.standardizer.dim()
    }

    /// True when every weight row matches the feature dimension
    pub fn is_consistent(&self) -> bool {
        self.weights.len() == self.bias.len()
            && self.standardizer.scale.len() == self.dim()
            && self.weights.iter().all(|w| w.len() == self.dim())
    }

    /// Class scores of an already standardised row
    pub fn logits_standardized(&self, z: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .zip(&self.bias)
            .map(|(w, b)| b + w.iter().zip(z).map(|(w, z)| w * z).sum::<f64>())
            .collect()
    }

    pub fn logits(&self, x: &[f64]) -> Vec<f64> {
        self.logits_standardized(&self.standardizer.transform(x))
    }

    /// Class probabilities with logits divided by `temperature`
    pub fn probabilities(&self, x: &[f64], temperature: f64) -> Vec<f64> {
        softmax(&self.logits(x), temperature)
    }
}

/// Numerically stable softmax of `logits / temperature`
pub fn softmax(logits: &[f64], temperature: f64) -> Vec<f64> {
    let t = if temperature > 0.0 && temperature.is_finite() {
        temperature
    } else {
        1.0
    };
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|l| ((l - max) / t).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index and value of the largest probability (first wins on ties)
pub fn argmax(values: &[f64]) -> (usize, f64) {
    values
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, v)| if v > best.1 { (i, v) } else { best })
}
