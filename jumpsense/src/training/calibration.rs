//! Temperature scaling fitted on held-out data

use super::metrics::log_loss;
use crate::classifier::softmax::softmax;

pub const MIN_TEMPERATURE: f64 = 0.05;
pub const MAX_TEMPERATURE: f64 = 20.0;

const GOLDEN_ITERATIONS: usize = 80;

/// Temperature minimising validation negative log-likelihood
///
/// Golden-section search over `[MIN_TEMPERATURE, MAX_TEMPERATURE]`. NLL is
/// unimodal in the temperature for fixed logits. With no rows the identity
/// temperature 1.0 is returned.
pub fn fit_temperature(logits: &[Vec<f64>], targets: &[usize]) -> f64 {
    if logits.is_empty() {
        return 1.0;
    }
    let nll = |t: f64| {
        let probabilities: Vec<Vec<f64>> = logits.iter().map(|l| softmax(l, t)).collect();
        log_loss(&probabilities, targets)
    };

    let ratio = (5f64.sqrt() - 1.0) / 2.0;
    let (mut a, mut b) = (MIN_TEMPERATURE, MAX_TEMPERATURE);
    let mut c = b - ratio * (b - a);
    let mut d = a + ratio * (b - a);
    let (mut fc, mut fd) = (nll(c), nll(d));

    for _ in 0..GOLDEN_ITERATIONS {
        if fc <= fd {
            b = d;
            d = c;
            fd = fc;
            c = b - ratio * (b - a);
            fc = nll(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + ratio * (b - a);
            fd = nll(d);
        }
    }

    let t = (a + b) / 2.0;
    // Keep the uncalibrated model if scaling does not help
    if nll(t) < nll(1.0) {
        t
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overconfident_logits_get_softened() {
        // Confident but wrong a third of the time
        let logits = vec![
            vec![8.0, 0.0],
            vec![8.0, 0.0],
            vec![8.0, 0.0],
            vec![0.0, 8.0],
            vec![0.0, 8.0],
            vec![0.0, 8.0],
        ];
        let targets = vec![0, 0, 1, 1, 1, 0];
        let t = fit_temperature(&logits, &targets);
        assert!(t > 1.0);
        assert!(t <= MAX_TEMPERATURE);
    }

    #[test]
    fn test_empty_validation_keeps_identity() {
        assert_eq!(fit_temperature(&[], &[]), 1.0);
    }
}
