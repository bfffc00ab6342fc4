//! Shared contract of every classifier in the ensemble

use crate::errors::{CoreError, Result};
use rayon::prelude::*;

/// A trained classifier that maps a scaled feature row to class probabilities.
pub trait ProbabilisticClassifier: Send + Sync {
    fn n_classes(&self) -> usize;

    fn feature_count(&self) -> usize;

    /// Probabilities for one row whose width has already been checked.
    fn predict_proba_row(&self, row: &[f64]) -> Vec<f64>;

    /// Probabilities for every row, shape `(rows, n_classes)`, each row summing to 1.
    fn predict_proba(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        check_width(rows, self.feature_count())?;
        Ok(rows.par_iter().map(|row| self.predict_proba_row(row)).collect())
    }

    /// Index of the most probable class for every row.
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<usize>> {
        Ok(self.predict_proba(rows)?.iter().map(|p| argmax(p)).collect())
    }
}

pub fn check_width(rows: &[Vec<f64>], expected: usize) -> Result<()> {
    match rows.iter().find(|row| row.len() != expected) {
        Some(row) => Err(CoreError::FeatureCountMismatch {
            expected,
            actual: row.len(),
        }),
        None => Ok(()),
    }
}

/// Numerically stable softmax
pub fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|z| (z - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index of the largest value; the lowest index wins ties.
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0usize;
    for (idx, value) in values.iter().enumerate() {
        if *value > values[best] {
            best = idx;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softmax_sums_to_one_and_handles_large_logits() {
        let p = softmax(&[1000.0, 1000.0, 999.0]);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!((p[0] - p[1]).abs() < 1e-15);
        assert!(p[2] < p[0]);
    }

    #[test]
    fn argmax_prefers_lowest_index_on_ties() {
        assert_eq!(argmax(&[0.4, 0.4, 0.2]), 0);
        assert_eq!(argmax(&[0.1, 0.2, 0.7]), 2);
    }
}
