//! Evaluation metrics for the disposition classifiers.

use crate::types::{class_names, Disposition, N_CLASSES};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Confusion matrix, rows are true classes and columns predicted classes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub n_classes: usize,
    /// Row-major counts (`truth * n_classes + predicted`).
    pub counts: Vec<u64>,
}

impl ConfusionMatrix {
    pub fn new(n_classes: usize) -> Self {
        Self {
            n_classes,
            counts: vec![0; n_classes * n_classes],
        }
    }

    pub fn from_predictions(truth: &[Disposition], predicted: &[Disposition]) -> Self {
        let mut cm = Self::new(N_CLASSES);
        for (t, p) in truth.iter().zip(predicted) {
            cm.add(t.index(), p.index());
        }
        cm
    }

    pub fn add(&mut self, truth: usize, predicted: usize) {
        if truth >= self.n_classes || predicted >= self.n_classes {
            return;
        }
        let idx = truth * self.n_classes + predicted;
        self.counts[idx] = self.counts[idx].saturating_add(1);
    }

    pub fn get(&self, truth: usize, predicted: usize) -> u64 {
        self.counts[truth * self.n_classes + predicted]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Counts as nested rows, for reports.
    pub fn rows(&self) -> Vec<Vec<u64>> {
        self.counts
            .chunks(self.n_classes.max(1))
            .map(<[u64]>::to_vec)
            .collect()
    }
}

/// Precision/recall statistics for a single class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerClassStats {
    pub class_name: String,
    /// `TP / (TP + FP)`.
    pub precision: f64,
    /// `TP / (TP + FN)`.
    pub recall: f64,
    pub f1: f64,
    /// Total number of true examples for the class.
    pub support: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AveragedStats {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: u64,
}

/// Per-class table plus accuracy and macro/weighted averages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub per_class: Vec<PerClassStats>,
    pub accuracy: f64,
    pub macro_avg: AveragedStats,
    pub weighted_avg: AveragedStats,
}

fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// Compute per-class precision, recall and F1 from a confusion matrix.
pub fn precision_recall_by_class(cm: &ConfusionMatrix, names: &[String]) -> Vec<PerClassStats> {
    let k = cm.n_classes;
    (0..k)
        .map(|class_idx| {
            let tp = cm.get(class_idx, class_idx) as f64;
            let support: u64 = (0..k).map(|j| cm.get(class_idx, j)).sum();
            let predicted: u64 = (0..k).map(|i| cm.get(i, class_idx)).sum();
            let precision = ratio(tp, predicted as f64);
            let recall = ratio(tp, support as f64);
            PerClassStats {
                class_name: names
                    .get(class_idx)
                    .cloned()
                    .unwrap_or_else(|| class_idx.to_string()),
                precision,
                recall,
                f1: ratio(2.0 * precision * recall, precision + recall),
                support,
            }
        })
        .collect()
}

/// Overall accuracy from a confusion matrix.
pub fn accuracy(cm: &ConfusionMatrix) -> f64 {
    let correct: u64 = (0..cm.n_classes).map(|i| cm.get(i, i)).sum();
    ratio(correct as f64, cm.total() as f64)
}

/// Fraction of matching labels.
pub fn accuracy_score(truth: &[Disposition], predicted: &[Disposition]) -> f64 {
    accuracy(&ConfusionMatrix::from_predictions(truth, predicted))
}

/// Mean negative log-likelihood of the true class, probabilities clipped at 1e-15.
pub fn log_loss(truth: &[Disposition], probabilities: &[Vec<f64>]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let total: f64 = truth
        .iter()
        .zip(probabilities)
        .map(|(t, p)| -p[t.index()].clamp(1e-15, 1.0).ln())
        .sum();
    total / truth.len() as f64
}

impl ClassificationReport {
    pub fn from_confusion(cm: &ConfusionMatrix) -> Self {
        let per_class = precision_recall_by_class(cm, &class_names());
        let support: u64 = per_class.iter().map(|s| s.support).sum();
        let k = per_class.len().max(1) as f64;

        let macro_avg = AveragedStats {
            precision: per_class.iter().map(|s| s.precision).sum::<f64>() / k,
            recall: per_class.iter().map(|s| s.recall).sum::<f64>() / k,
            f1: per_class.iter().map(|s| s.f1).sum::<f64>() / k,
            support,
        };
        let weighted = |f: fn(&PerClassStats) -> f64| {
            ratio(
                per_class.iter().map(|s| f(s) * s.support as f64).sum(),
                support as f64,
            )
        };
        let weighted_avg = AveragedStats {
            precision: weighted(|s| s.precision),
            recall: weighted(|s| s.recall),
            f1: weighted(|s| s.f1),
            support,
        };

        Self {
            accuracy: accuracy(cm),
            per_class,
            macro_avg,
            weighted_avg,
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .per_class
            .iter()
            .map(|s| s.class_name.len())
            .chain(["weighted avg".len()])
            .max()
            .unwrap_or(12);
        writeln!(
            f,
            "{:>width$} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        for s in &self.per_class {
            writeln!(
                f,
                "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                s.class_name, s.precision, s.recall, s.f1, s.support
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>width$} {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support
        )?;
        for (name, avg) in [("macro avg", &self.macro_avg), ("weighted avg", &self.weighted_avg)] {
            writeln!(
                f,
                "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                name, avg.precision, avg.recall, avg.f1, avg.support
            )?;
        }
        Ok(())
    }
}
