//! Multiclass boosted model with softmax output

use super::tree::Tree;
use crate::errors::{CoreError, Result};
use crate::model::{softmax, ProbabilisticClassifier};
use serde::{Deserialize, Serialize};

/// Current persisted format version
pub const GBDT_FORMAT_VERSION: u32 = 1;

/// Which trainer grew the trees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoostingKind {
    /// Exact greedy split search over sorted feature values
    Exact,
    /// Split search over quantized feature bins, leaf-wise growth
    Histogram,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GbdtClassifier {
    pub version: u32,
    pub kind: BoostingKind,
    pub n_classes: usize,
    pub feature_count: usize,
    /// Initial raw score per class (log prior)
    pub base_score: Vec<f64>,
    /// `rounds[r][k]` is the class-`k` tree of boosting round `r`
    pub rounds: Vec<Vec<Tree>>,
    /// Round with the lowest validation loss; `rounds` is already truncated to it
    pub best_iteration: Option<usize>,
}

impl GbdtClassifier {
    pub fn new(
        kind: BoostingKind,
        feature_count: usize,
        base_score: Vec<f64>,
        rounds: Vec<Vec<Tree>>,
    ) -> Self {
        Self {
            version: GBDT_FORMAT_VERSION,
            kind,
            n_classes: base_score.len(),
            feature_count,
            base_score,
            rounds,
            best_iteration: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != GBDT_FORMAT_VERSION {
            return Err(CoreError::InvalidModel(format!(
                "Unsupported gbdt version: {}",
                self.version
            )));
        }
        if self.n_classes < 2 || self.base_score.len() != self.n_classes {
            return Err(CoreError::InvalidModel(format!(
                "gbdt has {} classes and {} base scores",
                self.n_classes,
                self.base_score.len()
            )));
        }
        for (r, round) in self.rounds.iter().enumerate() {
            if round.len() != self.n_classes {
                return Err(CoreError::InvalidModel(format!(
                    "round {} has {} trees, expected {}",
                    r,
                    round.len(),
                    self.n_classes
                )));
            }
            for (k, tree) in round.iter().enumerate() {
                tree.validate(self.feature_count).map_err(|e| {
                    CoreError::InvalidModel(format!("round {r} class {k}: {e}"))
                })?;
            }
        }
        Ok(())
    }

    pub fn num_rounds(&self) -> usize {
        self.rounds.len()
    }

    /// Raw (pre-softmax) scores for one row
    pub fn predict_raw(&self, row: &[f64]) -> Vec<f64> {
        let mut raw = self.base_score.clone();
        for round in &self.rounds {
            for (score, tree) in raw.iter_mut().zip(round) {
                *score += tree.evaluate(row);
            }
        }
        raw
    }
}

impl ProbabilisticClassifier for GbdtClassifier {
    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn feature_count(&self) -> usize {
        self.feature_count
    }

    fn predict_proba_row(&self, row: &[f64]) -> Vec<f64> {
        softmax(&self.predict_raw(row))
    }
}
