//! Meta-feature generation for the stacking head
//!
//! The meta-model consumes the base learners' class probabilities concatenated in
//! `LEARNER_ORDER`: 3 learners x 3 classes = 9 columns. Training and serving both
//! go through `generate_meta_features`; there is no second implementation.

use crate::errors::{CoreError, Result};
use crate::gbdt::GbdtClassifier;
use crate::mlp::MlpClassifier;
use crate::model::{check_width, ProbabilisticClassifier};
use crate::types::{Disposition, N_CLASSES};
use serde::{Deserialize, Serialize};

/// Learner names in meta-feature column order
pub const LEARNER_ORDER: [&str; 3] = ["gbdt", "hist_gbdt", "mlp"];

/// Width of a meta-feature vector
pub const META_FEATURE_COUNT: usize = LEARNER_ORDER.len() * N_CLASSES;

/// The three trained first-layer learners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseLearners {
    pub gradient_boosted: GbdtClassifier,
    pub histogram_boosted: GbdtClassifier,
    pub neural: MlpClassifier,
}

impl BaseLearners {
    /// Learners paired with their names, in `LEARNER_ORDER`.
    pub fn ordered(&self) -> [(&'static str, &dyn ProbabilisticClassifier); 3] {
        [
            (LEARNER_ORDER[0], &self.gradient_boosted),
            (LEARNER_ORDER[1], &self.histogram_boosted),
            (LEARNER_ORDER[2], &self.neural),
        ]
    }

    /// Every learner valid, 3-class, and reading `feature_count` columns.
    pub fn validate(&self, feature_count: usize) -> Result<()> {
        self.gradient_boosted.validate()?;
        self.histogram_boosted.validate()?;
        self.neural.validate()?;
        for (name, learner) in self.ordered() {
            if learner.n_classes() != N_CLASSES {
                return Err(CoreError::ArtifactIntegrity(format!(
                    "{name} predicts {} classes, expected {N_CLASSES}",
                    learner.n_classes()
                )));
            }
            if learner.feature_count() != feature_count {
                return Err(CoreError::ArtifactIntegrity(format!(
                    "{name} reads {} features, bundle declares {feature_count}",
                    learner.feature_count()
                )));
            }
        }
        Ok(())
    }
}

/// Column names `<learner>_<CLASS>` in meta-feature order
pub fn meta_feature_names() -> Vec<String> {
    LEARNER_ORDER
        .iter()
        .flat_map(|learner| {
            Disposition::ALL
                .iter()
                .map(move |class| format!("{learner}_{}", class.class_name()))
        })
        .collect()
}

/// Concatenate the base learners' probabilities for already-scaled rows.
pub fn generate_meta_features(base: &BaseLearners, scaled: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
    let mut meta: Vec<Vec<f64>> = vec![Vec::with_capacity(META_FEATURE_COUNT); scaled.len()];
    for (name, learner) in base.ordered() {
        check_width(scaled, learner.feature_count())?;
        let probabilities = learner.predict_proba(scaled)?;
        for (row, p) in meta.iter_mut().zip(probabilities) {
            if p.len() != N_CLASSES {
                return Err(CoreError::InvalidModel(format!(
                    "{name} returned {} probabilities",
                    p.len()
                )));
            }
            row.extend(p);
        }
    }
    Ok(meta)
}
