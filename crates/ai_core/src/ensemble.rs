//! The stacked ensemble as one immutable unit
//!
//! Inference replays the training transformation chain exactly:
//! scaler -> base learners -> meta-feature concatenation -> meta-model -> argmax.

use crate::errors::{CoreError, Result};
use crate::meta::{generate_meta_features, BaseLearners, LEARNER_ORDER, META_FEATURE_COUNT};
use crate::mlp::MlpClassifier;
use crate::model::{argmax, check_width, ProbabilisticClassifier};
use crate::scaler::StandardScaler;
use crate::types::{class_names, Disposition, N_CLASSES};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Version of the bundle layout and metadata record
pub const ARTIFACT_SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleMetadata {
    pub schema_version: String,
    pub feature_count: usize,
    /// Model input columns, in order
    pub feature_names: Vec<String>,
    /// Class names, in probability-vector order
    pub class_names: Vec<String>,
    /// Base learner names, in meta-feature order
    pub learner_order: Vec<String>,
    pub trained_at: DateTime<Utc>,
}

impl EnsembleMetadata {
    pub fn new(feature_names: Vec<String>, trained_at: DateTime<Utc>) -> Self {
        Self {
            schema_version: ARTIFACT_SCHEMA_VERSION.to_string(),
            feature_count: feature_names.len(),
            feature_names,
            class_names: class_names(),
            learner_order: LEARNER_ORDER.iter().map(|s| s.to_string()).collect(),
            trained_at,
        }
    }
}

/// Outcome for one input row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsemblePrediction {
    pub label: Disposition,
    /// Meta-model probabilities in class order
    pub probabilities: Vec<f64>,
    /// Largest class probability
    pub confidence: f64,
    /// The row's meta-feature vector, when requested
    pub meta_features: Option<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleArtifact {
    pub scaler: StandardScaler,
    pub base: BaseLearners,
    pub meta_model: MlpClassifier,
    pub metadata: EnsembleMetadata,
}

impl EnsembleArtifact {
    pub fn feature_count(&self) -> usize {
        self.metadata.feature_count
    }

    /// Cross-component shape checks; a bundle that fails must not serve.
    pub fn validate(&self) -> Result<()> {
        let meta = &self.metadata;
        if meta.schema_version != ARTIFACT_SCHEMA_VERSION {
            return Err(CoreError::ArtifactIntegrity(format!(
                "unsupported schema version {}",
                meta.schema_version
            )));
        }
        if meta.feature_names.len() != meta.feature_count {
            return Err(CoreError::ArtifactIntegrity(format!(
                "{} feature names for {} features",
                meta.feature_names.len(),
                meta.feature_count
            )));
        }
        if meta.class_names != class_names() {
            return Err(CoreError::ArtifactIntegrity(format!(
                "class names {:?} do not match the disposition encoding",
                meta.class_names
            )));
        }
        if meta.learner_order.iter().map(String::as_str).ne(LEARNER_ORDER) {
            return Err(CoreError::ArtifactIntegrity(format!(
                "learner order {:?} does not match {:?}",
                meta.learner_order, LEARNER_ORDER
            )));
        }

        self.scaler.validate()?;
        if self.scaler.n_features() != meta.feature_count {
            return Err(CoreError::ArtifactIntegrity(format!(
                "scaler has {} features, bundle declares {}",
                self.scaler.n_features(),
                meta.feature_count
            )));
        }
        self.base.validate(meta.feature_count)?;

        self.meta_model.validate()?;
        if self.meta_model.feature_count() != META_FEATURE_COUNT
            || self.meta_model.n_classes() != N_CLASSES
        {
            return Err(CoreError::ArtifactIntegrity(format!(
                "meta-model maps {} inputs to {} classes, expected {} to {}",
                self.meta_model.feature_count(),
                self.meta_model.n_classes(),
                META_FEATURE_COUNT,
                N_CLASSES
            )));
        }
        Ok(())
    }

    fn check_input(&self, rows: &[Vec<f64>]) -> Result<()> {
        check_width(rows, self.feature_count())?;
        for (r, row) in rows.iter().enumerate() {
            if let Some(c) = row.iter().position(|x| !x.is_finite()) {
                return Err(CoreError::NonFiniteInput { row: r, column: c });
            }
        }
        Ok(())
    }

    /// Meta-feature matrix for raw (unscaled) rows
    pub fn meta_features(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        self.check_input(rows)?;
        let scaled = self.scaler.transform(rows)?;
        generate_meta_features(&self.base, &scaled)
    }

    /// Classify raw rows. Width and finiteness are checked before any model runs.
    pub fn predict_batch(
        &self,
        rows: &[Vec<f64>],
        include_meta: bool,
    ) -> Result<Vec<EnsemblePrediction>> {
        let meta = self.meta_features(rows)?;
        let probabilities = self.meta_model.predict_proba(&meta)?;

        probabilities
            .into_iter()
            .zip(meta)
            .map(|(p, m)| {
                let best = argmax(&p);
                Ok(EnsemblePrediction {
                    label: Disposition::from_index(best)?,
                    confidence: p[best],
                    probabilities: p,
                    meta_features: include_meta.then_some(m),
                })
            })
            .collect()
    }

    pub fn predict_single(&self, row: &[f64], include_meta: bool) -> Result<EnsemblePrediction> {
        let mut out = self.predict_batch(&[row.to_vec()], include_meta)?;
        out.pop()
            .ok_or_else(|| CoreError::EmptyDataset("no prediction produced".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::artifact;

    #[test]
    fn fixture_bundle_is_consistent() {
        artifact().validate().unwrap();
    }

    #[test]
    fn prediction_follows_the_full_chain() {
        let bundle = artifact();
        let rows = vec![vec![3.0, 0.0], vec![-1.0, 0.0]];
        let preds = bundle.predict_batch(&rows, true).unwrap();
        assert_eq!(preds.len(), 2);
        for pred in &preds {
            assert!((pred.probabilities.iter().sum::<f64>() - 1.0).abs() < 1e-9);
            assert_eq!(pred.confidence, pred.probabilities[pred.label.index()]);
            assert_eq!(pred.meta_features.as_ref().map(Vec::len), Some(META_FEATURE_COUNT));
        }
        // scaled first feature 1.0 > 0 sends the first learner towards FALSE_POSITIVE
        assert_eq!(preds[0].label, Disposition::FalsePositive);
        assert_eq!(preds[1].label, Disposition::Confirmed);
    }

    #[test]
    fn one_fewer_column_is_rejected_before_inference() {
        let bundle = artifact();
        let err = bundle.predict_single(&[1.0], false).unwrap_err();
        assert!(matches!(
            err,
            CoreError::FeatureCountMismatch {
                expected: 2,
                actual: 1
            }
        ));
        assert!(err.is_request_error());
    }

    #[test]
    fn non_finite_input_is_rejected() {
        let err = artifact()
            .predict_batch(&[vec![0.0, 0.0], vec![0.0, f64::NAN]], false)
            .unwrap_err();
        assert!(matches!(err, CoreError::NonFiniteInput { row: 1, column: 1 }));
    }

    #[test]
    fn identical_requests_give_identical_answers() {
        let bundle = artifact();
        let a = bundle.predict_single(&[0.5, 2.0], true).unwrap();
        let b = bundle.predict_single(&[0.5, 2.0], true).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn wrong_meta_width_fails_validation() {
        let mut bundle = artifact();
        bundle.meta_model = crate::testing::linear_mlp(6);
        assert!(matches!(
            bundle.validate(),
            Err(CoreError::ArtifactIntegrity(_))
        ));
    }
}
