//! Request and response types

use crate::metrics::MetricsSnapshot;
use chrono::{DateTime, Utc};
use exo_ai_core::{meta_feature_names, Disposition, EnsemblePrediction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One classified row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub prediction: Disposition,
    /// Largest class probability
    pub confidence: f64,
    /// Class name -> probability
    pub probabilities: BTreeMap<String, f64>,
    /// `<learner>_<CLASS>` -> base learner probability
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta_features: Option<BTreeMap<String, f64>>,
}

impl PredictionResponse {
    pub(crate) fn from_prediction(prediction: EnsemblePrediction) -> Self {
        let probabilities = Disposition::ALL
            .iter()
            .map(|class| class.class_name().to_string())
            .zip(prediction.probabilities)
            .collect();
        let meta_features = prediction
            .meta_features
            .map(|values| meta_feature_names().into_iter().zip(values).collect());
        Self {
            prediction: prediction.label,
            confidence: prediction.confidence,
            probabilities,
            meta_features,
        }
    }

    /// Probability of `class`, zero if absent
    pub fn probability(&self, class: Disposition) -> f64 {
        self.probabilities
            .get(class.class_name())
            .copied()
            .unwrap_or(0.0)
    }
}

/// Predictions for a batch, tagged with the bundle that produced them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPredictionResponse {
    pub predictions: Vec<PredictionResponse>,
    /// Bundle generation that served the batch
    pub generation: u64,
}

impl BatchPredictionResponse {
    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }
}

/// Service state as reported by `status()`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub version: String,
    pub schema_version: String,
    pub feature_count: usize,
    pub feature_names: Vec<String>,
    pub trained_at: DateTime<Utc>,
    /// Incremented on every successful swap or reload
    pub generation: u64,
    /// blake3 over the bundle contents
    pub fingerprint: String,
    pub loaded_at: DateTime<Utc>,
    pub metrics: MetricsSnapshot,
}
