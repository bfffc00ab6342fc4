//! Small hand-built models for unit tests

use crate::ensemble::{EnsembleArtifact, EnsembleMetadata};
use crate::gbdt::{BoostingKind, GbdtClassifier, Node, Tree};
use crate::meta::{BaseLearners, META_FEATURE_COUNT};
use crate::mlp::{Activation, DenseLayer, MlpClassifier};
use crate::scaler::StandardScaler;
use chrono::{TimeZone, Utc};

pub fn constant_gbdt(kind: BoostingKind, width: usize, bias: [f64; 3]) -> GbdtClassifier {
    GbdtClassifier::new(
        kind,
        width,
        bias.to_vec(),
        vec![vec![
            Tree::new(vec![
                Node::internal(0, 0, 0.0, 1, 2),
                Node::leaf(1, 0.0),
                Node::leaf(2, 1.0),
            ]),
            Tree::constant(0.0),
            Tree::constant(0.0),
        ]],
    )
}

pub fn linear_mlp(width: usize) -> MlpClassifier {
    MlpClassifier::new(vec![DenseLayer {
        input_dim: width,
        output_dim: 3,
        weights: (0..3 * width).map(|i| (i % 5) as f64 * 0.1).collect(),
        bias: vec![0.0, 0.1, 0.2],
        activation: Activation::Softmax,
        batch_norm: None,
        dropout: 0.0,
    }])
}

pub fn learners() -> BaseLearners {
    BaseLearners {
        gradient_boosted: constant_gbdt(BoostingKind::Exact, 2, [0.0, 0.5, 0.9]),
        histogram_boosted: constant_gbdt(BoostingKind::Histogram, 2, [1.0, 0.0, 0.0]),
        neural: linear_mlp(2),
    }
}

/// Two-feature artifact whose meta-model favours whatever the first learner favours
pub fn artifact() -> EnsembleArtifact {
    let mut weights = vec![0.0; 3 * META_FEATURE_COUNT];
    for class in 0..3 {
        weights[class * META_FEATURE_COUNT + class] = 4.0;
    }
    let meta_model = MlpClassifier::new(vec![DenseLayer {
        input_dim: META_FEATURE_COUNT,
        output_dim: 3,
        weights,
        bias: vec![0.0; 3],
        activation: Activation::Softmax,
        batch_norm: None,
        dropout: 0.0,
    }]);
    EnsembleArtifact {
        scaler: StandardScaler {
            mean: vec![1.0, 0.0],
            scale: vec![2.0, 1.0],
        },
        base: learners(),
        meta_model,
        metadata: EnsembleMetadata::new(
            vec!["period".to_string(), "depth".to_string()],
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ),
    }
}
