//! Feed-forward network inference
//!
//! Each layer applies `dense -> activation -> batch norm (optional)`. Dropout is a
//! training-time regularizer only; its rate is kept for provenance and has no
//! effect here. Batch norm uses the running statistics captured during training.

use crate::errors::{CoreError, Result};
use crate::model::{softmax, ProbabilisticClassifier};
use serde::{Deserialize, Serialize};

pub const MLP_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Softmax,
}

/// Inference-time batch normalization state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchNorm {
    pub gamma: Vec<f64>,
    pub beta: Vec<f64>,
    pub running_mean: Vec<f64>,
    pub running_var: Vec<f64>,
    pub epsilon: f64,
}

impl BatchNorm {
    pub fn identity(width: usize, epsilon: f64) -> Self {
        Self {
            gamma: vec![1.0; width],
            beta: vec![0.0; width],
            running_mean: vec![0.0; width],
            running_var: vec![1.0; width],
            epsilon,
        }
    }

    pub fn apply(&self, values: &mut [f64]) {
        for (i, v) in values.iter_mut().enumerate() {
            let normalized =
                (*v - self.running_mean[i]) / (self.running_var[i] + self.epsilon).sqrt();
            *v = self.gamma[i] * normalized + self.beta[i];
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    pub input_dim: usize,
    pub output_dim: usize,
    /// Output-major: `weights[o * input_dim + i]`
    pub weights: Vec<f64>,
    pub bias: Vec<f64>,
    pub activation: Activation,
    pub batch_norm: Option<BatchNorm>,
    pub dropout: f64,
}

impl DenseLayer {
    /// Pre-activation output `W x + b`
    pub fn linear(&self, input: &[f64]) -> Vec<f64> {
        (0..self.output_dim)
            .map(|o| {
                let w = &self.weights[o * self.input_dim..(o + 1) * self.input_dim];
                self.bias[o] + w.iter().zip(input).map(|(w, x)| w * x).sum::<f64>()
            })
            .collect()
    }

    pub fn forward(&self, input: &[f64]) -> Vec<f64> {
        let z = self.linear(input);
        let mut out = match self.activation {
            Activation::Relu => z.into_iter().map(|v| v.max(0.0)).collect(),
            Activation::Softmax => softmax(&z),
        };
        if let Some(bn) = &self.batch_norm {
            bn.apply(&mut out);
        }
        out
    }

    fn validate(&self, index: usize) -> Result<()> {
        let fail = |msg: String| -> Result<()> {
            Err(CoreError::InvalidModel(format!("layer {index}: {msg}")))
        };
        if self.weights.len() != self.input_dim * self.output_dim {
            return fail(format!(
                "{} weights for a {}x{} layer",
                self.weights.len(),
                self.input_dim,
                self.output_dim
            ));
        }
        if self.bias.len() != self.output_dim {
            return fail(format!("{} biases, expected {}", self.bias.len(), self.output_dim));
        }
        if self.weights.iter().chain(&self.bias).any(|w| !w.is_finite()) {
            return fail("non-finite parameter".to_string());
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return fail(format!("dropout rate {} outside [0, 1)", self.dropout));
        }
        if let Some(bn) = &self.batch_norm {
            let w = self.output_dim;
            if bn.gamma.len() != w
                || bn.beta.len() != w
                || bn.running_mean.len() != w
                || bn.running_var.len() != w
            {
                return fail("batch norm width mismatch".to_string());
            }
            if bn.epsilon <= 0.0 || bn.running_var.iter().any(|v| v.is_nan() || *v < 0.0) {
                return fail("batch norm variance or epsilon out of range".to_string());
            }
        }
        Ok(())
    }
}

/// Stack of dense layers ending in a softmax
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpClassifier {
    pub version: u32,
    pub layers: Vec<DenseLayer>,
}

impl MlpClassifier {
    pub fn new(layers: Vec<DenseLayer>) -> Self {
        Self {
            version: MLP_FORMAT_VERSION,
            layers,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != MLP_FORMAT_VERSION {
            return Err(CoreError::InvalidModel(format!(
                "Unsupported mlp version: {}",
                self.version
            )));
        }
        let Some(last) = self.layers.last() else {
            return Err(CoreError::InvalidModel("network has no layers".to_string()));
        };
        if last.activation != Activation::Softmax || last.batch_norm.is_some() {
            return Err(CoreError::InvalidModel(
                "output layer must be a plain softmax".to_string(),
            ));
        }
        for (i, layer) in self.layers.iter().enumerate() {
            layer.validate(i)?;
            if i + 1 < self.layers.len() && layer.activation != Activation::Relu {
                return Err(CoreError::InvalidModel(format!(
                    "hidden layer {i} must use relu"
                )));
            }
            if i > 0 && self.layers[i - 1].output_dim != layer.input_dim {
                return Err(CoreError::InvalidModel(format!(
                    "layer {} expects {} inputs but layer {} produces {}",
                    i,
                    layer.input_dim,
                    i - 1,
                    self.layers[i - 1].output_dim
                )));
            }
        }
        Ok(())
    }

    /// Layer widths from input to output
    pub fn architecture(&self) -> Vec<usize> {
        self.layers
            .first()
            .map(|l| l.input_dim)
            .into_iter()
            .chain(self.layers.iter().map(|l| l.output_dim))
            .collect()
    }
}

impl ProbabilisticClassifier for MlpClassifier {
    fn n_classes(&self) -> usize {
        self.layers.last().map_or(0, |l| l.output_dim)
    }

    fn feature_count(&self) -> usize {
        self.layers.first().map_or(0, |l| l.input_dim)
    }

    fn predict_proba_row(&self, row: &[f64]) -> Vec<f64> {
        self.layers
            .iter()
            .fold(row.to_vec(), |acc, layer| layer.forward(&acc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> MlpClassifier {
        MlpClassifier::new(vec![
            DenseLayer {
                input_dim: 2,
                output_dim: 2,
                weights: vec![1.0, 0.0, 0.0, -1.0],
                bias: vec![0.0, 0.0],
                activation: Activation::Relu,
                batch_norm: Some(BatchNorm::identity(2, 1e-3)),
                dropout: 0.3,
            },
            DenseLayer {
                input_dim: 2,
                output_dim: 3,
                weights: vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.0],
                bias: vec![0.0, 0.0, 0.0],
                activation: Activation::Softmax,
                batch_norm: None,
                dropout: 0.0,
            },
        ])
    }

    #[test]
    fn forward_pass_yields_probabilities() {
        let model = tiny();
        model.validate().unwrap();
        assert_eq!(model.architecture(), vec![2, 2, 3]);
        assert_eq!(model.feature_count(), 2);
        assert_eq!(model.n_classes(), 3);

        let p = model.predict_proba(&[vec![3.0, -2.0]]).unwrap();
        assert!((p[0].iter().sum::<f64>() - 1.0).abs() < 1e-12);
        // relu(3), relu(2) pass through a near-identity batch norm
        assert!(p[0][0] > p[0][1] && p[0][1] > p[0][2]);
    }

    #[test]
    fn mismatched_layers_are_invalid() {
        let mut model = tiny();
        model.layers[1].input_dim = 3;
        assert!(model.validate().is_err());

        let mut model = tiny();
        model.layers[1].activation = Activation::Relu;
        assert!(model.validate().is_err());
    }
}
