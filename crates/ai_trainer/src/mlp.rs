//! Feed-forward network training
//!
//! Minibatch Adam on sparse categorical cross-entropy. Hidden layers are
//! `dense -> relu -> batch norm (optional) -> dropout`; the output layer is a plain
//! softmax. Batch norm normalizes with batch statistics while training and keeps
//! exponential running averages for inference. After every epoch the network is
//! scored on the validation set: a plateau halves the learning rate (when a
//! schedule is configured) and `patience` epochs without improvement stop training,
//! restoring the best weights seen.

use crate::config::MlpParams;
use crate::errors::{Result, TrainerError};
use exo_ai_core::metrics::log_loss;
use exo_ai_core::mlp::{Activation, BatchNorm, DenseLayer};
use exo_ai_core::model::{check_width, softmax};
use exo_ai_core::{Disposition, MlpClassifier, ProbabilisticClassifier, N_CLASSES};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPSILON: f64 = 1e-7;

/// Smallest validation-loss decrease that counts as progress for the LR schedule
const PLATEAU_MIN_DELTA: f64 = 1e-4;

/// What happened during one training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpHistory {
    pub epochs_run: usize,
    /// Zero-based epoch whose weights were kept
    pub best_epoch: usize,
    pub best_val_loss: Option<f64>,
    pub final_learning_rate: f64,
    pub lr_reductions: usize,
    pub train_loss: Vec<f64>,
    pub val_loss: Vec<f64>,
}

/// First and second moment estimates for one parameter vector
#[derive(Debug, Clone)]
struct Adam {
    m: Vec<f64>,
    v: Vec<f64>,
}

impl Adam {
    fn new(len: usize) -> Self {
        Self {
            m: vec![0.0; len],
            v: vec![0.0; len],
        }
    }

    fn step(&mut self, params: &mut [f64], grads: &[f64], lr: f64, t: i32) {
        let correction = (1.0 - ADAM_BETA2.powi(t)).sqrt() / (1.0 - ADAM_BETA1.powi(t));
        for ((p, g), (m, v)) in params
            .iter_mut()
            .zip(grads)
            .zip(self.m.iter_mut().zip(self.v.iter_mut()))
        {
            *m = ADAM_BETA1 * *m + (1.0 - ADAM_BETA1) * g;
            *v = ADAM_BETA2 * *v + (1.0 - ADAM_BETA2) * g * g;
            *p -= lr * correction * *m / (v.sqrt() + ADAM_EPSILON);
        }
    }
}

#[derive(Debug, Clone)]
struct TrainBatchNorm {
    gamma: Vec<f64>,
    beta: Vec<f64>,
    running_mean: Vec<f64>,
    running_var: Vec<f64>,
    momentum: f64,
    epsilon: f64,
    opt_gamma: Adam,
    opt_beta: Adam,
}

impl TrainBatchNorm {
    fn new(width: usize, momentum: f64, epsilon: f64) -> Self {
        let identity = BatchNorm::identity(width, epsilon);
        Self {
            gamma: identity.gamma,
            beta: identity.beta,
            running_mean: identity.running_mean,
            running_var: identity.running_var,
            momentum,
            epsilon,
            opt_gamma: Adam::new(width),
            opt_beta: Adam::new(width),
        }
    }
}

/// Intermediate values of one forward pass, kept for backpropagation
#[derive(Default)]
struct LayerCache {
    input: Vec<Vec<f64>>,
    pre_activation: Vec<Vec<f64>>,
    normalized: Vec<Vec<f64>>,
    inv_std: Vec<f64>,
    /// Dropout multipliers (0 or 1/(1-p)); empty without dropout
    mask: Vec<Vec<f64>>,
}

#[derive(Debug, Clone)]
struct TrainLayer {
    input_dim: usize,
    output_dim: usize,
    /// Output-major, same layout as `DenseLayer`
    weights: Vec<f64>,
    bias: Vec<f64>,
    activation: Activation,
    dropout: f64,
    batch_norm: Option<TrainBatchNorm>,
    opt_weights: Adam,
    opt_bias: Adam,
}

impl TrainLayer {
    /// Glorot-uniform weights, zero biases
    fn new(
        input_dim: usize,
        output_dim: usize,
        activation: Activation,
        batch_norm: Option<TrainBatchNorm>,
        dropout: f64,
        rng: &mut StdRng,
    ) -> Self {
        let limit = (6.0 / (input_dim + output_dim) as f64).sqrt();
        let weights = (0..input_dim * output_dim)
            .map(|_| rng.gen_range(-limit..limit))
            .collect();
        Self {
            input_dim,
            output_dim,
            weights,
            bias: vec![0.0; output_dim],
            activation,
            dropout,
            batch_norm,
            opt_weights: Adam::new(input_dim * output_dim),
            opt_bias: Adam::new(output_dim),
        }
    }

    fn to_dense(&self) -> DenseLayer {
        DenseLayer {
            input_dim: self.input_dim,
            output_dim: self.output_dim,
            weights: self.weights.clone(),
            bias: self.bias.clone(),
            activation: self.activation,
            batch_norm: self.batch_norm.as_ref().map(|bn| BatchNorm {
                gamma: bn.gamma.clone(),
                beta: bn.beta.clone(),
                running_mean: bn.running_mean.clone(),
                running_var: bn.running_var.clone(),
                epsilon: bn.epsilon,
            }),
            dropout: self.dropout,
        }
    }

    fn linear(&self, input: &[Vec<f64>]) -> Vec<Vec<f64>> {
        input
            .par_iter()
            .map(|x| {
                self.weights
                    .chunks(self.input_dim)
                    .zip(&self.bias)
                    .map(|(w, b)| b + w.iter().zip(x).map(|(w, x)| w * x).sum::<f64>())
                    .collect()
            })
            .collect()
    }

    fn forward_train(&mut self, input: Vec<Vec<f64>>, rng: &mut StdRng) -> (Vec<Vec<f64>>, LayerCache) {
        let pre_activation = self.linear(&input);
        let mut out: Vec<Vec<f64>> = match self.activation {
            Activation::Relu => pre_activation
                .iter()
                .map(|z| z.iter().map(|v| v.max(0.0)).collect())
                .collect(),
            Activation::Softmax => pre_activation.iter().map(|z| softmax(z)).collect(),
        };
        let mut cache = LayerCache::default();

        if let Some(bn) = self.batch_norm.as_mut() {
            let rows = out.len() as f64;
            let width = self.output_dim;
            let mut mean = vec![0.0; width];
            for row in &out {
                for (m, v) in mean.iter_mut().zip(row) {
                    *m += v / rows;
                }
            }
            let mut var = vec![0.0; width];
            for row in &out {
                for ((s, v), m) in var.iter_mut().zip(row).zip(&mean) {
                    *s += (v - m) * (v - m) / rows;
                }
            }
            let inv_std: Vec<f64> = var.iter().map(|v| 1.0 / (v + bn.epsilon).sqrt()).collect();
            let mut normalized = Vec::with_capacity(out.len());
            for row in out.iter_mut() {
                let xhat: Vec<f64> = (0..width).map(|j| (row[j] - mean[j]) * inv_std[j]).collect();
                for j in 0..width {
                    row[j] = bn.gamma[j] * xhat[j] + bn.beta[j];
                }
                normalized.push(xhat);
            }
            for j in 0..width {
                bn.running_mean[j] = bn.momentum * bn.running_mean[j] + (1.0 - bn.momentum) * mean[j];
                bn.running_var[j] = bn.momentum * bn.running_var[j] + (1.0 - bn.momentum) * var[j];
            }
            cache.normalized = normalized;
            cache.inv_std = inv_std;
        }

        let rate = self.dropout;
        if rate > 0.0 {
            let keep_scale = 1.0 / (1.0 - rate);
            cache.mask = out
                .iter_mut()
                .map(|row| {
                    row.iter_mut()
                        .map(|v| {
                            let m = if rng.gen::<f64>() < rate { 0.0 } else { keep_scale };
                            *v *= m;
                            m
                        })
                        .collect()
                })
                .collect();
        }

        cache.input = input;
        cache.pre_activation = pre_activation;
        (out, cache)
    }

    /// Backpropagate `grad_out` and apply one Adam step; returns the input gradient.
    /// The softmax output layer receives the loss gradient with respect to its
    /// pre-activation directly.
    fn backward(&mut self, mut grad: Vec<Vec<f64>>, cache: &LayerCache, lr: f64, t: i32) -> Vec<Vec<f64>> {
        let rows = grad.len();
        if !cache.mask.is_empty() {
            for (g, m) in grad.iter_mut().zip(&cache.mask) {
                for (g, m) in g.iter_mut().zip(m) {
                    *g *= m;
                }
            }
        }

        if let Some(bn) = self.batch_norm.as_mut() {
            let width = self.output_dim;
            let n = rows as f64;
            let mut d_gamma = vec![0.0; width];
            let mut d_beta = vec![0.0; width];
            let mut sum_dxhat = vec![0.0; width];
            let mut sum_dxhat_xhat = vec![0.0; width];
            for (g, xhat) in grad.iter().zip(&cache.normalized) {
                for j in 0..width {
                    d_gamma[j] += g[j] * xhat[j];
                    d_beta[j] += g[j];
                    let dxhat = g[j] * bn.gamma[j];
                    sum_dxhat[j] += dxhat;
                    sum_dxhat_xhat[j] += dxhat * xhat[j];
                }
            }
            for (g, xhat) in grad.iter_mut().zip(&cache.normalized) {
                for j in 0..width {
                    let dxhat = g[j] * bn.gamma[j];
                    g[j] = cache.inv_std[j] / n
                        * (n * dxhat - sum_dxhat[j] - xhat[j] * sum_dxhat_xhat[j]);
                }
            }
            bn.opt_gamma.step(&mut bn.gamma, &d_gamma, lr, t);
            bn.opt_beta.step(&mut bn.beta, &d_beta, lr, t);
        }

        if self.activation == Activation::Relu {
            for (g, z) in grad.iter_mut().zip(&cache.pre_activation) {
                for (g, z) in g.iter_mut().zip(z) {
                    if *z <= 0.0 {
                        *g = 0.0;
                    }
                }
            }
        }

        let input_dim = self.input_dim;
        let grad_input: Vec<Vec<f64>> = grad
            .par_iter()
            .map(|g| {
                let mut dx = vec![0.0; input_dim];
                for (o, w) in self.weights.chunks(input_dim).enumerate() {
                    if g[o] != 0.0 {
                        for (d, w) in dx.iter_mut().zip(w) {
                            *d += g[o] * w;
                        }
                    }
                }
                dx
            })
            .collect();

        let mut grad_weights = vec![0.0; self.weights.len()];
        grad_weights
            .par_chunks_mut(input_dim)
            .enumerate()
            .for_each(|(o, dw)| {
                for (g, x) in grad.iter().zip(&cache.input) {
                    if g[o] != 0.0 {
                        for (d, x) in dw.iter_mut().zip(x) {
                            *d += g[o] * x;
                        }
                    }
                }
            });
        let grad_bias: Vec<f64> = (0..self.output_dim)
            .map(|o| grad.iter().map(|g| g[o]).sum())
            .collect();

        self.opt_weights.step(&mut self.weights, &grad_weights, lr, t);
        self.opt_bias.step(&mut self.bias, &grad_bias, lr, t);
        grad_input
    }
}

struct Network {
    layers: Vec<TrainLayer>,
    step: i32,
}

impl Network {
    fn build(input_dim: usize, params: &MlpParams, rng: &mut StdRng) -> Self {
        let mut layers = Vec::with_capacity(params.hidden.len() + 1);
        let mut width = input_dim;
        for hidden in &params.hidden {
            let bn = hidden
                .batch_norm
                .then(|| TrainBatchNorm::new(hidden.units, params.bn_momentum, params.bn_epsilon));
            layers.push(TrainLayer::new(
                width,
                hidden.units,
                Activation::Relu,
                bn,
                hidden.dropout,
                rng,
            ));
            width = hidden.units;
        }
        layers.push(TrainLayer::new(width, N_CLASSES, Activation::Softmax, None, 0.0, rng));
        Self { layers, step: 0 }
    }

    fn to_classifier(&self) -> MlpClassifier {
        MlpClassifier::new(self.layers.iter().map(TrainLayer::to_dense).collect())
    }

    /// One Adam step on a minibatch; returns the batch loss
    fn train_batch(&mut self, batch: Vec<Vec<f64>>, labels: &[Disposition], lr: f64, rng: &mut StdRng) -> f64 {
        self.step += 1;
        let mut caches = Vec::with_capacity(self.layers.len());
        let mut activations = batch;
        for layer in self.layers.iter_mut() {
            let (out, cache) = layer.forward_train(activations, rng);
            caches.push(cache);
            activations = out;
        }

        let n = labels.len() as f64;
        let mut loss = 0.0;
        let mut grad = activations;
        for (p, y) in grad.iter_mut().zip(labels) {
            loss -= p[y.index()].max(1e-15).ln() / n;
            p[y.index()] -= 1.0;
            for v in p.iter_mut() {
                *v /= n;
            }
        }

        for (layer, cache) in self.layers.iter_mut().zip(&caches).rev() {
            grad = layer.backward(grad, cache, lr, self.step);
        }
        loss
    }
}

/// Train a network, early-stopping on the validation loss.
#[allow(clippy::too_many_arguments)]
pub fn train_mlp(
    name: &str,
    params: &MlpParams,
    x_train: &[Vec<f64>],
    y_train: &[Disposition],
    x_val: &[Vec<f64>],
    y_val: &[Disposition],
    seed: u64,
) -> Result<(MlpClassifier, MlpHistory)> {
    if x_train.is_empty() || x_train.len() != y_train.len() || x_val.len() != y_val.len() {
        return Err(TrainerError::Dataset(format!(
            "{name}: {} training rows for {} labels, {} validation rows for {} labels",
            x_train.len(),
            y_train.len(),
            x_val.len(),
            y_val.len()
        )));
    }
    let input_dim = x_train[0].len();
    check_width(x_train, input_dim)?;
    check_width(x_val, input_dim)?;

    let mut rng = StdRng::seed_from_u64(seed);
    let mut network = Network::build(input_dim, params, &mut rng);
    let mut indices: Vec<usize> = (0..x_train.len()).collect();
    let mut lr = params.learning_rate;

    let mut history = MlpHistory {
        epochs_run: 0,
        best_epoch: 0,
        best_val_loss: None,
        final_learning_rate: lr,
        lr_reductions: 0,
        train_loss: Vec::new(),
        val_loss: Vec::new(),
    };
    let mut best_model: Option<MlpClassifier> = None;
    let mut wait = 0usize;
    let mut plateau_best = f64::INFINITY;
    let mut plateau_wait = 0usize;

    for epoch in 0..params.epochs {
        indices.shuffle(&mut rng);
        let mut epoch_loss = 0.0;
        for batch in indices.chunks(params.batch_size) {
            let rows: Vec<Vec<f64>> = batch.iter().map(|&i| x_train[i].clone()).collect();
            let labels: Vec<Disposition> = batch.iter().map(|&i| y_train[i]).collect();
            let batch_loss = network.train_batch(rows, &labels, lr, &mut rng);
            epoch_loss += batch_loss * batch.len() as f64 / x_train.len() as f64;
        }
        history.epochs_run = epoch + 1;
        history.train_loss.push(epoch_loss);
        if !epoch_loss.is_finite() {
            return Err(TrainerError::Training(format!(
                "{name}: training loss diverged at epoch {epoch}"
            )));
        }

        if y_val.is_empty() {
            continue;
        }
        let current = network.to_classifier();
        let val_loss = log_loss(y_val, &current.predict_proba(x_val)?);
        history.val_loss.push(val_loss);
        debug!(
            "{} epoch {}: loss {:.5}, val_loss {:.5}, lr {:.2e}",
            name, epoch, epoch_loss, val_loss, lr
        );

        if history.best_val_loss.map_or(true, |best| val_loss < best) {
            history.best_val_loss = Some(val_loss);
            history.best_epoch = epoch;
            best_model = Some(current);
            wait = 0;
        } else {
            wait += 1;
            if wait >= params.patience {
                info!(
                    "{} early stopping at epoch {} (best epoch {}, val_loss {:.5})",
                    name,
                    epoch + 1,
                    history.best_epoch + 1,
                    history.best_val_loss.unwrap_or(val_loss)
                );
                break;
            }
        }

        if let Some(schedule) = &params.reduce_lr {
            if val_loss < plateau_best - PLATEAU_MIN_DELTA {
                plateau_best = val_loss;
                plateau_wait = 0;
            } else {
                plateau_wait += 1;
                if plateau_wait >= schedule.patience && lr > schedule.min_lr {
                    let reduced = (lr * schedule.factor).max(schedule.min_lr);
                    info!(
                        "{} reducing learning rate {:.2e} -> {:.2e} at epoch {}",
                        name,
                        lr,
                        reduced,
                        epoch + 1
                    );
                    lr = reduced;
                    history.lr_reductions += 1;
                    plateau_wait = 0;
                }
            }
        }
    }
    history.final_learning_rate = lr;

    let model = match best_model {
        Some(model) => model,
        None => {
            history.best_epoch = history.epochs_run.saturating_sub(1);
            network.to_classifier()
        }
    };
    model
        .validate()
        .map_err(|e| TrainerError::Training(format!("{name}: {e}")))?;
    info!(
        "{} trained for {} epochs, architecture {:?}",
        name,
        history.epochs_run,
        model.architecture()
    );
    Ok((model, history))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HiddenLayer;
    use exo_ai_core::metrics::accuracy_score;

    fn clusters(per_class: usize, seed: u64) -> (Vec<Vec<f64>>, Vec<Disposition>) {
        let centers = [(-3.0, 0.0), (0.0, 3.0), (3.0, 0.0)];
        let mut rng = StdRng::seed_from_u64(seed);
        let mut x = Vec::new();
        let mut y = Vec::new();
        for (class, (cx, cy)) in centers.iter().enumerate() {
            for _ in 0..per_class {
                x.push(vec![
                    cx + rng.gen_range(-0.5..0.5),
                    cy + rng.gen_range(-0.5..0.5),
                ]);
                y.push(Disposition::from_index(class).unwrap());
            }
        }
        (x, y)
    }

    fn small_params() -> MlpParams {
        MlpParams {
            hidden: vec![HiddenLayer::new(8, true, 0.0), HiddenLayer::new(8, false, 0.1)],
            learning_rate: 0.01,
            batch_size: 8,
            epochs: 60,
            patience: 60,
            ..MlpParams::base()
        }
    }

    #[test]
    fn separable_clusters_are_learned() {
        let (x, y) = clusters(20, 1);
        let (x_val, y_val) = clusters(5, 2);
        let (model, history) = train_mlp("test", &small_params(), &x, &y, &x_val, &y_val, 7).unwrap();

        assert_eq!(model.architecture(), vec![2, 8, 8, 3]);
        assert!(model.layers[0].batch_norm.is_some());
        let predicted: Vec<Disposition> = model
            .predict(&x)
            .unwrap()
            .into_iter()
            .map(|i| Disposition::from_index(i).unwrap())
            .collect();
        assert!(accuracy_score(&y, &predicted) > 0.9);
        assert!(history.best_val_loss.unwrap() < 1.0);
        for p in model.predict_proba(&x_val).unwrap() {
            assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn same_seed_same_network() {
        let (x, y) = clusters(10, 3);
        let params = MlpParams {
            epochs: 5,
            ..small_params()
        };
        let (a, _) = train_mlp("a", &params, &x, &y, &x, &y, 11).unwrap();
        let (b, _) = train_mlp("b", &params, &x, &y, &x, &y, 11).unwrap();
        let (c, _) = train_mlp("c", &params, &x, &y, &x, &y, 12).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn contradicting_validation_stops_early() {
        let (x, y) = clusters(10, 4);
        // validation labels rotated by one class
        let y_val: Vec<Disposition> = y
            .iter()
            .map(|d| Disposition::from_index((d.index() + 1) % N_CLASSES).unwrap())
            .collect();
        let params = MlpParams {
            epochs: 200,
            patience: 3,
            reduce_lr: Some(crate::config::LrSchedule {
                factor: 0.5,
                patience: 1,
                min_lr: 1e-6,
            }),
            ..small_params()
        };
        let (_, history) = train_mlp("test", &params, &x, &y, &x, &y_val, 5).unwrap();
        assert!(history.epochs_run < 200);
        assert_eq!(history.epochs_run, history.best_epoch + 1 + params.patience);
        assert!(history.lr_reductions >= 1);
        assert!(history.final_learning_rate < params.learning_rate);
    }

    #[test]
    fn empty_training_set_is_rejected() {
        let err = train_mlp("test", &MlpParams::meta(), &[], &[], &[], &[], 1).unwrap_err();
        assert!(matches!(err, TrainerError::Dataset(_)));
    }
}
