//! Multiclass gradient boosting driver
//!
//! Softmax boosting with one regression tree per class per round. Raw scores start
//! at the log class priors; every round fits each class tree to the gradient
//! `p - y` and hessian `c * p * (1 - p)` of the cross-entropy loss. Rows are
//! subsampled per round and features per tree from a seeded LCG. Training stops once
//! the validation multi-logloss has not improved for `early_stopping_rounds`, and the
//! model is truncated to its best round.
//!
//! Tree growth is pluggable: `cart` grows exact-greedy depth-wise trees,
//! `histogram` grows leaf-wise trees over quantized bins.

use crate::config::GbdtParams;
use crate::errors::{Result, TrainerError};
use exo_ai_core::gbdt::Tree;
use exo_ai_core::metrics::log_loss;
use exo_ai_core::model::{check_width, softmax};
use exo_ai_core::{BoostingKind, Disposition, GbdtClassifier, LcgRng, N_CLASSES};
use rayon::prelude::*;
use tracing::{debug, info};

/// Rounds between progress lines
const LOG_EVERY: usize = 50;

/// Smallest hessian handed to a tree
const MIN_HESSIAN: f64 = 1e-16;

/// Fits one regression tree to per-row gradient statistics.
pub trait TreeGrower: Sync {
    /// Grow a tree over training rows `rows` (indices into the training matrix)
    /// using only the columns in `features`. `gradients` and `hessians` are indexed
    /// by row. Leaf values already include the learning rate.
    fn grow(&self, rows: &[usize], features: &[usize], gradients: &[f64], hessians: &[f64])
        -> Tree;
}

/// Hessian multiplier of the softmax objective for each boosting flavour
fn hessian_factor(kind: BoostingKind) -> f64 {
    match kind {
        BoostingKind::Exact => 2.0,
        BoostingKind::Histogram => N_CLASSES as f64 / (N_CLASSES as f64 - 1.0),
    }
}

/// Log of each class frequency, the starting raw score
pub fn log_priors(labels: &[Disposition]) -> Vec<f64> {
    let mut counts = [0usize; N_CLASSES];
    for label in labels {
        counts[label.index()] += 1;
    }
    let n = labels.len().max(1) as f64;
    counts
        .iter()
        .map(|&c| (c as f64 / n).max(1e-15).ln())
        .collect()
}

fn add_tree(raw: &mut [Vec<f64>], x: &[Vec<f64>], tree: &Tree, class: usize) {
    raw.par_iter_mut()
        .zip(x.par_iter())
        .for_each(|(scores, row)| scores[class] += tree.evaluate(row));
}

fn mlogloss(labels: &[Disposition], raw: &[Vec<f64>]) -> f64 {
    let probabilities: Vec<Vec<f64>> = raw.par_iter().map(|r| softmax(r)).collect();
    log_loss(labels, &probabilities)
}

/// Train a boosted classifier, early-stopping on the validation set.
#[allow(clippy::too_many_arguments)]
pub fn boost<G: TreeGrower>(
    kind: BoostingKind,
    grower: &G,
    params: &GbdtParams,
    x_train: &[Vec<f64>],
    y_train: &[Disposition],
    x_val: &[Vec<f64>],
    y_val: &[Disposition],
    seed: u64,
) -> Result<GbdtClassifier> {
    let n = x_train.len();
    if n == 0 || n != y_train.len() || x_val.len() != y_val.len() {
        return Err(TrainerError::Dataset(format!(
            "{} training rows for {} labels, {} validation rows for {} labels",
            n,
            y_train.len(),
            x_val.len(),
            y_val.len()
        )));
    }
    let feature_count = x_train[0].len();
    check_width(x_train, feature_count)?;
    check_width(x_val, feature_count)?;

    let base_score = log_priors(y_train);
    let mut raw_train = vec![base_score.clone(); n];
    let mut raw_val = vec![base_score.clone(); x_val.len()];
    let factor = hessian_factor(kind);
    let mut rng = LcgRng::new(seed);

    let row_sample = ((params.subsample * n as f64).ceil() as usize).clamp(1, n);
    let col_sample =
        ((params.colsample_bytree * feature_count as f64).ceil() as usize).clamp(1, feature_count.max(1));

    let mut rounds: Vec<Vec<Tree>> = Vec::new();
    let mut best: Option<(usize, f64)> = None;

    for round in 0..params.n_estimators {
        let probabilities: Vec<Vec<f64>> = raw_train.par_iter().map(|r| softmax(r)).collect();
        let rows = if row_sample < n {
            rng.sample_indices(n, row_sample)
        } else {
            (0..n).collect()
        };

        let mut trees = Vec::with_capacity(N_CLASSES);
        for class in 0..N_CLASSES {
            let (gradients, hessians): (Vec<f64>, Vec<f64>) = probabilities
                .par_iter()
                .zip(y_train.par_iter())
                .map(|(p, y)| {
                    let target = if y.index() == class { 1.0 } else { 0.0 };
                    let pk = p[class];
                    (pk - target, (factor * pk * (1.0 - pk)).max(MIN_HESSIAN))
                })
                .unzip();
            let features = rng.sample_indices(feature_count, col_sample);
            let tree = grower.grow(&rows, &features, &gradients, &hessians);
            add_tree(&mut raw_train, x_train, &tree, class);
            add_tree(&mut raw_val, x_val, &tree, class);
            trees.push(tree);
        }
        rounds.push(trees);

        if y_val.is_empty() {
            continue;
        }
        let loss = mlogloss(y_val, &raw_val);
        if round % LOG_EVERY == 0 {
            debug!("[{}] {:?} cv mlogloss {:.5}", round, kind, loss);
        }
        match best {
            Some((_, best_loss)) if loss >= best_loss => {}
            _ => best = Some((round, loss)),
        }
        if let Some((best_round, _)) = best {
            if round - best_round >= params.early_stopping_rounds {
                debug!("{:?} stopped after round {}", kind, round);
                break;
            }
        }
    }

    let trained = rounds.len();
    let mut model = GbdtClassifier::new(kind, feature_count, base_score, rounds);
    if let Some((best_round, best_loss)) = best {
        model.rounds.truncate(best_round + 1);
        model.best_iteration = Some(best_round);
        info!(
            "{:?} boosting: best iteration {} (cv mlogloss {:.5}) of {} rounds trained",
            kind, best_round, best_loss, trained
        );
    } else {
        info!("{:?} boosting: {} rounds trained without validation", kind, trained);
    }
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Grows single-leaf trees holding the mean Newton step
    struct StumpGrower;

    impl TreeGrower for StumpGrower {
        fn grow(&self, rows: &[usize], _: &[usize], g: &[f64], h: &[f64]) -> Tree {
            let (sg, sh) = rows.iter().fold((0.0, 0.0), |(a, b), &r| (a + g[r], b + h[r]));
            Tree::constant(-sg / sh * 0.5)
        }
    }

    #[test]
    fn priors_follow_class_frequencies() {
        let labels = [
            Disposition::Confirmed,
            Disposition::Confirmed,
            Disposition::Candidate,
            Disposition::FalsePositive,
        ];
        let priors = log_priors(&labels);
        assert!((priors[2] - 0.5f64.ln()).abs() < 1e-12);
        assert!((priors[0] - 0.25f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn constant_trees_stop_early_and_truncate() {
        let x = vec![vec![0.0]; 6];
        let y = vec![
            Disposition::FalsePositive,
            Disposition::Candidate,
            Disposition::Confirmed,
            Disposition::Confirmed,
            Disposition::Candidate,
            Disposition::FalsePositive,
        ];
        let params = GbdtParams {
            n_estimators: 40,
            subsample: 1.0,
            colsample_bytree: 1.0,
            early_stopping_rounds: 3,
            ..GbdtParams::default()
        };
        let model = boost(BoostingKind::Exact, &StumpGrower, &params, &x, &y, &x, &y, 1).unwrap();
        // priors already match a balanced set, so no round improves on round 0
        assert_eq!(model.best_iteration, Some(0));
        assert_eq!(model.num_rounds(), 1);
        model.validate().unwrap();
    }

    #[test]
    fn mismatched_labels_are_rejected() {
        let x = vec![vec![0.0]; 3];
        let y = vec![Disposition::Confirmed; 2];
        let err = boost(
            BoostingKind::Histogram,
            &StumpGrower,
            &GbdtParams::default(),
            &x,
            &y,
            &x,
            &y,
            1,
        )
        .unwrap_err();
        assert!(matches!(err, TrainerError::Dataset(_)));
    }

    proptest! {
        #[test]
        fn softmax_of_priors_recovers_frequencies(picks in prop::collection::vec(0usize..3, 1..200)) {
            let labels: Vec<Disposition> = picks.iter().map(|&i| Disposition::ALL[i]).collect();
            let probs = softmax(&log_priors(&labels));
            let total: f64 = probs.iter().sum();
            prop_assert!((total - 1.0).abs() < 1e-9);
            for class in Disposition::ALL {
                let share = picks.iter().filter(|&&i| i == class.index()).count() as f64
                    / picks.len() as f64;
                prop_assert!((probs[class.index()] - share).abs() < 1e-9);
            }
        }
    }
}
