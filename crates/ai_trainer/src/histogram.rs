//! Histogram-based tree growth
//!
//! Feature values are quantized once into at most `max_bin` bins per feature.
//! Trees then grow leaf-wise: the leaf with the largest split gain is expanded
//! next, until `num_leaves` is reached or no leaf can be split. Split search only
//! scans per-bin gradient sums, which makes it independent of the row count.

use crate::boosting::TreeGrower;
use crate::deterministic::{leaf_weight, split_gain, SplitCandidate};
use exo_ai_core::gbdt::{Node, Tree};
use rayon::prelude::*;

/// Per-feature bin boundaries fitted on the training matrix.
///
/// A value falls into bin `i` when it is greater than `bounds[i - 1]` and at most
/// `bounds[i]`; the last bin is open above. Splitting after bin `b` is therefore the
/// same as the tree test `x <= bounds[b]`.
#[derive(Debug, Clone, PartialEq)]
pub struct BinMapper {
    bounds: Vec<Vec<f64>>,
}

impl BinMapper {
    pub fn fit(rows: &[Vec<f64>], max_bin: usize) -> Self {
        let feature_count = rows.first().map_or(0, Vec::len);
        let bounds = (0..feature_count)
            .into_par_iter()
            .map(|f| {
                let mut values: Vec<f64> = rows.iter().map(|r| r[f]).collect();
                values.sort_by(f64::total_cmp);
                feature_bounds(&values, max_bin.max(2))
            })
            .collect();
        Self { bounds }
    }

    pub fn feature_count(&self) -> usize {
        self.bounds.len()
    }

    pub fn num_bins(&self, feature: usize) -> usize {
        self.bounds[feature].len() + 1
    }

    pub fn bin(&self, feature: usize, value: f64) -> u16 {
        self.bounds[feature].partition_point(|b| *b < value) as u16
    }

    /// Upper boundary of `bin`, used as the split threshold
    pub fn threshold(&self, feature: usize, bin: usize) -> f64 {
        self.bounds[feature][bin]
    }

    /// Column-major bin indices for every row
    pub fn transform(&self, rows: &[Vec<f64>]) -> Vec<Vec<u16>> {
        (0..self.feature_count())
            .into_par_iter()
            .map(|f| rows.iter().map(|r| self.bin(f, r[f])).collect())
            .collect()
    }
}

/// Midpoints between distinct values, or between quantile cut points when there
/// are more distinct values than bins
fn feature_bounds(sorted: &[f64], max_bin: usize) -> Vec<f64> {
    let mut distinct: Vec<f64> = sorted.to_vec();
    distinct.dedup();
    if distinct.len() <= 1 {
        return Vec::new();
    }
    let cuts: Vec<f64> = if distinct.len() <= max_bin {
        distinct
    } else {
        let n = sorted.len();
        let mut cuts: Vec<f64> = (1..max_bin)
            .map(|q| sorted[(q * n / max_bin).min(n - 1)])
            .collect();
        cuts.dedup();
        cuts
    };
    cuts.windows(2).map(|w| w[0] + (w[1] - w[0]) / 2.0).collect()
}

#[derive(Clone, Debug)]
pub struct HistogramConfig {
    pub max_depth: usize,
    pub num_leaves: usize,
    pub min_child_samples: usize,
    pub min_child_weight: f64,
    pub reg_lambda: f64,
    pub learning_rate: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct BinStats {
    gradient: f64,
    hessian: f64,
    count: usize,
}

/// A leaf waiting to be expanded
struct OpenLeaf {
    node: usize,
    rows: Vec<usize>,
    depth: usize,
    split: Option<SplitCandidate>,
    bin: usize,
}

pub struct HistogramBuilder<'a> {
    config: HistogramConfig,
    mapper: &'a BinMapper,
    /// Column-major bins of the training matrix
    binned: &'a [Vec<u16>],
}

impl<'a> HistogramBuilder<'a> {
    pub fn new(mapper: &'a BinMapper, binned: &'a [Vec<u16>], config: HistogramConfig) -> Self {
        Self {
            config,
            mapper,
            binned,
        }
    }

    fn leaf_value(&self, rows: &[usize], gradients: &[f64], hessians: &[f64]) -> f64 {
        let (g, h) = rows
            .iter()
            .fold((0.0, 0.0), |(g, h), &r| (g + gradients[r], h + hessians[r]));
        leaf_weight(g, h, self.config.reg_lambda, self.config.learning_rate)
    }

    /// Best (split, bin) for a leaf, or None when the leaf must stay a leaf
    fn find_best_split(
        &self,
        rows: &[usize],
        depth: usize,
        columns: &[usize],
        gradients: &[f64],
        hessians: &[f64],
        node_id: usize,
    ) -> Option<(SplitCandidate, usize)> {
        if depth >= self.config.max_depth || rows.len() < 2 * self.config.min_child_samples {
            return None;
        }
        columns
            .par_iter()
            .map(|&f| self.best_split_for_feature(rows, f, gradients, hessians, node_id))
            .reduce(
                || None,
                |a, b| match (a, b) {
                    (Some(a), Some(b)) => Some(if b.0.beats(&a.0) { b } else { a }),
                    (a, None) => a,
                    (None, b) => b,
                },
            )
            .filter(|(split, _)| split.gain > 0.0)
    }

    fn best_split_for_feature(
        &self,
        rows: &[usize],
        feature: usize,
        gradients: &[f64],
        hessians: &[f64],
        node_id: usize,
    ) -> Option<(SplitCandidate, usize)> {
        let n_bins = self.mapper.num_bins(feature);
        if n_bins < 2 {
            return None;
        }
        let bins = &self.binned[feature];
        let mut histogram = vec![BinStats::default(); n_bins];
        for &r in rows {
            let stats = &mut histogram[bins[r] as usize];
            stats.gradient += gradients[r];
            stats.hessian += hessians[r];
            stats.count += 1;
        }
        let total = histogram.iter().fold(BinStats::default(), |acc, s| BinStats {
            gradient: acc.gradient + s.gradient,
            hessian: acc.hessian + s.hessian,
            count: acc.count + s.count,
        });

        let mut best: Option<SplitCandidate> = None;
        let mut best_bin = 0;
        let mut left = BinStats::default();
        for (bin, stats) in histogram.iter().enumerate().take(n_bins - 1) {
            left.gradient += stats.gradient;
            left.hessian += stats.hessian;
            left.count += stats.count;
            if stats.count == 0 {
                continue;
            }
            let right_count = total.count - left.count;
            let right_hessian = total.hessian - left.hessian;
            if left.count < self.config.min_child_samples
                || right_count < self.config.min_child_samples
                || left.hessian < self.config.min_child_weight
                || right_hessian < self.config.min_child_weight
            {
                continue;
            }
            let gain = split_gain(
                left.gradient,
                left.hessian,
                total.gradient - left.gradient,
                right_hessian,
                self.config.reg_lambda,
            );
            let candidate = SplitCandidate::new(
                feature,
                self.mapper.threshold(feature, bin),
                gain,
                bin,
                node_id,
            );
            if best.map_or(true, |b| candidate.beats(&b)) {
                best = Some(candidate);
                best_bin = bin;
            }
        }
        best.map(|b| (b, best_bin))
    }
}

impl TreeGrower for HistogramBuilder<'_> {
    fn grow(&self, rows: &[usize], features: &[usize], gradients: &[f64], hessians: &[f64]) -> Tree {
        let mut nodes = vec![Node::leaf(0, self.leaf_value(rows, gradients, hessians))];
        let root_split = self.find_best_split(rows, 0, features, gradients, hessians, 0);
        let mut open = vec![OpenLeaf {
            node: 0,
            rows: rows.to_vec(),
            depth: 0,
            split: root_split.map(|s| s.0),
            bin: root_split.map_or(0, |s| s.1),
        }];
        let mut leaves = 1;

        while leaves < self.config.num_leaves {
            // highest gain first; equal gains go to the earlier node
            let Some(pick) = open
                .iter()
                .enumerate()
                .filter_map(|(i, leaf)| leaf.split.map(|s| (i, s)))
                .reduce(|a, b| if b.1.beats(&a.1) { b } else { a })
                .map(|(i, _)| i)
            else {
                break;
            };
            let leaf = open.swap_remove(pick);
            let Some(split) = leaf.split else { break };

            let bins = &self.binned[split.feature_idx];
            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
                leaf.rows.iter().partition(|&&r| (bins[r] as usize) <= leaf.bin);

            let left_idx = nodes.len();
            let right_idx = left_idx + 1;
            nodes.push(Node::leaf(
                left_idx as i32,
                self.leaf_value(&left_rows, gradients, hessians),
            ));
            nodes.push(Node::leaf(
                right_idx as i32,
                self.leaf_value(&right_rows, gradients, hessians),
            ));
            nodes[leaf.node] = Node::internal(
                leaf.node as i32,
                split.feature_idx as i32,
                split.threshold,
                left_idx as i32,
                right_idx as i32,
            );
            leaves += 1;

            for (node, child_rows) in [(left_idx, left_rows), (right_idx, right_rows)] {
                let found = self.find_best_split(
                    &child_rows,
                    leaf.depth + 1,
                    features,
                    gradients,
                    hessians,
                    node,
                );
                open.push(OpenLeaf {
                    node,
                    rows: child_rows,
                    depth: leaf.depth + 1,
                    split: found.map(|s| s.0),
                    bin: found.map_or(0, |s| s.1),
                });
            }
        }
        Tree::new(nodes)
    }
}
