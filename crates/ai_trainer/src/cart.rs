//! CART (Classification and Regression Tree) builder
//!
//! Exact-greedy, depth-wise construction: at every node each candidate feature's
//! values are sorted and every boundary between distinct values is scored. The
//! threshold is the midpoint of the two neighbouring values.

use crate::boosting::TreeGrower;
use crate::deterministic::{best_of, leaf_weight, split_gain, SplitCandidate};
use exo_ai_core::gbdt::{Node, Tree};
use rayon::prelude::*;

/// Training parameters for a single tree
#[derive(Clone, Debug)]
pub struct TreeConfig {
    pub max_depth: usize,
    pub min_child_weight: f64,
    pub reg_lambda: f64,
    pub learning_rate: f64,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_depth: 6,
            min_child_weight: 1.0,
            reg_lambda: 1.0,
            learning_rate: 0.3,
        }
    }
}

/// Build regression trees using the exact-greedy CART algorithm
pub struct CartBuilder<'a> {
    config: TreeConfig,
    features: &'a [Vec<f64>],
}

impl<'a> CartBuilder<'a> {
    pub fn new(features: &'a [Vec<f64>], config: TreeConfig) -> Self {
        Self { config, features }
    }

    /// Recursively build tree nodes, returning the index of the subtree root
    #[allow(clippy::too_many_arguments)]
    fn build_node(
        &self,
        rows: &[usize],
        columns: &[usize],
        gradients: &[f64],
        hessians: &[f64],
        depth: usize,
        nodes: &mut Vec<Node>,
        node_id: usize,
    ) -> i32 {
        let current_idx = nodes.len() as i32;
        let (g, h) = sums(rows, gradients, hessians);
        let leaf_value = leaf_weight(g, h, self.config.reg_lambda, self.config.learning_rate);
        nodes.push(Node::leaf(current_idx, leaf_value));

        if depth >= self.config.max_depth || rows.len() < 2 {
            return current_idx;
        }
        let split = match self.find_best_split(rows, columns, gradients, hessians, node_id) {
            Some(s) if s.gain > 0.0 => s,
            _ => return current_idx,
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .partition(|&&r| self.features[r][split.feature_idx] <= split.threshold);

        let left = self.build_node(
            &left_rows,
            columns,
            gradients,
            hessians,
            depth + 1,
            nodes,
            node_id * 2 + 1,
        );
        let right = self.build_node(
            &right_rows,
            columns,
            gradients,
            hessians,
            depth + 1,
            nodes,
            node_id * 2 + 2,
        );
        nodes[current_idx as usize] = Node::internal(
            current_idx,
            split.feature_idx as i32,
            split.threshold,
            left,
            right,
        );
        current_idx
    }

    /// Best split over all candidate columns; columns are scanned in parallel
    fn find_best_split(
        &self,
        rows: &[usize],
        columns: &[usize],
        gradients: &[f64],
        hessians: &[f64],
        node_id: usize,
    ) -> Option<SplitCandidate> {
        columns
            .par_iter()
            .map(|&feature_idx| {
                self.best_split_for_feature(rows, feature_idx, gradients, hessians, node_id)
            })
            .reduce(|| None, best_of)
    }

    fn best_split_for_feature(
        &self,
        rows: &[usize],
        feature_idx: usize,
        gradients: &[f64],
        hessians: &[f64],
        node_id: usize,
    ) -> Option<SplitCandidate> {
        let mut sorted: Vec<(f64, f64, f64)> = rows
            .iter()
            .map(|&r| (self.features[r][feature_idx], gradients[r], hessians[r]))
            .collect();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

        let (g_total, h_total) = sorted
            .iter()
            .fold((0.0, 0.0), |(g, h), s| (g + s.1, h + s.2));
        let min_weight = self.config.min_child_weight;

        let mut best: Option<SplitCandidate> = None;
        let (mut g_left, mut h_left) = (0.0, 0.0);
        for i in 0..sorted.len() - 1 {
            g_left += sorted[i].1;
            h_left += sorted[i].2;
            if sorted[i].0 == sorted[i + 1].0 {
                continue;
            }
            let h_right = h_total - h_left;
            if h_left < min_weight || h_right < min_weight {
                continue;
            }
            let gain = split_gain(
                g_left,
                h_left,
                g_total - g_left,
                h_right,
                self.config.reg_lambda,
            );
            let threshold = sorted[i].0 + (sorted[i + 1].0 - sorted[i].0) / 2.0;
            let candidate = SplitCandidate::new(feature_idx, threshold, gain, i, node_id);
            best = best_of(best, Some(candidate));
        }
        best
    }
}

impl TreeGrower for CartBuilder<'_> {
    fn grow(&self, rows: &[usize], features: &[usize], gradients: &[f64], hessians: &[f64]) -> Tree {
        let mut nodes = Vec::new();
        self.build_node(rows, features, gradients, hessians, 0, &mut nodes, 0);
        Tree::new(nodes)
    }
}

fn sums(rows: &[usize], gradients: &[f64], hessians: &[f64]) -> (f64, f64) {
    rows.iter()
        .fold((0.0, 0.0), |(g, h), &r| (g + gradients[r], h + hessians[r]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_depth: usize) -> TreeConfig {
        TreeConfig {
            max_depth,
            min_child_weight: 0.0,
            reg_lambda: 0.0,
            learning_rate: 1.0,
        }
    }

    #[test]
    fn test_simple_tree() {
        let features = vec![vec![1.0, 5.0], vec![2.0, 5.0], vec![3.0, 5.0], vec![4.0, 5.0]];
        let gradients = vec![-1.0, -1.0, 1.0, 1.0];
        let hessians = vec![1.0; 4];

        let builder = CartBuilder::new(&features, config(2));
        let tree = builder.grow(&[0, 1, 2, 3], &[0, 1], &gradients, &hessians);
        tree.validate(2).unwrap();

        let root = &tree.nodes[0];
        assert_eq!(root.feature_idx, 0);
        assert_eq!(root.threshold, 2.5);
        assert_eq!(tree.evaluate(&[1.5, 0.0]), 1.0);
        assert_eq!(tree.evaluate(&[3.5, 0.0]), -1.0);
    }

    #[test]
    fn test_leaf_only_tree() {
        let features = vec![vec![1.0]];
        let builder = CartBuilder::new(&features, TreeConfig::default());
        let tree = builder.grow(&[0], &[0], &[-1.0], &[1.0]);

        assert_eq!(tree.nodes.len(), 1);
        assert!(tree.nodes[0].is_leaf());
    }

    #[test]
    fn constant_feature_cannot_split() {
        let features = vec![vec![7.0]; 4];
        let builder = CartBuilder::new(&features, config(3));
        let tree = builder.grow(&[0, 1, 2, 3], &[0], &[-1.0, 1.0, -1.0, 1.0], &[1.0; 4]);
        assert_eq!(tree.num_leaves(), 1);
    }

    #[test]
    fn excluded_columns_are_never_used() {
        let features = vec![vec![1.0, 10.0], vec![2.0, 20.0], vec![3.0, 30.0], vec![4.0, 40.0]];
        let builder = CartBuilder::new(&features, config(3));
        let tree = builder.grow(&[0, 1, 2, 3], &[1], &[-1.0, -1.0, 1.0, 1.0], &[1.0; 4]);
        assert!(tree
            .nodes
            .iter()
            .filter(|n| !n.is_leaf())
            .all(|n| n.feature_idx == 1));
    }

    #[test]
    fn min_child_weight_blocks_thin_splits() {
        let features = vec![vec![1.0], vec![2.0], vec![3.0]];
        let builder = CartBuilder::new(
            &features,
            TreeConfig {
                min_child_weight: 2.0,
                ..config(3)
            },
        );
        let tree = builder.grow(&[0, 1, 2], &[0], &[-1.0, 0.0, 1.0], &[1.0; 3]);
        // every split leaves one side with hessian 1
        assert_eq!(tree.num_leaves(), 1);
    }
}
