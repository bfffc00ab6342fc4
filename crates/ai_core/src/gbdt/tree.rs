//! Regression trees used by the boosted classifiers
//!
//! Nodes live in a flat vector with node 0 as the root. Traversal goes left when
//! `feature <= threshold`, which is the same rule the trainers use when they
//! partition rows.

use serde::{Deserialize, Serialize};

/// A decision tree node (internal or leaf)
///
/// Internal nodes have `feature_idx >= 0` and valid child indices; leaves have
/// `feature_idx == -1`, children `-1` and a `leaf` value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    /// Node ID (for reference, not used in traversal)
    pub id: i32,

    /// Left child index (-1 for leaf nodes)
    pub left: i32,

    /// Right child index (-1 for leaf nodes)
    pub right: i32,

    /// Feature index to split on (-1 for leaf nodes)
    pub feature_idx: i32,

    /// Split threshold in scaled feature units
    pub threshold: f64,

    /// Raw-score contribution, learning rate already applied
    pub leaf: Option<f64>,
}

impl Node {
    pub fn internal(id: i32, feature_idx: i32, threshold: f64, left: i32, right: i32) -> Self {
        Self {
            id,
            left,
            right,
            feature_idx,
            threshold,
            leaf: None,
        }
    }

    pub fn leaf(id: i32, value: f64) -> Self {
        Self {
            id,
            left: -1,
            right: -1,
            feature_idx: -1,
            threshold: 0.0,
            leaf: Some(value),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.feature_idx == -1 || self.leaf.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Tree {
    /// Tree nodes (node 0 is the root)
    pub nodes: Vec<Node>,
}

impl Tree {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    /// Single-leaf tree
    pub fn constant(value: f64) -> Self {
        Self::new(vec![Node::leaf(0, value)])
    }

    /// Leaf value reached by `features`. Call `validate` first; a malformed tree
    /// evaluates to 0.0.
    pub fn evaluate(&self, features: &[f64]) -> f64 {
        let mut idx = 0usize;
        loop {
            let Some(node) = self.nodes.get(idx) else {
                return 0.0;
            };
            if node.is_leaf() {
                return node.leaf.unwrap_or(0.0);
            }
            let Some(value) = features.get(node.feature_idx as usize) else {
                return 0.0;
            };
            let next = if *value <= node.threshold {
                node.left
            } else {
                node.right
            };
            if next < 0 {
                return 0.0;
            }
            idx = next as usize;
        }
    }

    pub fn num_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match nodes.get(idx) {
                Some(node) if !node.is_leaf() => {
                    1 + walk(nodes, node.left as usize).max(walk(nodes, node.right as usize))
                }
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }

    /// Check child links, feature indices and leaf values.
    ///
    /// Children must point forward, which rules out cycles.
    pub fn validate(&self, feature_count: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("Tree has no nodes".to_string());
        }
        let n = self.nodes.len() as i32;
        for (i, node) in self.nodes.iter().enumerate() {
            let i = i as i32;
            if node.is_leaf() {
                match node.leaf {
                    Some(v) if v.is_finite() => {}
                    _ => return Err(format!("Leaf node {i} has no finite leaf value")),
                }
                continue;
            }
            for (side, child) in [("left", node.left), ("right", node.right)] {
                if child <= i || child >= n {
                    return Err(format!("Node {i} has invalid {side} child: {child}"));
                }
            }
            if node.feature_idx < 0 || node.feature_idx as usize >= feature_count {
                return Err(format!(
                    "Internal node {} has invalid feature index: {}",
                    i, node.feature_idx
                ));
            }
            if !node.threshold.is_finite() {
                return Err(format!("Internal node {i} has a non-finite threshold"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stump() -> Tree {
        Tree::new(vec![
            Node::internal(0, 0, 0.5, 1, 2),
            Node::leaf(1, -1.0),
            Node::leaf(2, 2.0),
        ])
    }

    #[test]
    fn test_tree_evaluation() {
        let tree = stump();
        assert_eq!(tree.evaluate(&[0.0]), -1.0);
        assert_eq!(tree.evaluate(&[0.5]), -1.0); // equal goes left
        assert_eq!(tree.evaluate(&[0.6]), 2.0);
        assert_eq!(tree.num_leaves(), 2);
        assert_eq!(tree.depth(), 1);
    }

    #[test]
    fn test_tree_validation() {
        assert!(stump().validate(1).is_ok());
        assert!(stump().validate(0).is_err());

        let backwards = Tree::new(vec![
            Node::internal(0, 0, 0.5, 0, 2),
            Node::leaf(1, 1.0),
            Node::leaf(2, 2.0),
        ]);
        assert!(backwards.validate(1).is_err());
        assert!(Tree::new(vec![]).validate(1).is_err());
    }
}
