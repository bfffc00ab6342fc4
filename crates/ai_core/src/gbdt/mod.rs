//! Gradient boosted tree classifiers
//!
//! One tree per class per boosting round; a row's raw score for class `k` is the
//! class base score plus the sum of the class-`k` trees, and probabilities are the
//! softmax of the raw scores. Exact-greedy and histogram trainers both emit this
//! format, recorded in `BoostingKind`.

pub mod model;
pub mod tree;

pub use model::{BoostingKind, GbdtClassifier};
pub use tree::{Node, Tree};
