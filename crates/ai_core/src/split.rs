//! Two-stage stratified train/test/cv partitioning
//!
//! Stage one separates train from a combined holdout pool of size
//! `ceil((test + cv) * n)`; stage two splits that pool into cv (`ceil` of its relative
//! share) and test. At each stage the partition size is spread over the classes by
//! largest remainder, ties going to the lower class index, so every partition keeps
//! the class balance of the whole dataset. Rows are shuffled within each class by a
//! seeded LCG.

use crate::deterministic::LcgRng;
use crate::errors::{CoreError, Result};
use crate::types::{Disposition, N_CLASSES};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Allowed deviation of the ratio sum from 1.0
pub const RATIO_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitRatios {
    pub train: f64,
    pub test: f64,
    pub cv: f64,
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self {
            train: 0.70,
            test: 0.15,
            cv: 0.15,
        }
    }
}

impl SplitRatios {
    /// Every ratio strictly positive and finite, and the sum within `RATIO_TOLERANCE` of 1.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("train", self.train), ("test", self.test), ("cv", self.cv)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(CoreError::SplitConfig(format!(
                    "{name} ratio must be a positive number, got {value}"
                )));
            }
        }
        let sum = self.train + self.test + self.cv;
        if (sum - 1.0).abs() > RATIO_TOLERANCE {
            return Err(CoreError::SplitConfig(format!(
                "ratios must sum to 1.0, got {sum}"
            )));
        }
        Ok(())
    }
}

/// Row indices of each partition, ascending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
    pub cv: Vec<usize>,
}

/// The three aligned partitions produced by one split
#[derive(Debug, Clone, PartialEq)]
pub struct ModelData {
    pub x_train: Vec<Vec<f64>>,
    pub y_train: Vec<Disposition>,
    pub x_test: Vec<Vec<f64>>,
    pub y_test: Vec<Disposition>,
    pub x_cv: Vec<Vec<f64>>,
    pub y_cv: Vec<Disposition>,
    pub feature_names: Vec<String>,
}

impl ModelData {
    pub fn total_rows(&self) -> usize {
        self.y_train.len() + self.y_test.len() + self.y_cv.len()
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }
}

/// Rows per class, in encoding order
pub fn class_counts(labels: &[Disposition]) -> [usize; N_CLASSES] {
    let mut counts = [0; N_CLASSES];
    for label in labels {
        counts[label.index()] += 1;
    }
    counts
}

/// Spread `total` over `counts` proportionally using largest remainder.
fn allocate(counts: &[usize; N_CLASSES], total: usize) -> [usize; N_CLASSES] {
    let n: usize = counts.iter().sum();
    let mut out = [0; N_CLASSES];
    if n == 0 {
        return out;
    }
    let mut remainders: Vec<(usize, usize)> = Vec::with_capacity(N_CLASSES);
    for (class, &count) in counts.iter().enumerate() {
        let scaled = count * total;
        out[class] = scaled / n;
        remainders.push((scaled % n, class));
    }
    let assigned: usize = out.iter().sum();
    // Larger remainder first, lower class index on ties.
    remainders.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    for (_, class) in remainders.into_iter().take(total - assigned) {
        out[class] += 1;
    }
    out
}

/// Compute the partition of `labels` without touching any feature data.
pub fn stratified_indices(
    labels: &[Disposition],
    ratios: &SplitRatios,
    seed: u64,
) -> Result<SplitIndices> {
    ratios.validate()?;
    let n = labels.len();
    if n == 0 {
        return Err(CoreError::EmptyDataset("nothing to split".to_string()));
    }

    let counts = class_counts(labels);
    let holdout_fraction = ratios.test + ratios.cv;
    let n_holdout = ((holdout_fraction * n as f64).ceil() as usize).min(n);
    let holdout = allocate(&counts, n_holdout);

    let cv_fraction = ratios.cv / holdout_fraction;
    let n_cv = ((cv_fraction * n_holdout as f64).ceil() as usize).min(n_holdout);
    let cv = allocate(&holdout, n_cv);

    for class in Disposition::ALL {
        let c = class.index();
        if counts[c] == 0 {
            continue;
        }
        let per_partition = [
            ("train", counts[c] - holdout[c]),
            ("test", holdout[c] - cv[c]),
            ("cv", cv[c]),
        ];
        if let Some((partition, _)) = per_partition.iter().find(|(_, size)| *size == 0) {
            return Err(CoreError::Stratification {
                class: class.class_name().to_string(),
                count: counts[c],
                partition: partition.to_string(),
            });
        }
    }

    let mut rng = LcgRng::new(seed);
    let mut holdout_rng = rng.fork();
    let mut split = SplitIndices {
        train: Vec::with_capacity(n - n_holdout),
        test: Vec::with_capacity(n_holdout - n_cv),
        cv: Vec::with_capacity(n_cv),
    };
    for class in Disposition::ALL {
        let c = class.index();
        let mut members: Vec<usize> = (0..n).filter(|&i| labels[i] == class).collect();
        rng.shuffle(&mut members);
        let mut pool = members.split_off(members.len() - holdout[c]);
        split.train.extend(members);

        holdout_rng.shuffle(&mut pool);
        let test_part = pool.split_off(cv[c]);
        split.cv.extend(pool);
        split.test.extend(test_part);
    }
    split.train.sort_unstable();
    split.test.sort_unstable();
    split.cv.sort_unstable();

    debug!(
        "Split {} rows into train {}, test {}, cv {}",
        n,
        split.train.len(),
        split.test.len(),
        split.cv.len()
    );
    Ok(split)
}

fn gather<T: Clone>(items: &[T], indices: &[usize]) -> Vec<T> {
    indices.iter().map(|&i| items[i].clone()).collect()
}

/// Stratified split of a row-major feature matrix and its labels.
pub fn stratified_split(
    features: &[Vec<f64>],
    labels: &[Disposition],
    feature_names: &[String],
    ratios: &SplitRatios,
    seed: u64,
) -> Result<ModelData> {
    ratios.validate()?;
    if features.len() != labels.len() {
        return Err(CoreError::Schema(format!(
            "{} feature rows but {} labels",
            features.len(),
            labels.len()
        )));
    }
    let indices = stratified_indices(labels, ratios, seed)?;

    let data = ModelData {
        x_train: gather(features, &indices.train),
        y_train: gather(labels, &indices.train),
        x_test: gather(features, &indices.test),
        y_test: gather(labels, &indices.test),
        x_cv: gather(features, &indices.cv),
        y_cv: gather(labels, &indices.cv),
        feature_names: feature_names.to_vec(),
    };
    for (name, y) in [
        ("train", &data.y_train),
        ("test", &data.y_test),
        ("cv", &data.y_cv),
    ] {
        info!(
            "{} partition: {} rows, class distribution {:?}",
            name,
            y.len(),
            class_counts(y)
        );
    }
    Ok(data)
}
