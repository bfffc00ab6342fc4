//! Deterministic helpers shared by the trainers
//!
//! Split selection must not depend on thread scheduling: candidates are compared
//! by gain and then by a fixed tie-breaker, so the parallel search picks the same
//! split as a sequential one. Seeds for the individual learners are derived from
//! the run seed with a fixed mixing function.

/// Deterministic tie-breaker for split selection.
/// Orders by (feature_idx, position, node_id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SplitTieBreaker {
    pub feature_idx: usize,
    /// Sorted-value rank or bin index of the split point
    pub position: usize,
    pub node_id: usize,
}

impl SplitTieBreaker {
    pub fn new(feature_idx: usize, position: usize, node_id: usize) -> Self {
        Self {
            feature_idx,
            position,
            node_id,
        }
    }
}

/// A scored split point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitCandidate {
    pub feature_idx: usize,
    pub threshold: f64,
    pub gain: f64,
    pub tie_breaker: SplitTieBreaker,
}

impl SplitCandidate {
    pub fn new(feature_idx: usize, threshold: f64, gain: f64, position: usize, node_id: usize) -> Self {
        Self {
            feature_idx,
            threshold,
            gain,
            tie_breaker: SplitTieBreaker::new(feature_idx, position, node_id),
        }
    }

    /// Higher gain wins; equal gains fall back to the tie-breaker.
    pub fn beats(&self, other: &SplitCandidate) -> bool {
        self.gain > other.gain || (self.gain == other.gain && self.tie_breaker < other.tie_breaker)
    }
}

/// Keep the better of two optional candidates
pub fn best_of(a: Option<SplitCandidate>, b: Option<SplitCandidate>) -> Option<SplitCandidate> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if b.beats(&a) { b } else { a }),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Second-order split gain with L2 regularization on the leaf weights
pub fn split_gain(g_left: f64, h_left: f64, g_right: f64, h_right: f64, lambda: f64) -> f64 {
    let score = |g: f64, h: f64| g * g / (h + lambda);
    0.5 * (score(g_left, h_left) + score(g_right, h_right)
        - score(g_left + g_right, h_left + h_right))
}

/// Newton step `-G / (H + lambda)` scaled by the learning rate
pub fn leaf_weight(g: f64, h: f64, lambda: f64, learning_rate: f64) -> f64 {
    let denom = h + lambda;
    if denom <= 0.0 {
        return 0.0;
    }
    -g / denom * learning_rate
}

/// Derive an independent seed for stream `stream` of a run (splitmix64 finalizer).
pub fn mix_seed(seed: u64, stream: u64) -> u64 {
    let mut z = seed.wrapping_add(stream.wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
