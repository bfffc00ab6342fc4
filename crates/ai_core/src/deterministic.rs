//! Deterministic utilities for reproducible splitting and sampling
//!
//! A seeded LCG drives every shuffle and row/column sample in the pipeline, so a
//! fixed seed reproduces identical partitions and models across platforms.

use std::num::Wrapping;

/// Linear Congruential Generator (glibc constants)
#[derive(Clone, Debug)]
pub struct LcgRng {
    state: Wrapping<u64>,
}

impl LcgRng {
    const MULTIPLIER: u64 = 1103515245;
    const INCREMENT: u64 = 12345;
    const MODULUS: u64 = 1 << 31;

    pub fn new(seed: u64) -> Self {
        Self {
            state: Wrapping(seed % Self::MODULUS),
        }
    }

    /// Next value in [0, 2^31)
    pub fn next_u31(&mut self) -> u64 {
        self.state = self.state * Wrapping(Self::MULTIPLIER) + Wrapping(Self::INCREMENT);
        self.state.0 & (Self::MODULUS - 1)
    }

    /// Uniform value in [0, max); 0 when max is 0
    pub fn next_range(&mut self, max: usize) -> usize {
        if max == 0 {
            return 0;
        }
        (self.next_u31() % max as u64) as usize
    }

    /// Uniform value in [0.0, 1.0)
    pub fn next_f64(&mut self) -> f64 {
        self.next_u31() as f64 / Self::MODULUS as f64
    }

    /// Fisher-Yates shuffle in place
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.next_range(i + 1);
            items.swap(i, j);
        }
    }

    /// `count` distinct indices from `0..n`, returned in ascending order.
    pub fn sample_indices(&mut self, n: usize, count: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..n).collect();
        self.shuffle(&mut indices);
        indices.truncate(count.min(n));
        indices.sort_unstable();
        indices
    }

    /// Independent generator for a sub-task, derived from this one's stream.
    pub fn fork(&mut self) -> LcgRng {
        LcgRng::new(self.next_u31() ^ (self.next_u31() << 16))
    }
}
