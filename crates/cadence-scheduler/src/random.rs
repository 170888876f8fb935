//! Injectable randomness for schedule jitter and backoff jitter.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of uniform random numbers.
pub trait RandomSource: Send + Sync {
    /// Uniform integer in `[low, high]` (inclusive). Returns `low` when `high <= low`.
    fn int_in(&self, low: i64, high: i64) -> i64;

    /// Uniform float in `[low, high]`. Returns `low` when `high <= low`.
    fn float_in(&self, low: f64, high: f64) -> f64;
}

/// Thread-local OS-seeded generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn int_in(&self, low: i64, high: i64) -> i64 {
        if high <= low {
            return low;
        }
        rand::rng().random_range(low..=high)
    }

    fn float_in(&self, low: f64, high: f64) -> f64 {
        if high <= low {
            return low;
        }
        rand::rng().random_range(low..=high)
    }
}

/// Reproducible generator seeded from a `u64`.
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn int_in(&self, low: i64, high: i64) -> i64 {
        if high <= low {
            return low;
        }
        let mut rng = self.rng.lock().expect("seeded rng poisoned");
        rng.random_range(low..=high)
    }

    fn float_in(&self, low: f64, high: f64) -> f64 {
        if high <= low {
            return low;
        }
        let mut rng = self.rng.lock().expect("seeded rng poisoned");
        rng.random_range(low..=high)
    }
}

/// Always returns the same values, clamped into the requested range.
///
/// Used for deterministic tests and for `plan`-style dry runs.
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom {
    pub int: i64,
    pub float: f64,
}

impl FixedRandom {
    pub fn new(int: i64, float: f64) -> Self {
        Self { int, float }
    }

    /// Zero offset and zero jitter.
    pub fn zero() -> Self {
        Self::new(0, 0.0)
    }
}

impl RandomSource for FixedRandom {
    fn int_in(&self, low: i64, high: i64) -> i64 {
        if high <= low {
            return low;
        }
        self.int.clamp(low, high)
    }

    fn float_in(&self, low: f64, high: f64) -> f64 {
        if high <= low {
            return low;
        }
        self.float.clamp(low, high)
    }
}
