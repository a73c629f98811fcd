//! Shared seeded generator.
//!
//! One ChaCha8 stream per device drives both synthetic spectrum content and
//! random fault decisions, so a fixed seed replays a whole simulated scan.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Thread-safe, optionally seeded ChaCha8 generator.
pub struct MockRng {
    inner: Mutex<ChaCha8Rng>,
    seed: Option<u64>,
}

impl MockRng {
    /// `None` seeds from the OS.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = seed.map_or_else(ChaCha8Rng::from_entropy, ChaCha8Rng::seed_from_u64);
        Self {
            inner: Mutex::new(rng),
            seed,
        }
    }

    /// Seed in use, if any.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Bernoulli trial; rates outside `(0, 1)` never draw.
    pub fn should_fail(&self, rate: f64) -> bool {
        if rate.is_nan() || rate <= 0.0 {
            false
        } else if rate >= 1.0 {
            true
        } else {
            self.inner.lock().gen_bool(rate)
        }
    }

    /// Uniform draw in `[0, max)`, zero for a non-positive `max`.
    pub fn uniform(&self, max: f64) -> f64 {
        if max > 0.0 {
            self.inner.lock().gen_range(0.0..max)
        } else {
            0.0
        }
    }

    /// `count` samples of noise in `[-amplitude, amplitude)`, drawn under one lock.
    pub fn noise(&self, count: usize, amplitude: f64) -> Vec<f64> {
        if amplitude <= 0.0 {
            return vec![0.0; count];
        }
        let mut rng = self.inner.lock();
        (0..count)
            .map(|_| rng.gen_range(-amplitude..amplitude))
            .collect()
    }
}

impl Default for MockRng {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for MockRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRng").field("seed", &self.seed).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_stream() {
        let a = MockRng::new(Some(42));
        let b = MockRng::new(Some(42));
        assert_eq!(a.noise(16, 5.0), b.noise(16, 5.0));
        assert_eq!(a.uniform(0.3), b.uniform(0.3));
        assert_eq!(a.seed(), Some(42));
    }

    #[test]
    fn test_should_fail_edges_and_rate() {
        let rng = MockRng::new(Some(3));
        assert!(!rng.should_fail(0.0));
        assert!(!rng.should_fail(f64::NAN));
        assert!(rng.should_fail(1.0));

        let failures = (0..10_000).filter(|_| rng.should_fail(0.3)).count();
        assert!((2700..3300).contains(&failures), "got {failures}");
    }

    #[test]
    fn test_ranges() {
        let rng = MockRng::new(Some(7));
        assert!((0..100).all(|_| (0.0..0.3).contains(&rng.uniform(0.3))));
        assert!(rng.noise(100, 2.0).iter().all(|v| (-2.0..2.0).contains(v)));
        assert_eq!(rng.uniform(0.0), 0.0);
        assert_eq!(rng.noise(3, 0.0), vec![0.0; 3]);
    }
}
