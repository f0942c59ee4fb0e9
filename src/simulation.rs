//! Synthetic cognitive-load source for tests and demos.
//!
//! AR(1) fluctuation around a level plus Gaussian noise, with optional
//! spikes, level shifts and measurement dropouts (reported as `0.0`).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

#[derive(Debug, Clone)]
pub struct SyntheticLoad {
    rng: StdRng,
    level: f64,
    phi: f64,
    innovation_sd: f64,
    noise_sd: f64,
    state: f64,
    index: usize,
    spikes: Vec<(usize, f64)>,
    shifts: Vec<(usize, f64)>,
    dropout_rate: f64,
}

impl SyntheticLoad {
    /// Level 5.0, AR coefficient 0.6, innovation sd 0.3, noise sd 0.1.
    pub fn new(seed: u64) -> Self {
        Self::with_params(seed, 5.0, 0.6, 0.3, 0.1)
    }

    pub fn with_params(seed: u64, level: f64, phi: f64, innovation_sd: f64, noise_sd: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            level,
            phi: phi.clamp(-0.99, 0.99),
            innovation_sd: innovation_sd.abs(),
            noise_sd: noise_sd.abs(),
            state: 0.0,
            index: 0,
            spikes: Vec::new(),
            shifts: Vec::new(),
            dropout_rate: 0.0,
        }
    }

    /// Add `magnitude` to the sample at `index` only.
    pub fn with_spike(mut self, index: usize, magnitude: f64) -> Self {
        self.spikes.push((index, magnitude));
        self
    }

    /// Add `delta` to every sample from `index` on.
    pub fn with_level_shift(mut self, index: usize, delta: f64) -> Self {
        self.shifts.push((index, delta));
        self
    }

    /// Emit `0.0` ("no measurement") with probability `rate`.
    pub fn with_dropouts(mut self, rate: f64) -> Self {
        self.dropout_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn take_vec(&mut self, n: usize) -> Vec<f64> {
        self.by_ref().take(n).collect()
    }

    /// Samples produced so far
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Iterator for SyntheticLoad {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        let i = self.index;
        self.index += 1;

        let shock: f64 = self.rng.sample(StandardNormal);
        let noise: f64 = self.rng.sample(StandardNormal);
        self.state = self.phi * self.state + self.innovation_sd * shock;
        let dropped = self.dropout_rate > 0.0 && self.rng.random_bool(self.dropout_rate);
        if dropped {
            return Some(0.0);
        }

        let mut value = self.level + self.state + self.noise_sd * noise;
        value += self
            .shifts
            .iter()
            .filter(|(at, _)| i >= *at)
            .map(|(_, d)| d)
            .sum::<f64>();
        value += self
            .spikes
            .iter()
            .filter(|(at, _)| i == *at)
            .map(|(_, m)| m)
            .sum::<f64>();
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_runs_repeat() {
        let a = SyntheticLoad::new(9).take_vec(50);
        let b = SyntheticLoad::new(9).take_vec(50);
        assert_eq!(a, b);
        assert_ne!(a, SyntheticLoad::new(10).take_vec(50));
    }

    #[test]
    fn test_spike_and_shift_are_injected() {
        let plain = SyntheticLoad::new(1).take_vec(300);
        let shaped = SyntheticLoad::new(1)
            .with_spike(100, 8.0)
            .with_level_shift(200, 3.0)
            .take_vec(300);

        assert!((shaped[100] - plain[100] - 8.0).abs() < 1e-12);
        assert!((shaped[99] - plain[99]).abs() < 1e-12);
        assert!((shaped[250] - plain[250] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_dropouts_are_zero() {
        let values = SyntheticLoad::new(3).with_dropouts(0.2).take_vec(1000);
        let zeros = values.iter().filter(|v| **v == 0.0).count();
        assert!(zeros > 100 && zeros < 300, "zeros = {}", zeros);
    }
}
