use serde::{Deserialize, Serialize};

/// Exponentially weighted mean and variance of a stream.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Ewma {
    alpha: f64,
    mean: f64,
    variance: f64,
    count: u64,
}

impl Ewma {
    /// Weight of a sample halves after `half_life` further samples.
    pub fn with_half_life(half_life: f64) -> Self {
        let half_life = half_life.max(f64::MIN_POSITIVE);
        Self::with_alpha(1.0 - (-std::f64::consts::LN_2 / half_life).exp())
    }

    pub fn with_alpha(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(f64::MIN_POSITIVE, 1.0),
            mean: 0.0,
            variance: 0.0,
            count: 0,
        }
    }

    /// Fold in a sample and return the updated mean. The first sample
    /// seeds the mean directly.
    pub fn update(&mut self, sample: f64) -> f64 {
        if self.count == 0 {
            self.mean = sample;
            self.variance = 0.0;
        } else {
            let diff = sample - self.mean;
            self.mean += self.alpha * diff;
            self.variance = (1.0 - self.alpha) * (self.variance + self.alpha * diff * diff);
        }
        self.count += 1;
        self.mean
    }

    /// `None` until the first sample
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }

    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_life_weighting() {
        let ewma = Ewma::with_half_life(10.0);
        let remaining = (1.0 - ewma.alpha()).powi(10);
        assert!((remaining - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_tracks_level_change() {
        let mut ewma = Ewma::with_alpha(0.2);
        assert_eq!(ewma.mean(), None);
        for _ in 0..10 {
            ewma.update(1.0);
        }
        assert_eq!(ewma.mean(), Some(1.0));
        assert_eq!(ewma.std_dev(), 0.0);

        for _ in 0..60 {
            ewma.update(3.0);
        }
        let mean = ewma.mean().unwrap();
        assert!((mean - 3.0).abs() < 1e-4, "mean = {}", mean);
        assert_eq!(ewma.count(), 70);
    }
}
