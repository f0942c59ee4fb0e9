use crate::error::{MonitorError, Result};
use serde::{Deserialize, Serialize};

/// Fixed z-score transform computed once from an initial batch.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Standardizer {
    mean: f64,
    stddev: f64,
}

impl Standardizer {
    /// Population mean/stddev of `batch`. Constant batches are rejected.
    pub fn from_batch(batch: &[f64]) -> Result<Self> {
        if batch.is_empty() {
            return Err(MonitorError::InvalidInput(
                "standardization batch is empty".into(),
            ));
        }
        if let Some(pos) = batch.iter().position(|x| !x.is_finite()) {
            return Err(MonitorError::InvalidInput(format!(
                "standardization batch has a non-finite value at index {}",
                pos
            )));
        }

        let n = batch.len() as f64;
        let mean = batch.iter().sum::<f64>() / n;
        let variance = batch.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        let stddev = variance.sqrt();

        // Relative floor: a batch like [1e9, 1e9 + 1e-9] is constant in f64 terms.
        let scale = mean.abs().max(1.0);
        if !(stddev > f64::EPSILON * scale) {
            return Err(MonitorError::InvalidInput(format!(
                "standardization batch has zero spread (mean {:.6})",
                mean
            )));
        }

        Ok(Self { mean, stddev })
    }

    #[inline]
    pub fn standardize(&self, raw: f64) -> f64 {
        (raw - self.mean) / self.stddev
    }

    /// Like [`standardize`](Self::standardize) but rejects NaN and
    /// infinities, including finite samples that overflow once scaled.
    pub fn standardize_checked(&self, raw: f64) -> Result<f64> {
        if !raw.is_finite() {
            return Err(MonitorError::InvalidInput(format!(
                "non-finite sample: {}",
                raw
            )));
        }
        let z = self.standardize(raw);
        if !z.is_finite() {
            return Err(MonitorError::InvalidInput(format!(
                "sample {} overflows when standardized",
                raw
            )));
        }
        Ok(z)
    }

    pub fn standardize_all(&self, batch: &[f64]) -> Vec<f64> {
        batch.iter().map(|&x| self.standardize(x)).collect()
    }

    #[inline]
    pub fn inverse(&self, standardized: f64) -> f64 {
        standardized * self.stddev + self.mean
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn stddev(&self) -> f64 {
        self.stddev
    }
}
