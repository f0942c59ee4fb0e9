//! Forecast Combiner & Smoother
//!
//! Adds the mean and volatility forecasts, keeps the last K combined
//! forecasts in a fixed K x H matrix and averages it column-wise. The matrix
//! starts zero-filled, so the first K-1 averages are pulled toward zero.

use crate::error::{MonitorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Elementwise sum of mean and volatility forecasts.
pub fn combine(mean: &[f64], volatility: &[f64]) -> Result<Vec<f64>> {
    if mean.len() != volatility.len() {
        return Err(MonitorError::InvalidInput(format!(
            "forecast horizons differ: mean {} vs volatility {}",
            mean.len(),
            volatility.len()
        )));
    }
    Ok(mean.iter().zip(volatility).map(|(m, v)| m + v).collect())
}

/// Fixed-size ring of forecast rows, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastMatrix {
    rows: VecDeque<Vec<f64>>,
    horizon: usize,
    filled: usize,
}

impl ForecastMatrix {
    /// `k` zero rows of length `horizon`.
    pub fn new(k: usize, horizon: usize) -> Self {
        let k = k.max(1);
        Self {
            rows: std::iter::repeat_n(vec![0.0; horizon], k).collect(),
            horizon,
            filled: 0,
        }
    }

    /// Evict the oldest row and append `row`; returns the evicted row.
    pub fn push(&mut self, row: &[f64]) -> Result<Vec<f64>> {
        if row.len() != self.horizon {
            return Err(MonitorError::InvalidInput(format!(
                "forecast row has {} values, matrix horizon is {}",
                row.len(),
                self.horizon
            )));
        }
        let evicted = self.rows.pop_front().unwrap_or_default();
        self.rows.push_back(row.to_vec());
        self.filled = (self.filled + 1).min(self.rows.len());
        Ok(evicted)
    }

    /// Mean of each column across all K rows (zero rows included).
    pub fn column_means(&self) -> Vec<f64> {
        let k = self.rows.len() as f64;
        let mut means = vec![0.0; self.horizon];
        for row in &self.rows {
            for (acc, v) in means.iter_mut().zip(row) {
                *acc += v;
            }
        }
        means.iter_mut().for_each(|m| *m /= k);
        means
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.rows.iter().map(Vec::as_slice)
    }

    pub fn k(&self) -> usize {
        self.rows.len()
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// Rows holding real forecasts rather than the initial zero fill
    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn is_warm(&self) -> bool {
        self.filled == self.rows.len()
    }
}

/// Rolling matrix plus a bounded history of its column means.
#[derive(Debug, Clone)]
pub struct ForecastSmoother {
    matrix: ForecastMatrix,
    history: VecDeque<Vec<f64>>,
    history_capacity: usize,
    total_updates: u64,
}

impl ForecastSmoother {
    pub fn new(k: usize, horizon: usize, history_capacity: usize) -> Self {
        Self {
            matrix: ForecastMatrix::new(k, horizon),
            history: VecDeque::new(),
            history_capacity: history_capacity.max(1),
            total_updates: 0,
        }
    }

    /// Roll the matrix by one row and return the new column means.
    pub fn roll_and_average(&mut self, combined: &[f64]) -> Result<Vec<f64>> {
        self.matrix.push(combined)?;
        let average = self.matrix.column_means();
        if self.history.len() >= self.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(average.clone());
        self.total_updates += 1;
        Ok(average)
    }

    pub fn matrix(&self) -> &ForecastMatrix {
        &self.matrix
    }

    /// Averaged forecasts, oldest first; at most `history_capacity` entries
    pub fn history(&self) -> &VecDeque<Vec<f64>> {
        &self.history
    }

    pub fn latest_average(&self) -> Option<&[f64]> {
        self.history.back().map(Vec::as_slice)
    }

    pub fn total_updates(&self) -> u64 {
        self.total_updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(v: f64) -> Vec<f64> {
        vec![v; 10]
    }

    #[test]
    fn test_combine_sums_elementwise() {
        let out = combine(&[1.0, -2.0, 0.5], &[0.25, 0.5, 0.75]).unwrap();
        assert_eq!(out, vec![1.25, -1.5, 1.25]);
        assert!(combine(&[1.0], &[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_matrix_shape_invariant() {
        let mut m = ForecastMatrix::new(10, 10);
        assert_eq!(m.k(), 10);
        for i in 0..37 {
            m.push(&row(i as f64)).unwrap();
            assert_eq!(m.k(), 10);
            assert!(m.rows().all(|r| r.len() == 10));
        }
        assert!(m.is_warm());
    }

    #[test]
    fn test_fifo_eviction() {
        let mut m = ForecastMatrix::new(10, 10);
        for i in 0..10 {
            m.push(&row(i as f64)).unwrap();
        }
        // row pushed K updates ago is the oldest and goes next
        let evicted = m.push(&row(10.0)).unwrap();
        assert_eq!(evicted, row(0.0));
        assert!(m.rows().all(|r| r[0] != 0.0));
        let firsts: Vec<f64> = m.rows().map(|r| r[0]).collect();
        assert_eq!(firsts, (1..=10).map(|i| i as f64).collect::<Vec<_>>());
    }

    #[test]
    fn test_early_averages_biased_toward_zero() {
        let mut s = ForecastSmoother::new(10, 10, 100);
        let first = s.roll_and_average(&row(5.0)).unwrap();
        assert_eq!(first, row(0.5));
        assert_eq!(s.matrix().filled(), 1);
        assert!(!s.matrix().is_warm());

        for _ in 1..10 {
            s.roll_and_average(&row(5.0)).unwrap();
        }
        assert_eq!(s.latest_average().unwrap(), row(5.0).as_slice());
        assert!(s.matrix().is_warm());

        let averages: Vec<f64> = s.history().iter().map(|a| a[0]).collect();
        let expected: Vec<f64> = (1..=10).map(|i| 0.5 * i as f64).collect();
        for (a, e) in averages.iter().zip(&expected) {
            assert!((a - e).abs() < 1e-12);
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let mut s = ForecastSmoother::new(2, 3, 4);
        for i in 0..9 {
            s.roll_and_average(&[i as f64; 3]).unwrap();
        }
        assert_eq!(s.history().len(), 4);
        assert_eq!(s.total_updates(), 9);
        // mean of rows 7 and 8
        assert_eq!(s.latest_average().unwrap(), &[7.5, 7.5, 7.5]);
    }

    #[test]
    fn test_wrong_horizon_rejected() {
        let mut s = ForecastSmoother::new(10, 10, 10);
        assert!(s.roll_and_average(&[1.0; 3]).is_err());
        assert_eq!(s.total_updates(), 0);
        assert!(s.history().is_empty());
    }
}
