//! One-step-ahead scoring of the combined forecast against what actually
//! arrived next.

use crate::algo::ewma::Ewma;
use serde::{Deserialize, Serialize};

/// Half-life, in updates, of the smoothed absolute error
const ERROR_HALF_LIFE: f64 = 20.0;

/// Running forecast accuracy, in standardized units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub scored: u64,
    pub mae: f64,
    pub rmse: f64,
    /// Exponentially smoothed |error|
    pub smoothed_abs_error: f64,
    /// Share of errors within one standard deviation
    pub hit_rate: f64,
    pub last_error: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct Backtester {
    pending: Option<f64>,
    scored: u64,
    abs_sum: f64,
    sq_sum: f64,
    hits: u64,
    smoothed: Ewma,
    last_error: Option<f64>,
}

impl Default for Backtester {
    fn default() -> Self {
        Self::new()
    }
}

impl Backtester {
    pub fn new() -> Self {
        Self {
            pending: None,
            scored: 0,
            abs_sum: 0.0,
            sq_sum: 0.0,
            hits: 0,
            smoothed: Ewma::with_half_life(ERROR_HALF_LIFE),
            last_error: None,
        }
    }

    /// Score the pending one-step forecast against `actual`, then hold
    /// `next_forecast[0]` for the following update. Returns the error when
    /// a forecast was pending.
    pub fn record(&mut self, actual: f64, next_forecast: &[f64]) -> Option<f64> {
        let error = self.pending.map(|predicted| actual - predicted);
        if let Some(e) = error.filter(|e| e.is_finite()) {
            self.scored += 1;
            self.abs_sum += e.abs();
            self.sq_sum += e * e;
            if e.abs() <= 1.0 {
                self.hits += 1;
            }
            self.smoothed.update(e.abs());
            self.last_error = Some(e);
        }
        self.pending = next_forecast.first().copied();
        error
    }

    pub fn scored(&self) -> u64 {
        self.scored
    }

    pub fn report(&self) -> BacktestReport {
        let n = self.scored.max(1) as f64;
        BacktestReport {
            scored: self.scored,
            mae: self.abs_sum / n,
            rmse: (self.sq_sum / n).sqrt(),
            smoothed_abs_error: self.smoothed.mean().unwrap_or(0.0),
            hit_rate: self.hits as f64 / n,
            last_error: self.last_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scores_previous_forecast() {
        let mut bt = Backtester::new();
        assert_eq!(bt.record(0.0, &[1.0, 9.0]), None);
        assert_eq!(bt.record(1.5, &[2.0]), Some(0.5));
        assert_eq!(bt.record(-1.0, &[0.0]), Some(-3.0));

        let r = bt.report();
        assert_eq!(r.scored, 2);
        assert!((r.mae - 1.75).abs() < 1e-12);
        assert!((r.rmse - (9.25f64 / 2.0).sqrt()).abs() < 1e-12);
        assert!((r.hit_rate - 0.5).abs() < 1e-12);
        assert_eq!(r.last_error, Some(-3.0));
        assert!(r.smoothed_abs_error > 0.5 && r.smoothed_abs_error < 3.0);
    }

    #[test]
    fn test_empty_report() {
        let r = Backtester::default().report();
        assert_eq!(r.scored, 0);
        assert_eq!(r.mae, 0.0);
        assert_eq!(r.last_error, None);
    }
}
