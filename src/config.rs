//! Engine configuration.
//!
//! Every section has a `Default` matching the reference deployment
//! (window of 120 samples, horizon 10, re-selection every 41 updates,
//! baseline after 500 observations) and can be overridden from JSON.

use crate::error::{MonitorError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Mean-dynamics (ARMA) engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmaConfig {
    /// Sliding window length the model is refitted on
    pub window: usize,
    /// Smallest p and q in the order grid
    pub min_order: usize,
    /// Largest p and q in the order grid (inclusive)
    pub max_order: usize,
    /// Order re-selection period, in updates
    pub reselect_every: u32,
    /// Forecast horizon H
    pub horizon: usize,
    /// |forecast| at or above this (in standardized units) is an outlier
    pub outlier_sigma: f64,
    pub max_iters: u64,
    /// Deadline for one refit. Periodic re-selection shares this deadline
    /// across its whole grid, so it never holds the worker longer than a refit.
    pub fit_timeout_ms: u64,
    /// Budget for the initial grid search at warm-up
    pub selection_timeout_ms: u64,
}

impl Default for ArmaConfig {
    fn default() -> Self {
        Self {
            window: 120,
            min_order: 2,
            max_order: 5,
            reselect_every: 41,
            horizon: 10,
            outlier_sigma: 2.0,
            max_iters: 400,
            fit_timeout_ms: 250,
            selection_timeout_ms: 2000,
        }
    }
}

impl ArmaConfig {
    pub fn fit_timeout(&self) -> Duration {
        Duration::from_millis(self.fit_timeout_ms)
    }

    pub fn selection_timeout(&self) -> Duration {
        Duration::from_millis(self.selection_timeout_ms)
    }
}

/// Volatility (GARCH) engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GarchConfig {
    pub max_iters: u64,
    pub fit_timeout_ms: u64,
    pub min_observations: usize,
}

impl Default for GarchConfig {
    fn default() -> Self {
        Self {
            max_iters: 300,
            fit_timeout_ms: 250,
            min_observations: 20,
        }
    }
}

impl GarchConfig {
    pub fn fit_timeout(&self) -> Duration {
        Duration::from_millis(self.fit_timeout_ms)
    }
}

/// Forecast matrix / rolling average settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmootherConfig {
    /// Number of past forecasts K kept in the matrix
    pub rows: usize,
    /// Maximum retained averaged forecasts
    pub history_capacity: usize,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            rows: 10,
            history_capacity: 10_000,
        }
    }
}

/// Baseline establishment and periodic deviation checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    /// Observations needed before the baseline is frozen; also the check period
    pub threshold: usize,
    /// A load of exactly 0.0 means "no measurement" upstream
    pub skip_zero_loads: bool,
    pub shift_sigma: f64,
    pub spike_sigma: f64,
    pub trend_sigma: f64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            threshold: 500,
            skip_zero_loads: true,
            shift_sigma: 2.0,
            spike_sigma: 4.0,
            trend_sigma: 1.0,
        }
    }
}

/// Producer/consumer worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Pending samples held between acquisition and the worker
    pub queue_capacity: usize,
    /// Samples collected before the predictor is built; `None` uses `arma.window`
    pub warmup_samples: Option<usize>,
    /// Emit a backtest report every N forecasts (0 disables)
    pub backtest_every: u64,
    /// Retained standardized samples
    pub series_capacity: usize,
    pub idle_poll_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1,
            warmup_samples: None,
            backtest_every: 100,
            series_capacity: 10_000,
            idle_poll_ms: 100,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub arma: ArmaConfig,
    pub garch: GarchConfig,
    pub smoother: SmootherConfig,
    pub baseline: BaselineConfig,
    pub worker: WorkerConfig,
}

impl MonitorConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: MonitorConfig =
            serde_json::from_str(json).map_err(|e| MonitorError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            MonitorError::Config(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn warmup_samples(&self) -> usize {
        self.worker.warmup_samples.unwrap_or(self.arma.window)
    }

    pub fn validate(&self) -> Result<()> {
        let a = &self.arma;
        if a.min_order > a.max_order {
            return Err(MonitorError::Config(format!(
                "arma.min_order ({}) exceeds arma.max_order ({})",
                a.min_order, a.max_order
            )));
        }
        if a.horizon == 0 {
            return Err(MonitorError::Config("arma.horizon must be positive".into()));
        }
        if a.reselect_every == 0 {
            return Err(MonitorError::Config(
                "arma.reselect_every must be positive".into(),
            ));
        }
        let params = 2 * a.max_order + 2;
        if a.window < params + 10 {
            return Err(MonitorError::Config(format!(
                "arma.window ({}) too short for order {} (need at least {})",
                a.window,
                a.max_order,
                params + 10
            )));
        }
        if !(a.outlier_sigma.is_finite() && a.outlier_sigma > 0.0) {
            return Err(MonitorError::Config(
                "arma.outlier_sigma must be positive".into(),
            ));
        }
        if self.smoother.rows == 0 {
            return Err(MonitorError::Config("smoother.rows must be positive".into()));
        }
        if self.baseline.threshold == 0 {
            return Err(MonitorError::Config(
                "baseline.threshold must be positive".into(),
            ));
        }
        if self.worker.queue_capacity == 0 {
            return Err(MonitorError::Config(
                "worker.queue_capacity must be positive".into(),
            ));
        }
        if self.warmup_samples() < a.window {
            return Err(MonitorError::Config(format!(
                "worker.warmup_samples ({}) shorter than arma.window ({})",
                self.warmup_samples(),
                a.window
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.arma.reselect_every, 41);
        assert_eq!(config.arma.horizon, 10);
        assert_eq!(config.smoother.rows, 10);
        assert_eq!(config.baseline.threshold, 500);
        assert_eq!(config.warmup_samples(), 120);
    }

    #[test]
    fn test_partial_json_overrides() {
        let config = MonitorConfig::from_json_str(
            r#"{ "arma": { "window": 80, "max_order": 3 }, "baseline": { "threshold": 50 } }"#,
        )
        .unwrap();
        assert_eq!(config.arma.window, 80);
        assert_eq!(config.arma.max_order, 3);
        assert_eq!(config.arma.min_order, 2);
        assert_eq!(config.baseline.threshold, 50);
        assert!(config.baseline.skip_zero_loads);
    }

    #[test]
    fn test_rejects_inverted_grid() {
        let err = MonitorConfig::from_json_str(r#"{ "arma": { "min_order": 4, "max_order": 2 } }"#)
            .unwrap_err();
        assert!(matches!(err, MonitorError::Config(_)));
    }

    #[test]
    fn test_rejects_short_window() {
        let err = MonitorConfig::from_json_str(r#"{ "arma": { "window": 12 } }"#).unwrap_err();
        assert!(err.to_string().contains("too short"));
    }
}
