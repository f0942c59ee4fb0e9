//! Baseline & Outlier Classifier
//!
//! Counts incoming cognitive-load observations, freezes a reference baseline
//! once `threshold` of them have been seen and then, every further
//! `threshold` observations, compares the most recent `threshold` values
//! against it.
//!
//! Only the last `threshold` values are retained: the baseline is computed
//! from the first `threshold` observations and every check looks at the last
//! `threshold`, which are the same ring contents at those two moments.

use crate::config::BaselineConfig;
use crate::error::{MonitorError, Result};
use crate::metrics;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Scale factor making the MAD a consistent estimator of a normal stddev
const MAD_SCALE: f64 = 1.4826;

/// Frozen reference the later windows are compared against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub reference_center: f64,
    /// Always > 0
    pub reference_spread: f64,
    /// Observation count at which the baseline was frozen
    pub established_at: u64,
}

/// Computes a baseline from a history of observations.
pub trait ReferenceEstimator: Send {
    fn estimate(&self, history: &[f64]) -> Result<Baseline>;
}

/// Median center, 1.4826 x MAD spread (stddev when the MAD collapses).
#[derive(Debug, Clone, Copy, Default)]
pub struct MedianMad;

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        0.5 * (sorted[mid - 1] + sorted[mid])
    } else {
        sorted[mid]
    }
}

impl ReferenceEstimator for MedianMad {
    fn estimate(&self, history: &[f64]) -> Result<Baseline> {
        if history.is_empty() {
            return Err(MonitorError::InvalidInput(
                "cannot establish a baseline from no observations".into(),
            ));
        }
        let center = median(history);
        let deviations: Vec<f64> = history.iter().map(|x| (x - center).abs()).collect();
        let mut spread = MAD_SCALE * median(&deviations);

        if spread <= f64::EPSILON * center.abs().max(1.0) {
            let n = history.len() as f64;
            let mean = history.iter().sum::<f64>() / n;
            spread = (history.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n).sqrt();
        }
        if !(spread.is_finite() && spread > f64::EPSILON * center.abs().max(1.0)) {
            return Err(MonitorError::InvalidInput(format!(
                "baseline spread is degenerate ({})",
                spread
            )));
        }

        Ok(Baseline {
            reference_center: center,
            reference_spread: spread,
            established_at: history.len() as u64,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Rising,
    Falling,
    Steady,
}

/// Outcome of one periodic comparison against the baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviationVerdict {
    /// (median(window) - center) / spread
    pub center_shift: f64,
    /// Signed largest |x - center| / spread
    pub peak_deviation: f64,
    /// Position of the peak inside the window
    pub peak_index: usize,
    /// Least-squares rise across the window, in spreads
    pub trend: f64,
    pub direction: Direction,
    pub significant: bool,
    pub window_len: usize,
    /// Observation count at which the check ran
    pub checked_at: u64,
}

/// Classifies a window of observations relative to a baseline.
pub trait DirectionPredictor: Send {
    fn assess(&self, window: &[f64], baseline: &Baseline) -> DeviationVerdict;
}

#[derive(Debug, Clone, Copy)]
pub struct BaselineDeviation {
    pub shift_sigma: f64,
    pub spike_sigma: f64,
    pub trend_sigma: f64,
}

impl Default for BaselineDeviation {
    fn default() -> Self {
        Self::from_config(&BaselineConfig::default())
    }
}

impl BaselineDeviation {
    pub fn from_config(config: &BaselineConfig) -> Self {
        Self {
            shift_sigma: config.shift_sigma,
            spike_sigma: config.spike_sigma,
            trend_sigma: config.trend_sigma,
        }
    }
}

/// OLS slope of `values` against 0..n
fn slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = values.iter().sum::<f64>() / n as f64;
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    num / den
}

impl DirectionPredictor for BaselineDeviation {
    fn assess(&self, window: &[f64], baseline: &Baseline) -> DeviationVerdict {
        let center = baseline.reference_center;
        let spread = baseline.reference_spread;

        let center_shift = if window.is_empty() {
            0.0
        } else {
            (median(window) - center) / spread
        };

        let (peak_index, peak_deviation) = window
            .iter()
            .map(|x| (x - center) / spread)
            .enumerate()
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .unwrap_or((0, 0.0));

        let trend = if window.len() < 2 {
            0.0
        } else {
            slope(window) * (window.len() - 1) as f64 / spread
        };

        let direction = if trend >= self.trend_sigma {
            Direction::Rising
        } else if trend <= -self.trend_sigma {
            Direction::Falling
        } else {
            Direction::Steady
        };

        DeviationVerdict {
            center_shift,
            peak_deviation,
            peak_index,
            trend,
            direction,
            significant: center_shift.abs() >= self.shift_sigma
                || peak_deviation.abs() >= self.spike_sigma,
            window_len: window.len(),
            checked_at: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineState {
    Uninitialized,
    Accumulating,
    BaselineEstablished,
    Monitoring,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BaselineEvent {
    Established(Baseline),
    Deviation(DeviationVerdict),
}

pub struct BaselineTracker<E: ReferenceEstimator = MedianMad, D: DirectionPredictor = BaselineDeviation> {
    config: BaselineConfig,
    estimator: E,
    predictor: D,
    recent: VecDeque<f64>,
    count: u64,
    skipped: u64,
    baseline: Option<Baseline>,
    state: BaselineState,
}

impl BaselineTracker {
    pub fn new(config: BaselineConfig) -> Self {
        let predictor = BaselineDeviation::from_config(&config);
        Self::with_components(config, MedianMad, predictor)
    }
}

impl<E: ReferenceEstimator, D: DirectionPredictor> BaselineTracker<E, D> {
    pub fn with_components(config: BaselineConfig, estimator: E, predictor: D) -> Self {
        let threshold = config.threshold.max(1);
        Self {
            config: BaselineConfig {
                threshold,
                ..config
            },
            estimator,
            predictor,
            recent: VecDeque::with_capacity(threshold),
            count: 0,
            skipped: 0,
            baseline: None,
            state: BaselineState::Uninitialized,
        }
    }

    /// Record one observation and return whatever it triggered.
    pub fn observe(&mut self, value: f64) -> Result<Vec<BaselineEvent>> {
        if !value.is_finite() {
            return Err(MonitorError::InvalidInput(format!(
                "cognitive load {} is not finite",
                value
            )));
        }
        if value == 0.0 && self.config.skip_zero_loads {
            self.skipped += 1;
            return Ok(Vec::new());
        }

        let threshold = self.config.threshold;
        if self.recent.len() >= threshold {
            self.recent.pop_front();
        }
        self.recent.push_back(value);
        self.count += 1;
        if self.state == BaselineState::Uninitialized {
            self.state = BaselineState::Accumulating;
        }

        let mut events = Vec::new();
        if self.baseline.is_none() && self.count >= threshold as u64 {
            match self.estimator.estimate(self.recent.make_contiguous()) {
                Ok(mut baseline) => {
                    baseline.established_at = self.count;
                    info!(
                        center = baseline.reference_center,
                        spread = baseline.reference_spread,
                        count = self.count,
                        "Baseline established"
                    );
                    self.baseline = Some(baseline);
                    self.state = BaselineState::BaselineEstablished;
                    events.push(BaselineEvent::Established(baseline));
                }
                Err(e) => warn!(
                    count = self.count,
                    error = %e,
                    "Baseline estimation failed; retrying on next observation"
                ),
            }
        }

        let threshold = threshold as u64;
        if self.count > threshold && self.count % threshold == 0 {
            match self.baseline {
                Some(baseline) => {
                    let mut verdict = self.predictor.assess(self.recent.make_contiguous(), &baseline);
                    verdict.checked_at = self.count;
                    metrics::DEVIATION_CHECKS.inc();
                    debug!(
                        count = self.count,
                        shift = verdict.center_shift,
                        peak = verdict.peak_deviation,
                        significant = verdict.significant,
                        "Deviation check"
                    );
                    self.state = BaselineState::Monitoring;
                    events.push(BaselineEvent::Deviation(verdict));
                }
                None => debug!(count = self.count, "Deviation check skipped; no baseline yet"),
            }
        }

        Ok(events)
    }

    pub fn baseline(&self) -> Option<&Baseline> {
        self.baseline.as_ref()
    }

    pub fn state(&self) -> BaselineState {
        self.state
    }

    /// Accepted observations
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Zero loads ignored as "no measurement"
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Last `threshold` accepted observations, oldest first
    pub fn recent(&self) -> &VecDeque<f64> {
        &self.recent
    }

    pub fn config(&self) -> &BaselineConfig {
        &self.config
    }
}
