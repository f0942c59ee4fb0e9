//! GARCH(1,1) Volatility Engine
//!
//! Constant-mean GARCH(1,1) over the ARMA residuals:
//!
//! ```text
//! eps_t     = r_t - mu
//! sigma2_t  = omega + alpha * eps_{t-1}^2 + beta * sigma2_{t-1}
//! ```
//!
//! Fitted by Gaussian maximum likelihood. The recursion is seeded with the
//! sample variance (backcast). Parameters are searched in an unconstrained
//! space mapped onto `omega > 0`, `alpha, beta >= 0`, `alpha + beta < 1`.

use crate::algo::optimizer::{self, FitBudget};
use crate::config::GarchConfig;
use crate::error::FitError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Upper bound on alpha + beta
const MAX_PERSISTENCE: f64 = 0.9999;

const VARIANCE_FLOOR: f64 = 1e-12;

/// Fitted GARCH(1,1) parameters and forecast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GarchFit {
    pub mu: f64,
    pub omega: f64,
    pub alpha: f64,
    pub beta: f64,
    pub log_likelihood: f64,
    /// Conditional variance at the last observation
    pub last_variance: f64,
    /// Demeaned last observation
    pub last_residual: f64,
    /// Conditional standard deviation for steps 1..=horizon
    pub forecast: Vec<f64>,
}

impl GarchFit {
    pub fn persistence(&self) -> f64 {
        self.alpha + self.beta
    }

    pub fn unconditional_variance(&self) -> f64 {
        self.omega / (1.0 - self.persistence())
    }

    /// Variance forecast for steps 1..=horizon.
    pub fn variance_path(&self, horizon: usize) -> Vec<f64> {
        let mut path = Vec::with_capacity(horizon);
        let mut var = self.omega
            + self.alpha * self.last_residual * self.last_residual
            + self.beta * self.last_variance;
        for _ in 0..horizon {
            path.push(var);
            var = self.omega + self.persistence() * var;
        }
        path
    }
}

/// Anything that can fit a volatility model to a residual series.
pub trait VolatilityModel: Send {
    fn fit(&self, series: &[f64], horizon: usize, budget: &FitBudget) -> Result<GarchFit, FitError>;
}

#[derive(Debug, Clone, Copy)]
pub struct Garch11 {
    min_observations: usize,
}

impl Default for Garch11 {
    fn default() -> Self {
        Self::new(GarchConfig::default().min_observations)
    }
}

#[inline]
fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[inline]
fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

/// theta = [mu, ln omega, logit(persistence / MAX), logit(alpha share)]
fn unpack(theta: &[f64]) -> (f64, f64, f64, f64) {
    let mu = theta[0];
    let omega = theta[1].exp();
    let persistence = MAX_PERSISTENCE * sigmoid(theta[2]);
    let share = sigmoid(theta[3]);
    (mu, omega, persistence * share, persistence * (1.0 - share))
}

/// Returns (log-likelihood, last conditional variance).
fn filter(series: &[f64], mu: f64, omega: f64, alpha: f64, beta: f64, backcast: f64) -> (f64, f64) {
    let mut var = backcast;
    let mut ll = 0.0;
    let mut prev_eps2 = backcast;
    for (t, r) in series.iter().enumerate() {
        if t > 0 {
            var = (omega + alpha * prev_eps2 + beta * var).max(VARIANCE_FLOOR);
        }
        let eps = r - mu;
        let eps2 = eps * eps;
        ll -= 0.5 * (LN_2PI + var.ln() + eps2 / var);
        prev_eps2 = eps2;
    }
    (ll, var)
}

impl Garch11 {
    pub fn new(min_observations: usize) -> Self {
        Self {
            min_observations: min_observations.max(5),
        }
    }
}

impl VolatilityModel for Garch11 {
    fn fit(&self, series: &[f64], horizon: usize, budget: &FitBudget) -> Result<GarchFit, FitError> {
        if series.len() < self.min_observations {
            return Err(FitError::InsufficientData {
                required: self.min_observations,
                actual: series.len(),
            });
        }
        if series.iter().any(|x| !x.is_finite()) {
            return Err(FitError::Degenerate("residuals contain non-finite values".into()));
        }

        let n = series.len() as f64;
        let mean = series.iter().sum::<f64>() / n;
        let variance = series.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        if variance <= VARIANCE_FLOOR {
            return Err(FitError::Degenerate("residual variance is zero".into()));
        }

        // alpha = 0.1, beta = 0.8 with omega matching the sample variance
        let start = [
            mean,
            (variance * 0.1).ln(),
            logit(0.9 / MAX_PERSISTENCE),
            logit(0.1 / 0.9),
        ];
        let step = [(0.1 * variance.sqrt()).max(1e-4), 0.5, 0.5, 0.5];

        let objective = |theta: &[f64]| {
            let (mu, omega, alpha, beta) = unpack(theta);
            -filter(series, mu, omega, alpha, beta, variance).0
        };

        let min = optimizer::minimize(objective, &start, &step, budget)?;
        let (mu, omega, alpha, beta) = unpack(&min.params);
        let (log_likelihood, last_variance) = filter(series, mu, omega, alpha, beta, variance);
        if !log_likelihood.is_finite() {
            return Err(FitError::NonConvergence(
                "GARCH likelihood is not finite at the optimum".into(),
            ));
        }

        let last = series[series.len() - 1];
        let mut fit = GarchFit {
            mu,
            omega,
            alpha,
            beta,
            log_likelihood,
            last_variance,
            last_residual: last - mu,
            forecast: Vec::new(),
        };
        fit.forecast = fit.variance_path(horizon).into_iter().map(f64::sqrt).collect();

        debug!(
            omega,
            alpha,
            beta,
            iterations = min.iterations,
            "GARCH(1,1) fitted"
        );
        Ok(fit)
    }
}

/// Rolling volatility engine; refits on every update.
pub struct GarchEngine<V: VolatilityModel = Garch11> {
    model: V,
    config: GarchConfig,
    horizon: usize,
    fit: Option<GarchFit>,
    last_forecast: Vec<f64>,
}

impl<V: VolatilityModel> GarchEngine<V> {
    /// Fit on an initial series. A failure here is not fatal: the engine
    /// starts with a zero forecast and recovers on the first good refit.
    pub fn new(model: V, initial: &[f64], horizon: usize, config: GarchConfig) -> Self {
        let mut engine = Self {
            model,
            config,
            horizon,
            fit: None,
            last_forecast: vec![0.0; horizon],
        };
        if let Err(e) = engine.update_and_predict(initial) {
            warn!(error = %e, "Initial GARCH fit failed; starting from a zero volatility forecast");
        }
        engine
    }

    /// Refit on `residuals`. On error the previous forecast is kept and can
    /// be read back with [`last_forecast`](Self::last_forecast).
    pub fn update_and_predict(&mut self, residuals: &[f64]) -> Result<Vec<f64>, FitError> {
        let budget = FitBudget::new(self.config.max_iters, self.config.fit_timeout());
        let fit = self.model.fit(residuals, self.horizon, &budget)?;
        self.last_forecast = fit.forecast.clone();
        self.fit = Some(fit);
        Ok(self.last_forecast.clone())
    }

    pub fn last_forecast(&self) -> &[f64] {
        &self.last_forecast
    }

    pub fn last_fit(&self) -> Option<&GarchFit> {
        self.fit.as_ref()
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;
    use std::time::Duration;

    fn simulate(n: usize, omega: f64, alpha: f64, beta: f64, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut var = omega / (1.0 - alpha - beta);
        let mut eps: f64 = 0.0;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n + 200 {
            var = omega + alpha * eps * eps + beta * var;
            let z: f64 = rng.sample(StandardNormal);
            eps = var.sqrt() * z;
            out.push(eps);
        }
        out.split_off(200)
    }

    fn generous() -> FitBudget {
        FitBudget::new(3000, Duration::from_secs(60))
    }

    #[test]
    fn test_recovers_simulated_parameters() {
        let data = simulate(3000, 0.1, 0.1, 0.8, 42);
        let fit = Garch11::default().fit(&data, 10, &generous()).unwrap();

        assert!(fit.alpha > 0.03 && fit.alpha < 0.2, "alpha = {}", fit.alpha);
        assert!(fit.beta > 0.6 && fit.beta < 0.95, "beta = {}", fit.beta);
        assert!(fit.persistence() < 1.0);
        assert!(fit.mu.abs() < 0.1, "mu = {}", fit.mu);
        assert!(
            (fit.unconditional_variance() - 1.0).abs() < 0.4,
            "long-run variance = {}",
            fit.unconditional_variance()
        );
    }

    #[test]
    fn test_forecast_converges_to_long_run_volatility() {
        let data = simulate(1500, 0.1, 0.1, 0.8, 7);
        let fit = Garch11::default().fit(&data, 400, &generous()).unwrap();
        assert_eq!(fit.forecast.len(), 400);
        assert!(fit.forecast.iter().all(|s| *s > 0.0));

        let long_run = fit.unconditional_variance().sqrt();
        let tail = fit.forecast[399];
        assert!((tail - long_run).abs() < 1e-3 * long_run.max(1.0), "tail {} vs {}", tail, long_run);

        // monotone approach from either side
        let first_gap = (fit.forecast[0] - long_run).abs();
        let later_gap = (fit.forecast[50] - long_run).abs();
        assert!(later_gap <= first_gap + 1e-12);
    }

    #[test]
    fn test_rejects_short_and_flat_series() {
        let model = Garch11::default();
        let err = model.fit(&[0.1; 5], 10, &generous()).unwrap_err();
        assert!(matches!(err, FitError::InsufficientData { .. }));

        let err = model.fit(&[0.5; 50], 10, &generous()).unwrap_err();
        assert!(matches!(err, FitError::Degenerate(_)));
    }

    #[test]
    fn test_engine_keeps_previous_forecast_on_failure() {
        let data = simulate(400, 0.1, 0.1, 0.8, 3);
        let mut engine = GarchEngine::new(Garch11::default(), &data, 10, GarchConfig::default());
        let before = engine.last_forecast().to_vec();
        assert!(before.iter().all(|s| *s > 0.0));

        assert!(engine.update_and_predict(&[0.0; 50]).is_err());
        assert_eq!(engine.last_forecast(), before.as_slice());
    }

    #[test]
    fn test_engine_starts_from_zero_when_initial_fit_fails() {
        let engine = GarchEngine::new(Garch11::default(), &[1.0; 3], 10, GarchConfig::default());
        assert!(engine.last_fit().is_none());
        assert_eq!(engine.last_forecast(), &[0.0; 10]);
    }
}
