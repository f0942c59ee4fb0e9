//! ARMA(p, q) Mean-Dynamics Engine
//!
//! Models the standardized load signal as
//!
//! ```text
//! x_t - mu = sum_i phi_i (x_{t-i} - mu) + e_t + sum_j theta_j e_{t-j}
//! ```
//!
//! with no differencing. Coefficients are estimated by conditional sum of
//! squares (Gaussian likelihood conditioned on the leading observations),
//! maximised with Nelder-Mead over an unconstrained space. Every order in a
//! grid is conditioned on the same number of observations, the largest p in
//! the grid, so their AICs are computed on one sample. The partial
//! autocorrelation transform keeps AR polynomials stationary and MA
//! polynomials invertible for every point the optimizer visits.
//!
//! The engine keeps a fixed-length sliding window, refits on every update and
//! re-runs the AIC grid search every `reselect_every` updates.

use crate::algo::optimizer::{self, FitBudget};
use crate::config::ArmaConfig;
use crate::error::{FitError, ModelSelectionError};
use crate::metrics;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, info, warn};

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Largest |partial autocorrelation| used when seeding the optimizer
const PACF_SEED_LIMIT: f64 = 0.95;

/// (p, q) order of an ARMA model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelOrder {
    pub p: usize,
    pub q: usize,
}

impl ModelOrder {
    pub fn new(p: usize, q: usize) -> Self {
        Self { p, q }
    }

    /// Estimated parameters counted by AIC: AR + MA + mean + innovation variance
    pub fn n_params(&self) -> usize {
        self.p + self.q + 2
    }

    /// Every (p, q) with both orders in `min..=max`, p-major.
    pub fn grid(min: usize, max: usize) -> Vec<ModelOrder> {
        let mut grid = Vec::new();
        for p in min..=max {
            for q in min..=max {
                grid.push(ModelOrder::new(p, q));
            }
        }
        grid
    }
}

impl fmt::Display for ModelOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ARMA({},{})", self.p, self.q)
    }
}

/// Result of fitting one order on one window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmaFit {
    pub order: ModelOrder,
    pub mean: f64,
    pub ar: Vec<f64>,
    pub ma: Vec<f64>,
    /// Innovation variance
    pub sigma2: f64,
    /// Observations entering the likelihood
    pub scored: usize,
    pub log_likelihood: f64,
    pub aic: f64,
    /// In-sample one-step residuals (conditional: first p observations excluded)
    pub residuals: Vec<f64>,
    /// Mean forecast for steps 1..=horizon
    pub forecast: Vec<f64>,
}

/// Anything that can fit a mean model of a given order.
///
/// `conditioning` is the number of leading observations left out of the
/// likelihood (at least `order.p`). Fits whose AICs are compared must share it.
pub trait MeanModel: Send {
    fn fit(
        &self,
        data: &[f64],
        order: ModelOrder,
        conditioning: usize,
        horizon: usize,
        budget: &FitBudget,
    ) -> Result<ArmaFit, FitError>;
}

/// Conditional-sum-of-squares ARMA estimator.
#[derive(Debug, Clone, Copy, Default)]
pub struct CssArma;

impl CssArma {
    pub fn min_observations(order: ModelOrder, conditioning: usize) -> usize {
        conditioning.max(order.p) + order.q + 10
    }
}

impl MeanModel for CssArma {
    fn fit(
        &self,
        data: &[f64],
        order: ModelOrder,
        conditioning: usize,
        horizon: usize,
        budget: &FitBudget,
    ) -> Result<ArmaFit, FitError> {
        let required = Self::min_observations(order, conditioning);
        if data.len() < required {
            return Err(FitError::InsufficientData {
                required,
                actual: data.len(),
            });
        }
        if data.iter().any(|x| !x.is_finite()) {
            return Err(FitError::Degenerate("window contains non-finite values".into()));
        }

        let n = data.len();
        let sample_mean = data.iter().sum::<f64>() / n as f64;
        let sample_var = data.iter().map(|x| (x - sample_mean).powi(2)).sum::<f64>() / n as f64;
        if sample_var <= 1e-12 {
            return Err(FitError::Degenerate("window has zero variance".into()));
        }

        let ModelOrder { p, q } = order;
        let skip = conditioning.max(p);
        let scored = n - skip;
        let n_eff = scored as f64;

        // theta = [mu, u_ar (p), u_ma (q)]
        let mut start = Vec::with_capacity(1 + p + q);
        start.push(sample_mean);
        start.extend(
            seed_pacf(data, sample_mean, p)
                .into_iter()
                .map(|r| r / (1.0 - r * r).sqrt()),
        );
        start.extend(std::iter::repeat_n(0.0, q));

        let mut step = vec![0.3; 1 + p + q];
        step[0] = (0.1 * sample_var.sqrt()).max(1e-3);

        let objective = |theta: &[f64]| {
            let (mu, ar, ma) = unpack(theta, order);
            let e = css_residuals(data, mu, &ar, &ma);
            let sse: f64 = e[skip..].iter().map(|r| r * r).sum();
            if !(sse > 0.0) {
                return f64::INFINITY;
            }
            0.5 * n_eff * (sse / n_eff).ln()
        };

        let min = optimizer::minimize(objective, &start, &step, budget)?;

        let (mean, ar, ma) = unpack(&min.params, order);
        let full = css_residuals(data, mean, &ar, &ma);
        let sse: f64 = full[skip..].iter().map(|r| r * r).sum();
        let sigma2 = sse / n_eff;
        if !(sigma2.is_finite() && sigma2 > 0.0) {
            return Err(FitError::NonConvergence(format!(
                "{} produced innovation variance {}",
                order, sigma2
            )));
        }

        let log_likelihood = -0.5 * n_eff * (LN_2PI + sigma2.ln() + 1.0);
        let aic = -2.0 * log_likelihood + 2.0 * order.n_params() as f64;
        let forecast = forecast_path(data, mean, &ar, &ma, &full, horizon);

        Ok(ArmaFit {
            order,
            mean,
            ar,
            ma,
            sigma2,
            scored,
            log_likelihood,
            aic,
            residuals: full[p..].to_vec(),
            forecast,
        })
    }
}

/// Map unconstrained values onto the coefficients of a stationary AR
/// polynomial (`1 - sum phi_i z^i` has all roots outside the unit circle).
pub fn constrain_stationary(unconstrained: &[f64]) -> Vec<f64> {
    let mut phi: Vec<f64> = Vec::with_capacity(unconstrained.len());
    for (k, u) in unconstrained.iter().enumerate() {
        let r = u / (1.0 + u * u).sqrt();
        let mut next = Vec::with_capacity(k + 1);
        for j in 0..k {
            next.push(phi[j] - r * phi[k - 1 - j]);
        }
        next.push(r);
        phi = next;
    }
    phi
}

fn unpack(theta: &[f64], order: ModelOrder) -> (f64, Vec<f64>, Vec<f64>) {
    let mu = theta[0];
    let ar = constrain_stationary(&theta[1..1 + order.p]);
    // theta(z) = 1 + sum theta_j z^j is invertible iff -theta is a stationary AR
    let ma = constrain_stationary(&theta[1 + order.p..1 + order.p + order.q])
        .into_iter()
        .map(|c| -c)
        .collect();
    (mu, ar, ma)
}

/// Yule-Walker partial autocorrelations via Levinson-Durbin, clamped for seeding.
fn seed_pacf(data: &[f64], mean: f64, p: usize) -> Vec<f64> {
    let n = data.len();
    let mut acov = vec![0.0; p + 1];
    for (k, slot) in acov.iter_mut().enumerate() {
        let mut sum = 0.0;
        for t in k..n {
            sum += (data[t] - mean) * (data[t - k] - mean);
        }
        *slot = sum / n as f64;
    }

    let mut pacf = vec![0.0; p];
    if acov[0] <= 1e-12 {
        return pacf;
    }

    let mut phi: Vec<f64> = Vec::with_capacity(p);
    let mut err = acov[0];
    for k in 0..p {
        let mut num = acov[k + 1];
        for j in 0..k {
            num -= phi[j] * acov[k - j];
        }
        let r = (num / err).clamp(-PACF_SEED_LIMIT, PACF_SEED_LIMIT);
        let mut next = Vec::with_capacity(k + 1);
        for j in 0..k {
            next.push(phi[j] - r * phi[k - 1 - j]);
        }
        next.push(r);
        phi = next;
        pacf[k] = r;
        err *= 1.0 - r * r;
        if err <= 1e-12 {
            break;
        }
    }
    pacf
}

/// One-step residuals over the whole window; the first `ar.len()` are zero.
fn css_residuals(data: &[f64], mean: f64, ar: &[f64], ma: &[f64]) -> Vec<f64> {
    let p = ar.len();
    let mut e = vec![0.0; data.len()];
    for t in p..data.len() {
        let mut pred = mean;
        for (i, phi) in ar.iter().enumerate() {
            pred += phi * (data[t - 1 - i] - mean);
        }
        for (j, theta) in ma.iter().enumerate() {
            if t > j {
                pred += theta * e[t - 1 - j];
            }
        }
        e[t] = data[t] - pred;
    }
    e
}

fn forecast_path(
    data: &[f64],
    mean: f64,
    ar: &[f64],
    ma: &[f64],
    residuals: &[f64],
    steps: usize,
) -> Vec<f64> {
    let mut x = data.to_vec();
    let mut e = residuals.to_vec();
    for _ in 0..steps {
        let t = x.len();
        let mut pred = mean;
        for (i, phi) in ar.iter().enumerate() {
            if t > i {
                pred += phi * (x[t - 1 - i] - mean);
            }
        }
        for (j, theta) in ma.iter().enumerate() {
            if t > j {
                pred += theta * e[t - 1 - j];
            }
        }
        x.push(pred);
        // future innovations have expectation zero
        e.push(0.0);
    }
    x.split_off(data.len())
}

/// `true` when any forecast value is at least `sigma` away from zero.
pub fn exceeds_sigma(forecast: &[f64], sigma: f64) -> bool {
    forecast.iter().any(|f| f.abs() >= sigma)
}

/// Outcome of a grid search.
#[derive(Debug, Clone)]
pub struct OrderSelection {
    pub best: ArmaFit,
    /// AIC per candidate; `None` for candidates that failed or were skipped
    pub candidates: Vec<(ModelOrder, Option<f64>)>,
}

/// Leading observations every candidate in `grid` is conditioned on.
pub fn shared_conditioning(grid: &[ModelOrder]) -> usize {
    grid.iter().map(|o| o.p).max().unwrap_or(0)
}

/// Fit every order in `grid` and keep the minimum-AIC fit. Failed candidates
/// are skipped; candidates left when the budget runs out are not attempted.
pub fn select_order<M: MeanModel + ?Sized>(
    model: &M,
    data: &[f64],
    grid: &[ModelOrder],
    horizon: usize,
    budget: &FitBudget,
) -> Result<OrderSelection, ModelSelectionError> {
    let mut best: Option<ArmaFit> = None;
    let mut candidates = Vec::with_capacity(grid.len());
    let mut last_error = None;
    let conditioning = shared_conditioning(grid);

    for &order in grid {
        if budget.expired() {
            debug!(%order, "Selection budget exhausted; skipping candidate");
            candidates.push((order, None));
            continue;
        }
        match model.fit(data, order, conditioning, horizon, budget) {
            Ok(fit) if fit.aic.is_finite() => {
                candidates.push((order, Some(fit.aic)));
                if best.as_ref().is_none_or(|b| fit.aic < b.aic) {
                    best = Some(fit);
                }
            }
            Ok(fit) => {
                candidates.push((order, None));
                last_error = Some(FitError::NonConvergence(format!(
                    "{} has non-finite AIC {}",
                    order, fit.aic
                )));
            }
            Err(e) => {
                debug!(%order, error = %e, "Candidate order failed to fit");
                candidates.push((order, None));
                last_error = Some(e);
            }
        }
    }

    match best {
        Some(best) => Ok(OrderSelection { best, candidates }),
        None => Err(ModelSelectionError {
            candidates: grid.len(),
            last_error,
        }),
    }
}

/// Mean forecast produced by one engine update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeanForecast {
    pub forecast: Vec<f64>,
    pub is_outlier: bool,
    pub order: ModelOrder,
    /// Order selection ran during this update
    pub reselected: bool,
}

/// Rolling ARMA engine over a bounded window.
pub struct ArmaEngine<M: MeanModel = CssArma> {
    model: M,
    config: ArmaConfig,
    grid: Vec<ModelOrder>,
    conditioning: usize,
    window: VecDeque<f64>,
    fit: ArmaFit,
    counter: u32,
    updates: u64,
    reselections: u64,
}

impl<M: MeanModel> ArmaEngine<M> {
    /// Select an order on the last `config.window` values of `initial`.
    ///
    /// This one-off search runs under `selection_timeout`; later periodic
    /// searches are held to the refit deadline.
    pub fn new(model: M, initial: &[f64], config: ArmaConfig) -> Result<Self, ModelSelectionError> {
        let grid = ModelOrder::grid(config.min_order, config.max_order);
        let conditioning = shared_conditioning(&grid);
        let start = initial.len().saturating_sub(config.window);
        let mut window = VecDeque::with_capacity(config.window + 1);
        window.extend(initial[start..].iter().copied());

        let budget = FitBudget::new(config.max_iters, config.selection_timeout());
        let selection = select_order(&model, window.make_contiguous(), &grid, config.horizon, &budget)?;
        info!(
            order = %selection.best.order,
            aic = selection.best.aic,
            window = window.len(),
            "Initial ARMA order selected"
        );

        Ok(Self {
            model,
            config,
            grid,
            conditioning,
            window,
            fit: selection.best,
            counter: 0,
            updates: 0,
            reselections: 0,
        })
    }

    /// Slide the window, re-select the order when the period elapses, refit
    /// and forecast. On error the previous fit is kept untouched, and a
    /// non-finite value is refused before it reaches the window.
    pub fn update_and_predict(&mut self, value: f64) -> Result<MeanForecast, FitError> {
        if !value.is_finite() {
            return Err(FitError::Degenerate(format!("non-finite sample {}", value)));
        }
        if self.window.len() >= self.config.window {
            self.window.pop_front();
        }
        self.window.push_back(value);
        self.updates += 1;
        self.counter += 1;

        let mut reselected = None;
        if self.counter >= self.config.reselect_every {
            self.counter = 0;
            match self.reselect() {
                Ok(fit) => reselected = Some(fit),
                Err(e) => warn!(
                    order = %self.fit.order,
                    error = %e,
                    "Order re-selection failed; keeping last good order"
                ),
            }
        }

        let did_reselect = reselected.is_some();
        let fit = match reselected {
            Some(fit) => fit,
            None => {
                let budget = FitBudget::new(self.config.max_iters, self.config.fit_timeout());
                self.model.fit(
                    self.window.make_contiguous(),
                    self.fit.order,
                    self.conditioning,
                    self.config.horizon,
                    &budget,
                )?
            }
        };

        let is_outlier = exceeds_sigma(&fit.forecast, self.config.outlier_sigma);
        let out = MeanForecast {
            forecast: fit.forecast.clone(),
            is_outlier,
            order: fit.order,
            reselected: did_reselect,
        };
        self.fit = fit;
        Ok(out)
    }

    /// Grid search under the refit deadline. The current order goes first so
    /// a search cut short by the deadline still refits it.
    fn reselect(&mut self) -> Result<ArmaFit, ModelSelectionError> {
        let current = self.fit.order;
        let mut grid = Vec::with_capacity(self.grid.len());
        grid.push(current);
        grid.extend(self.grid.iter().copied().filter(|&o| o != current));

        let budget = FitBudget::new(self.config.max_iters, self.config.fit_timeout());
        let selection = select_order(
            &self.model,
            self.window.make_contiguous(),
            &grid,
            self.config.horizon,
            &budget,
        )?;
        self.reselections += 1;
        metrics::ORDER_RESELECTIONS.inc();
        if selection.best.order != current {
            info!(
                from = %current,
                to = %selection.best.order,
                aic = selection.best.aic,
                "ARMA order changed"
            );
        }
        Ok(selection.best)
    }

    pub fn order(&self) -> ModelOrder {
        self.fit.order
    }

    pub fn last_fit(&self) -> &ArmaFit {
        &self.fit
    }

    pub fn last_forecast(&self) -> &[f64] {
        &self.fit.forecast
    }

    /// Residuals of the most recent successful fit
    pub fn residuals(&self) -> &[f64] {
        &self.fit.residuals
    }

    pub fn window(&self) -> &VecDeque<f64> {
        &self.window
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn reselections(&self) -> u64 {
        self.reselections
    }

    pub fn config(&self) -> &ArmaConfig {
        &self.config
    }
}
