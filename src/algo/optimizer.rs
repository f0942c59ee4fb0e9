//! Likelihood optimizer
//!
//! Thin wrapper over argmin's Nelder-Mead used by both model engines. Models
//! supply a negative log-likelihood over an unconstrained parameter vector;
//! the wrapper owns simplex construction, iteration limits and the wall-clock
//! budget that bounds a single refit.

use crate::error::FitError;
use argmin::core::{CostFunction, Error, Executor, State};
use argmin::solver::neldermead::NelderMead;
use std::time::{Duration, Instant};

/// Cost returned for parameter vectors that produce NaN/inf likelihoods.
/// Nelder-Mead needs a total order on vertex costs.
const PENALTY: f64 = 1e12;

const DEADLINE_EXCEEDED: &str = "fit deadline exceeded";

/// Iteration and time limits for one fit.
#[derive(Debug, Clone, Copy)]
pub struct FitBudget {
    pub max_iters: u64,
    started: Instant,
    deadline: Instant,
}

impl FitBudget {
    pub fn new(max_iters: u64, timeout: Duration) -> Self {
        let started = Instant::now();
        Self {
            max_iters,
            started,
            deadline: started + timeout,
        }
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn timeout_error(&self) -> FitError {
        FitError::Timeout {
            elapsed_ms: self.elapsed().as_millis() as u64,
        }
    }
}

/// Best point found by [`minimize`].
#[derive(Debug, Clone)]
pub struct Minimum {
    pub params: Vec<f64>,
    pub cost: f64,
    pub iterations: u64,
}

struct Objective<F> {
    f: F,
    deadline: Instant,
}

impl<F> CostFunction for Objective<F>
where
    F: Fn(&[f64]) -> f64,
{
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> Result<Self::Output, Error> {
        if Instant::now() >= self.deadline {
            return Err(Error::msg(DEADLINE_EXCEEDED));
        }
        let c = (self.f)(param);
        Ok(if c.is_finite() { c } else { PENALTY })
    }
}

/// Minimise `f` starting at `start`, with an axis-aligned initial simplex of
/// size `step[i]` along dimension `i`.
pub fn minimize<F>(f: F, start: &[f64], step: &[f64], budget: &FitBudget) -> Result<Minimum, FitError>
where
    F: Fn(&[f64]) -> f64,
{
    if start.is_empty() || start.len() != step.len() {
        return Err(FitError::Optimizer(format!(
            "bad simplex: {} parameters, {} steps",
            start.len(),
            step.len()
        )));
    }
    if budget.expired() {
        return Err(budget.timeout_error());
    }

    let mut simplex = Vec::with_capacity(start.len() + 1);
    simplex.push(start.to_vec());
    for (i, s) in step.iter().enumerate() {
        let mut vertex = start.to_vec();
        vertex[i] += *s;
        simplex.push(vertex);
    }

    let solver = NelderMead::new(simplex)
        .with_sd_tolerance(1e-8)
        .map_err(|e| FitError::Optimizer(e.to_string()))?;

    let problem = Objective {
        f,
        deadline: budget.deadline,
    };

    let result = Executor::new(problem, solver)
        .configure(|state| state.max_iters(budget.max_iters))
        .run()
        .map_err(|e| {
            if e.to_string().contains(DEADLINE_EXCEEDED) {
                budget.timeout_error()
            } else {
                FitError::Optimizer(e.to_string())
            }
        })?;

    let state = result.state();
    let cost = state.get_best_cost();
    let params = state
        .get_best_param()
        .cloned()
        .ok_or_else(|| FitError::NonConvergence("optimizer produced no parameters".into()))?;

    if !cost.is_finite() || cost >= PENALTY {
        return Err(FitError::NonConvergence(format!(
            "no finite likelihood found (best cost {})",
            cost
        )));
    }

    Ok(Minimum {
        params,
        cost,
        iterations: state.get_iter(),
    })
}
