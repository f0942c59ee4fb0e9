//! Error taxonomy for the forecasting engine.
//!
//! Refit failures (`FitError`) are recoverable and are contained by the
//! component that owns the model. `ModelSelectionError` is fatal only when
//! no order has ever been selected. `MonitorError` is what callers see.

use thiserror::Error;

/// A single model fit failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("insufficient data: need {required} observations, got {actual}")]
    InsufficientData { required: usize, actual: usize },
    #[error("fit did not converge: {0}")]
    NonConvergence(String),
    #[error("degenerate input: {0}")]
    Degenerate(String),
    #[error("fit exceeded its time budget after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },
    #[error("optimizer failure: {0}")]
    Optimizer(String),
}

/// No candidate order could be fitted during a grid search.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("order selection failed: none of {candidates} candidates fitted")]
pub struct ModelSelectionError {
    pub candidates: usize,
    pub last_error: Option<FitError>,
}

/// Errors surfaced to users of the crate.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MonitorError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    ModelSelection(#[from] ModelSelectionError),
    #[error(transparent)]
    Fit(#[from] FitError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to spawn monitor worker: {0}")]
    Spawn(String),
    #[error("monitor worker panicked")]
    WorkerPanicked,
}

pub type Result<T, E = MonitorError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_error_converts() {
        let err: MonitorError = ModelSelectionError {
            candidates: 16,
            last_error: Some(FitError::NonConvergence("flat".into())),
        }
        .into();
        assert!(matches!(err, MonitorError::ModelSelection(_)));
        assert!(err.to_string().contains("16 candidates"));
    }

    #[test]
    fn test_fit_error_display() {
        let err = FitError::InsufficientData {
            required: 20,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "insufficient data: need 20 observations, got 3"
        );
    }
}
