//! Online cognitive-load forecasting and anomaly detection.
//!
//! Raw load samples are standardized, modelled with a rolling ARMA mean
//! model and a GARCH(1,1) volatility model on its residuals, and the two
//! forecasts are summed and smoothed over the last K forecasts. In parallel
//! a baseline is learned from the first observations and later windows are
//! checked against it.
//!
//! ```no_run
//! use cogload_core::{MonitorConfig, MonitorWorker, TracingSink};
//!
//! let (samples, handle) = MonitorWorker::spawn(MonitorConfig::default(), TracingSink)?;
//! for load in [3.1, 3.4, 2.9] {
//!     samples.submit(load);
//! }
//! drop(samples);
//! let summary = handle.join()?;
//! println!("{} forecasts", summary.forecasts);
//! # Ok::<(), cogload_core::MonitorError>(())
//! ```

pub mod algo;
pub mod backtest;
pub mod baseline;
pub mod config;
pub mod engine;
pub mod error;
pub mod forecast;
pub mod metrics;
pub mod signal;
pub mod simulation;
pub mod sink;
pub mod worker;

pub use algo::{ArmaEngine, CssArma, GarchEngine, Garch11, MeanModel, ModelOrder, Standardizer, VolatilityModel};
pub use baseline::{Baseline, BaselineEvent, BaselineTracker, DeviationVerdict, Direction};
pub use config::MonitorConfig;
pub use engine::Predictor;
pub use error::{FitError, ModelSelectionError, MonitorError, Result};
pub use signal::{EventPayload, MonitorEvent, PredictionOutput};
pub use sink::{ChannelSink, EventSink, JsonLinesSink, NullSink, TracingSink};
pub use worker::{MonitorHandle, MonitorWorker, SampleSender, SubmitOutcome, WorkerSummary};
