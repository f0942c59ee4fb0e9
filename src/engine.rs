//! Predictor: the per-sample pipeline
//!
//! standardize -> ARMA refit -> GARCH refit on the ARMA residuals ->
//! combine -> roll & average -> backtest.
//!
//! A failed refit never fails the sample. The affected model's previous
//! forecast is reused and the output is marked stale.

use crate::algo::arma::{self, ArmaEngine, CssArma, MeanModel};
use crate::algo::garch::{Garch11, GarchEngine, VolatilityModel};
use crate::algo::standardizer::Standardizer;
use crate::backtest::{BacktestReport, Backtester};
use crate::config::MonitorConfig;
use crate::error::Result;
use crate::forecast::{self, ForecastSmoother};
use crate::metrics;
use crate::signal::PredictionOutput;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

pub struct Predictor<M: MeanModel = CssArma, V: VolatilityModel = Garch11> {
    config: MonitorConfig,
    standardizer: Standardizer,
    arma: ArmaEngine<M>,
    garch: GarchEngine<V>,
    smoother: ForecastSmoother,
    backtester: Backtester,
    series: VecDeque<f64>,
    sequence: u64,
}

impl Predictor {
    /// Build with the default CSS-ARMA and GARCH(1,1) models.
    pub fn new(initial: &[f64], config: &MonitorConfig) -> Result<Self> {
        let vol = Garch11::new(config.garch.min_observations);
        Self::with_models(initial, config.clone(), CssArma, vol)
    }
}

impl<M: MeanModel, V: VolatilityModel> Predictor<M, V> {
    /// Standardize `initial`, select the ARMA order on it and fit GARCH.
    ///
    /// Fails on an invalid config, a batch that cannot be standardized, or
    /// when no ARMA order can be fitted. A failed GARCH fit is tolerated.
    pub fn with_models(initial: &[f64], config: MonitorConfig, mean: M, vol: V) -> Result<Self> {
        config.validate()?;
        let standardizer = Standardizer::from_batch(initial)?;
        let standardized = standardizer.standardize_all(initial);

        let arma = ArmaEngine::new(mean, &standardized, config.arma.clone())?;
        let garch = GarchEngine::new(vol, &standardized, config.arma.horizon, config.garch.clone());
        let smoother = ForecastSmoother::new(
            config.smoother.rows,
            config.arma.horizon,
            config.smoother.history_capacity,
        );

        let capacity = config.worker.series_capacity.max(1);
        let start = standardized.len().saturating_sub(capacity);
        let series: VecDeque<f64> = standardized[start..].iter().copied().collect();

        info!(
            mean = standardizer.mean(),
            stddev = standardizer.stddev(),
            order = %arma.order(),
            samples = initial.len(),
            "Predictor initialised"
        );

        Ok(Self {
            config,
            standardizer,
            arma,
            garch,
            smoother,
            backtester: Backtester::new(),
            series,
            sequence: 0,
        })
    }

    /// Run one raw sample through the pipeline.
    pub fn update_and_predict(&mut self, raw: f64) -> Result<PredictionOutput> {
        let z = self.standardizer.standardize_checked(raw)?;
        let timer = metrics::REFIT_DURATION.start_timer();
        self.sequence += 1;

        let (arma_forecast, is_outlier, arma_stale) = match self.arma.update_and_predict(z) {
            Ok(out) => (out.forecast, out.is_outlier, false),
            Err(e) => {
                warn!(
                    sequence = self.sequence,
                    order = %self.arma.order(),
                    error = %e,
                    "ARMA refit failed; reusing previous forecast"
                );
                metrics::FIT_FAILURES.with_label_values(&["arma"]).inc();
                let stale = self.arma.last_forecast().to_vec();
                let outlier = arma::exceeds_sigma(&stale, self.config.arma.outlier_sigma);
                (stale, outlier, true)
            }
        };

        let residuals = self.arma.residuals();
        let (garch_forecast, garch_stale) = match self.garch.update_and_predict(residuals) {
            Ok(f) => (f, false),
            Err(e) => {
                warn!(
                    sequence = self.sequence,
                    error = %e,
                    "GARCH refit failed; reusing previous forecast"
                );
                metrics::FIT_FAILURES.with_label_values(&["garch"]).inc();
                (self.garch.last_forecast().to_vec(), true)
            }
        };

        let combined = forecast::combine(&arma_forecast, &garch_forecast)?;
        let average_forecast = self.smoother.roll_and_average(&combined)?;

        if self.series.len() >= self.config.worker.series_capacity.max(1) {
            self.series.pop_front();
        }
        self.series.push_back(z);
        self.backtester.record(z, &combined);

        timer.observe_duration();
        metrics::SAMPLES_TOTAL.inc();
        if is_outlier {
            metrics::OUTLIERS_TOTAL.inc();
        }
        debug!(
            sequence = self.sequence,
            value = z,
            next = combined.first().copied().unwrap_or_default(),
            is_outlier,
            arma_stale,
            garch_stale,
            "Forecast updated"
        );

        Ok(PredictionOutput {
            sequence: self.sequence,
            arma_forecast,
            garch_forecast,
            combined_forecast: combined,
            average_forecast,
            is_outlier,
            order: self.arma.order(),
            arma_stale,
            garch_stale,
        })
    }

    pub fn standardizer(&self) -> &Standardizer {
        &self.standardizer
    }

    pub fn arma(&self) -> &ArmaEngine<M> {
        &self.arma
    }

    pub fn garch(&self) -> &GarchEngine<V> {
        &self.garch
    }

    pub fn smoother(&self) -> &ForecastSmoother {
        &self.smoother
    }

    /// Initial batch and live samples, standardized, oldest first
    pub fn standardized_series(&self) -> &VecDeque<f64> {
        &self.series
    }

    pub fn backtest(&self) -> BacktestReport {
        self.backtester.report()
    }

    /// Live updates processed so far
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::arma::{ArmaFit, ModelOrder};
    use crate::algo::garch::GarchFit;
    use crate::algo::optimizer::FitBudget;
    use crate::config::ArmaConfig;
    use crate::error::{FitError, MonitorError};
    use crate::simulation::SyntheticLoad;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Clone)]
    struct StubMean {
        forecast: Vec<f64>,
        fail: Arc<AtomicBool>,
    }

    impl MeanModel for StubMean {
        fn fit(
            &self,
            data: &[f64],
            order: ModelOrder,
            _conditioning: usize,
            _horizon: usize,
            _budget: &FitBudget,
        ) -> std::result::Result<ArmaFit, FitError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(FitError::NonConvergence("stub".into()));
            }
            Ok(ArmaFit {
                order,
                mean: 0.0,
                ar: vec![0.0; order.p],
                ma: vec![0.0; order.q],
                sigma2: 1.0,
                scored: data.len(),
                log_likelihood: 0.0,
                aic: (order.p + order.q) as f64,
                residuals: data.to_vec(),
                forecast: self.forecast.clone(),
            })
        }
    }

    struct StubVol {
        level: f64,
        fail: Arc<AtomicBool>,
    }

    impl VolatilityModel for StubVol {
        fn fit(&self, _: &[f64], horizon: usize, _: &FitBudget) -> std::result::Result<GarchFit, FitError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(FitError::Degenerate("stub".into()));
            }
            Ok(GarchFit {
                mu: 0.0,
                omega: self.level * self.level,
                alpha: 0.0,
                beta: 0.0,
                log_likelihood: 0.0,
                last_variance: self.level * self.level,
                last_residual: 0.0,
                forecast: vec![self.level; horizon],
            })
        }
    }

    fn stub_config() -> MonitorConfig {
        MonitorConfig {
            arma: ArmaConfig {
                window: 30,
                ..ArmaConfig::default()
            },
            ..MonitorConfig::default()
        }
    }

    fn initial() -> Vec<f64> {
        (0..40).map(|i| 10.0 + (i % 5) as f64).collect()
    }

    fn stub_predictor(
        head: f64,
        arma_fail: &Arc<AtomicBool>,
        garch_fail: &Arc<AtomicBool>,
    ) -> Predictor<StubMean, StubVol> {
        let mut forecast = vec![0.1; 10];
        forecast[0] = head;
        Predictor::with_models(
            &initial(),
            stub_config(),
            StubMean {
                forecast,
                fail: arma_fail.clone(),
            },
            StubVol {
                level: 0.5,
                fail: garch_fail.clone(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_combines_and_averages() {
        let off = Arc::new(AtomicBool::new(false));
        let mut p = stub_predictor(1.0, &off, &off);
        let out = p.update_and_predict(12.0).unwrap();

        assert_eq!(out.sequence, 1);
        assert_eq!(out.combined_forecast[0], 1.5);
        assert!((out.combined_forecast[1] - 0.6).abs() < 1e-12);
        // one real row out of ten
        assert!((out.average_forecast[0] - 0.15).abs() < 1e-12);
        assert!(!out.is_outlier);
        assert!(!out.is_stale());
        assert_eq!(p.standardized_series().len(), 41);
        assert_eq!(*p.standardized_series().back().unwrap(), p.standardizer().standardize(12.0));
    }

    #[test]
    fn test_arma_failure_reuses_stale_forecast() {
        let arma_fail = Arc::new(AtomicBool::new(false));
        let garch_fail = Arc::new(AtomicBool::new(false));
        let mut p = stub_predictor(2.1, &arma_fail, &garch_fail);
        let fresh = p.update_and_predict(11.0).unwrap();

        arma_fail.store(true, Ordering::SeqCst);
        let stale = p.update_and_predict(11.0).unwrap();
        assert!(stale.arma_stale);
        assert!(!stale.garch_stale);
        assert_eq!(stale.arma_forecast, fresh.arma_forecast);
        // recomputed on the reused forecast
        assert!(stale.is_outlier);
        assert_eq!(stale.sequence, 2);
    }

    #[test]
    fn test_garch_failure_reuses_stale_forecast() {
        let arma_fail = Arc::new(AtomicBool::new(false));
        let garch_fail = Arc::new(AtomicBool::new(false));
        let mut p = stub_predictor(0.0, &arma_fail, &garch_fail);
        p.update_and_predict(11.0).unwrap();

        garch_fail.store(true, Ordering::SeqCst);
        let out = p.update_and_predict(11.0).unwrap();
        assert!(out.garch_stale);
        assert_eq!(out.garch_forecast, vec![0.5; 10]);
    }

    #[test]
    fn test_non_finite_sample_leaves_state_untouched() {
        let off = Arc::new(AtomicBool::new(false));
        let mut p = stub_predictor(0.0, &off, &off);
        let err = p.update_and_predict(f64::INFINITY).unwrap_err();
        assert!(matches!(err, MonitorError::InvalidInput(_)));
        assert_eq!(p.sequence(), 0);
        assert_eq!(p.smoother().total_updates(), 0);
        assert_eq!(p.standardized_series().len(), 40);
    }

    #[test]
    fn test_overflowing_sample_is_rejected_and_models_recover() {
        let config = MonitorConfig {
            arma: ArmaConfig {
                window: 40,
                max_order: 3,
                fit_timeout_ms: 2_000,
                selection_timeout_ms: 10_000,
                ..ArmaConfig::default()
            },
            ..MonitorConfig::default()
        };
        let samples = SyntheticLoad::new(33).take_vec(70);
        let mut p = Predictor::new(&samples[..40], &config).unwrap();
        assert!(p.standardizer().stddev() < 1.0);

        let err = p.update_and_predict(1.7e308).unwrap_err();
        assert!(matches!(err, MonitorError::InvalidInput(_)));
        assert_eq!(p.sequence(), 0);
        assert!(p.arma().window().iter().all(|x| x.is_finite()));
        assert!(p.standardized_series().iter().all(|x| x.is_finite()));

        for &raw in &samples[40..] {
            let out = p.update_and_predict(raw).unwrap();
            assert!(!out.arma_stale, "sequence {} went stale", out.sequence);
        }
        assert_eq!(p.backtest().scored, 29);
        assert!(p.backtest().mae.is_finite());
    }

    #[test]
    fn test_construction_errors_are_fatal() {
        let off = Arc::new(AtomicBool::new(false));
        let on = Arc::new(AtomicBool::new(true));
        let stub = |fail: &Arc<AtomicBool>| StubMean {
            forecast: vec![0.0; 10],
            fail: fail.clone(),
        };
        let vol = || StubVol {
            level: 0.5,
            fail: off.clone(),
        };

        let flat = Predictor::with_models(&[3.0; 40], stub_config(), stub(&off), vol());
        assert!(matches!(flat.err(), Some(MonitorError::InvalidInput(_))));

        let none_fit = Predictor::with_models(&initial(), stub_config(), stub(&on), vol());
        assert!(matches!(none_fit.err(), Some(MonitorError::ModelSelection(_))));

        let mut bad = stub_config();
        bad.arma.min_order = 6;
        let invalid = Predictor::with_models(&initial(), bad, stub(&off), vol());
        assert!(matches!(invalid.err(), Some(MonitorError::Config(_))));
    }

    #[test]
    fn test_backtest_scores_live_updates() {
        let off = Arc::new(AtomicBool::new(false));
        let mut p = stub_predictor(0.0, &off, &off);
        for v in [10.0, 11.0, 12.0, 13.0] {
            p.update_and_predict(v).unwrap();
        }
        assert_eq!(p.backtest().scored, 3);
    }

    #[test]
    fn test_real_models_on_synthetic_load() {
        let config = MonitorConfig {
            arma: ArmaConfig {
                window: 60,
                max_order: 3,
                fit_timeout_ms: 2_000,
                selection_timeout_ms: 10_000,
                ..ArmaConfig::default()
            },
            ..MonitorConfig::default()
        };
        let samples = SyntheticLoad::new(17).take_vec(80);
        let mut p = Predictor::new(&samples[..60], &config).unwrap();

        for &raw in &samples[60..] {
            let out = p.update_and_predict(raw).unwrap();
            assert_eq!(out.combined_forecast.len(), 10);
            assert!(out.combined_forecast.iter().all(|f| f.is_finite()));
            assert!(out.average_forecast.iter().all(|f| f.is_finite()));
            assert!(out.order.p >= 2 && out.order.p <= 3);
        }
        assert_eq!(p.arma().window().len(), 60);
        assert_eq!(p.sequence(), 20);
    }
}
