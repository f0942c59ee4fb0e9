//! Producer/consumer wiring.
//!
//! Acquisition pushes raw loads through a [`SampleSender`]; a single named
//! worker thread owns the predictor and the baseline tracker and pushes
//! [`MonitorEvent`]s into an [`EventSink`].
//!
//! The queue is bounded. When it is full the sender evicts the oldest
//! pending sample, so acquisition never blocks and the worker always sees
//! the freshest data.

use crate::algo::arma::{CssArma, MeanModel};
use crate::algo::garch::{Garch11, VolatilityModel};
use crate::backtest::BacktestReport;
use crate::baseline::{Baseline, BaselineEvent, BaselineTracker};
use crate::config::MonitorConfig;
use crate::engine::Predictor;
use crate::error::{MonitorError, Result};
use crate::metrics;
use crate::signal::{EventPayload, MonitorEvent};
use crate::sink::EventSink;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    /// Queue was full; the oldest pending sample was discarded
    DroppedOldest,
    /// The worker has stopped
    Closed,
}

/// Producer side of the sample queue. Cheap to clone.
#[derive(Clone)]
pub struct SampleSender {
    tx: Sender<f64>,
    evict: Receiver<f64>,
    closed: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl SampleSender {
    /// Enqueue without blocking, evicting the oldest pending sample if full.
    pub fn submit(&self, value: f64) -> SubmitOutcome {
        if self.closed.load(Ordering::Acquire) {
            return SubmitOutcome::Closed;
        }
        let mut value = value;
        let mut outcome = SubmitOutcome::Queued;
        loop {
            match self.tx.try_send(value) {
                Ok(()) => return outcome,
                Err(TrySendError::Full(v)) => {
                    value = v;
                    if self.evict.try_recv().is_ok() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        metrics::SAMPLES_DROPPED.inc();
                        outcome = SubmitOutcome::DroppedOldest;
                    }
                }
                Err(TrySendError::Disconnected(_)) => return SubmitOutcome::Closed,
            }
        }
    }

    /// Enqueue, waiting for space. For replaying recorded sessions where
    /// no sample may be lost.
    pub fn submit_blocking(&self, value: f64) -> SubmitOutcome {
        let idle = Duration::from_millis(50);
        let mut value = value;
        loop {
            if self.closed.load(Ordering::Acquire) {
                return SubmitOutcome::Closed;
            }
            match self.tx.send_timeout(value, idle) {
                Ok(()) => return SubmitOutcome::Queued,
                Err(crossbeam_channel::SendTimeoutError::Timeout(v)) => value = v,
                Err(crossbeam_channel::SendTimeoutError::Disconnected(_)) => {
                    return SubmitOutcome::Closed;
                }
            }
        }
    }

    /// Samples evicted so far, across all clones
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Counts reported when the worker exits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub session: Uuid,
    /// Samples taken off the queue
    pub received: u64,
    /// Zero loads ignored as "no measurement"
    pub skipped: u64,
    /// Non-finite samples
    pub rejected: u64,
    /// Evicted by the drop-oldest policy
    pub dropped: u64,
    pub forecasts: u64,
    pub outliers: u64,
    pub stale_forecasts: u64,
    pub baseline: Option<Baseline>,
    pub deviation_checks: u64,
    pub significant_deviations: u64,
    pub backtest: Option<BacktestReport>,
}

pub struct MonitorHandle {
    session: Uuid,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Result<WorkerSummary>>,
}

impl MonitorHandle {
    pub fn session(&self) -> Uuid {
        self.session
    }

    /// Wait for the worker to finish. It finishes on its own once every
    /// [`SampleSender`] is dropped and the queue is drained.
    pub fn join(self) -> Result<WorkerSummary> {
        self.handle.join().map_err(|_| MonitorError::WorkerPanicked)?
    }

    /// Ask the worker to drain what is queued and stop, then join it.
    pub fn shutdown(self) -> Result<WorkerSummary> {
        self.stop.store(true, Ordering::Release);
        self.join()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

pub struct MonitorWorker;

impl MonitorWorker {
    /// Spawn with the default CSS-ARMA and GARCH(1,1) models.
    pub fn spawn<S: EventSink + 'static>(
        config: MonitorConfig,
        sink: S,
    ) -> Result<(SampleSender, MonitorHandle)> {
        let vol = Garch11::new(config.garch.min_observations);
        Self::spawn_with_models(config, sink, CssArma, vol)
    }

    pub fn spawn_with_models<M, V, S>(
        config: MonitorConfig,
        sink: S,
        mean: M,
        vol: V,
    ) -> Result<(SampleSender, MonitorHandle)>
    where
        M: MeanModel + 'static,
        V: VolatilityModel + 'static,
        S: EventSink + 'static,
    {
        config.validate()?;
        let session = Uuid::new_v4();
        let (tx, rx) = bounded(config.worker.queue_capacity);
        let stop = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicU64::new(0));

        let sender = SampleSender {
            tx,
            evict: rx.clone(),
            closed: closed.clone(),
            dropped: dropped.clone(),
        };

        let worker_stop = stop.clone();
        let handle = thread::Builder::new()
            .name("cogload-worker".into())
            .spawn(move || {
                let _closed = CloseOnExit(closed);
                let mut worker = Worker {
                    session,
                    tracker: BaselineTracker::new(config.baseline.clone()),
                    warmup: Vec::with_capacity(config.warmup_samples()),
                    config,
                    sink,
                    rx,
                    stop: worker_stop,
                    models: Some((mean, vol)),
                    predictor: None,
                    summary: WorkerSummary {
                        session,
                        ..WorkerSummary::default()
                    },
                };
                let result = worker.run();
                let mut summary = worker.summary;
                summary.dropped = dropped.load(Ordering::Relaxed);
                summary.baseline = worker.tracker.baseline().copied();
                summary.backtest = worker.predictor.as_ref().map(|p| p.backtest());
                match result {
                    Ok(()) => {
                        info!(session = %session, received = summary.received, "Monitor worker stopped.");
                        Ok(summary)
                    }
                    Err(e) => {
                        error!(session = %session, error = %e, "Monitor worker failed.");
                        Err(e)
                    }
                }
            })
            .map_err(|e| MonitorError::Spawn(e.to_string()))?;

        Ok((
            sender,
            MonitorHandle {
                session,
                stop,
                handle,
            },
        ))
    }
}

/// Marks the queue closed for producers however the worker exits.
struct CloseOnExit(Arc<AtomicBool>);

impl Drop for CloseOnExit {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

struct Worker<M: MeanModel, V: VolatilityModel, S: EventSink> {
    session: Uuid,
    config: MonitorConfig,
    sink: S,
    rx: Receiver<f64>,
    stop: Arc<AtomicBool>,
    models: Option<(M, V)>,
    warmup: Vec<f64>,
    predictor: Option<Predictor<M, V>>,
    tracker: BaselineTracker,
    summary: WorkerSummary,
}

impl<M: MeanModel, V: VolatilityModel, S: EventSink> Worker<M, V, S> {
    fn run(&mut self) -> Result<()> {
        info!(session = %self.session, warmup = self.config.warmup_samples(), "Monitor worker active.");
        let idle = Duration::from_millis(self.config.worker.idle_poll_ms.max(1));

        loop {
            if self.stop.load(Ordering::Acquire) {
                while let Ok(value) = self.rx.try_recv() {
                    self.process(value)?;
                }
                break;
            }
            match self.rx.recv_timeout(idle) {
                Ok(value) => self.process(value)?,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        Ok(())
    }

    fn process(&mut self, value: f64) -> Result<()> {
        self.summary.received += 1;
        if !value.is_finite() {
            self.summary.rejected += 1;
            warn!(session = %self.session, value, "Rejected non-finite sample");
            return Ok(());
        }
        if value == 0.0 && self.config.baseline.skip_zero_loads {
            self.summary.skipped += 1;
            return Ok(());
        }

        match self.predictor.as_mut() {
            Some(predictor) => match predictor.update_and_predict(value) {
                Ok(out) => {
                    self.summary.forecasts += 1;
                    if out.is_outlier {
                        self.summary.outliers += 1;
                    }
                    if out.is_stale() {
                        self.summary.stale_forecasts += 1;
                    }
                    let sequence = out.sequence;
                    self.emit(out);
                    let every = self.config.worker.backtest_every;
                    if every > 0 && sequence % every == 0 {
                        if let Some(report) = self.predictor.as_ref().map(|p| p.backtest()) {
                            self.emit(report);
                        }
                    }
                }
                Err(e) => {
                    self.summary.rejected += 1;
                    warn!(session = %self.session, error = %e, "Sample rejected by predictor");
                }
            },
            None => self.warm_up(value)?,
        }

        for event in self.tracker.observe(value)? {
            if let BaselineEvent::Deviation(v) = &event {
                self.summary.deviation_checks += 1;
                if v.significant {
                    self.summary.significant_deviations += 1;
                }
            }
            self.emit(event);
        }
        Ok(())
    }

    fn warm_up(&mut self, value: f64) -> Result<()> {
        self.warmup.push(value);
        let needed = self.config.warmup_samples();
        if self.warmup.len() < needed {
            return Ok(());
        }
        let Some((mean, vol)) = self.models.take() else {
            return Ok(());
        };
        debug!(session = %self.session, samples = self.warmup.len(), "Warm-up complete; building predictor");
        let predictor = Predictor::with_models(&self.warmup, self.config.clone(), mean, vol)?;
        self.warmup = Vec::new();
        self.predictor = Some(predictor);
        Ok(())
    }

    fn emit(&mut self, payload: impl Into<EventPayload>) {
        let event = MonitorEvent::new(self.session, payload);
        self.sink.emit(&event);
    }
}
