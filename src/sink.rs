//! Event sinks. Emitting never blocks the worker on a slow consumer.

use crate::signal::{EventPayload, MonitorEvent};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

pub trait EventSink: Send {
    fn emit(&mut self, event: &MonitorEvent);
}

impl<S: EventSink + ?Sized> EventSink for Box<S> {
    fn emit(&mut self, event: &MonitorEvent) {
        (**self).emit(event)
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&mut self, _event: &MonitorEvent) {}
}

/// Forwards events over a bounded channel; full or closed channels drop.
pub struct ChannelSink {
    tx: Sender<MonitorEvent>,
    dropped: Arc<AtomicU64>,
}

impl ChannelSink {
    pub fn bounded(capacity: usize) -> (Self, Receiver<MonitorEvent>) {
        let (tx, rx) = bounded(capacity.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Shared drop counter, readable after the sink has moved to the worker
    pub fn drop_counter(&self) -> Arc<AtomicU64> {
        self.dropped.clone()
    }
}

impl EventSink for ChannelSink {
    fn emit(&mut self, event: &MonitorEvent) {
        match self.tx.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {
                if self.dropped.fetch_add(1, Ordering::Relaxed) == 0 {
                    debug!("Event receiver gone; dropping events");
                }
            }
        }
    }
}

/// One JSON object per line.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
    errors: u64,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, errors: 0 }
    }

    pub fn errors(&self) -> u64 {
        self.errors
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn emit(&mut self, event: &MonitorEvent) {
        let written = serde_json::to_writer(&mut self.writer, event)
            .map_err(std::io::Error::from)
            .and_then(|()| self.writer.write_all(b"\n"))
            .and_then(|()| self.writer.flush());
        if let Err(e) = written {
            self.errors += 1;
            warn!(kind = event.kind(), error = %e, "Failed to write event");
        }
    }
}

/// Logs events: alerts at info, routine forecasts at debug.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&mut self, event: &MonitorEvent) {
        match &event.payload {
            EventPayload::Forecast(p) if p.is_outlier => info!(
                session = %event.session,
                sequence = p.sequence,
                next = p.combined_forecast.first().copied().unwrap_or_default(),
                "Forecast outlier"
            ),
            EventPayload::Forecast(p) => debug!(
                session = %event.session,
                sequence = p.sequence,
                "Forecast"
            ),
            EventPayload::BaselineEstablished(b) => info!(
                session = %event.session,
                center = b.reference_center,
                spread = b.reference_spread,
                "Baseline established"
            ),
            EventPayload::Deviation(v) => info!(
                session = %event.session,
                significant = v.significant,
                shift = v.center_shift,
                peak = v.peak_deviation,
                direction = ?v.direction,
                "Deviation check"
            ),
            EventPayload::Backtest(r) => info!(
                session = %event.session,
                scored = r.scored,
                mae = r.mae,
                rmse = r.rmse,
                "Backtest"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::Backtester;
    use uuid::Uuid;

    fn event() -> MonitorEvent {
        MonitorEvent::new(Uuid::new_v4(), Backtester::new().report())
    }

    #[test]
    fn test_channel_sink_counts_drops() {
        let (mut sink, rx) = ChannelSink::bounded(2);
        for _ in 0..5 {
            sink.emit(&event());
        }
        assert_eq!(rx.len(), 2);
        assert_eq!(sink.dropped(), 3);

        drop(rx);
        sink.emit(&event());
        assert_eq!(sink.drop_counter().load(Ordering::Relaxed), 4);
    }

    #[test]
    fn test_json_lines_sink() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.emit(&event());
        sink.emit(&event());
        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let v: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(v["kind"], "backtest");
        }
    }

    #[test]
    fn test_boxed_sink() {
        let mut sinks: Vec<Box<dyn EventSink>> = vec![Box::new(NullSink), Box::new(TracingSink)];
        for s in sinks.iter_mut() {
            s.emit(&event());
        }
    }
}
