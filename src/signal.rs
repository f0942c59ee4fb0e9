//! Output records handed to sinks.

use crate::algo::arma::ModelOrder;
use crate::backtest::BacktestReport;
use crate::baseline::{Baseline, BaselineEvent, DeviationVerdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Everything one `update_and_predict` produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionOutput {
    /// 1-based count of live updates
    pub sequence: u64,
    pub arma_forecast: Vec<f64>,
    pub garch_forecast: Vec<f64>,
    pub combined_forecast: Vec<f64>,
    /// Column means of the forecast matrix after this update
    pub average_forecast: Vec<f64>,
    pub is_outlier: bool,
    pub order: ModelOrder,
    /// The ARMA refit failed and the previous forecast was reused
    pub arma_stale: bool,
    /// The GARCH refit failed and the previous forecast was reused
    pub garch_stale: bool,
}

impl PredictionOutput {
    pub fn is_stale(&self) -> bool {
        self.arma_stale || self.garch_stale
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Forecast(PredictionOutput),
    BaselineEstablished(Baseline),
    Deviation(DeviationVerdict),
    Backtest(BacktestReport),
}

impl From<BaselineEvent> for EventPayload {
    fn from(event: BaselineEvent) -> Self {
        match event {
            BaselineEvent::Established(b) => EventPayload::BaselineEstablished(b),
            BaselineEvent::Deviation(v) => EventPayload::Deviation(v),
        }
    }
}

/// A payload stamped with its session and emission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorEvent {
    pub session: Uuid,
    pub emitted_at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl MonitorEvent {
    pub fn new(session: Uuid, payload: impl Into<EventPayload>) -> Self {
        Self {
            session,
            emitted_at: Utc::now(),
            payload: payload.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.payload {
            EventPayload::Forecast(_) => "forecast",
            EventPayload::BaselineEstablished(_) => "baseline_established",
            EventPayload::Deviation(_) => "deviation",
            EventPayload::Backtest(_) => "backtest",
        }
    }

    /// Outlier forecasts and significant deviations
    pub fn is_alert(&self) -> bool {
        match &self.payload {
            EventPayload::Forecast(p) => p.is_outlier,
            EventPayload::Deviation(v) => v.significant,
            _ => false,
        }
    }
}

impl From<PredictionOutput> for EventPayload {
    fn from(p: PredictionOutput) -> Self {
        EventPayload::Forecast(p)
    }
}

impl From<BacktestReport> for EventPayload {
    fn from(r: BacktestReport) -> Self {
        EventPayload::Backtest(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output() -> PredictionOutput {
        PredictionOutput {
            sequence: 3,
            arma_forecast: vec![2.5, 0.1],
            garch_forecast: vec![0.4, 0.4],
            combined_forecast: vec![2.9, 0.5],
            average_forecast: vec![0.29, 0.05],
            is_outlier: true,
            order: ModelOrder::new(2, 3),
            arma_stale: false,
            garch_stale: true,
        }
    }

    #[test]
    fn test_event_json_is_tagged_and_flat() {
        let event = MonitorEvent::new(Uuid::new_v4(), output());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "forecast");
        assert_eq!(json["sequence"], 3);
        assert_eq!(json["order"]["q"], 3);
        assert!(json["session"].is_string());

        let back: MonitorEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.session, event.session);
        assert_eq!(back.emitted_at, event.emitted_at);
        assert!(matches!(back.payload, EventPayload::Forecast(ref p) if p.garch_stale));
        assert!(back.is_alert());
    }

    #[test]
    fn test_baseline_event_conversion() {
        let b = Baseline {
            reference_center: 1.0,
            reference_spread: 0.5,
            established_at: 500,
        };
        let event = MonitorEvent::new(Uuid::nil(), BaselineEvent::Established(b));
        assert_eq!(event.kind(), "baseline_established");
        assert!(!event.is_alert());
    }
}
