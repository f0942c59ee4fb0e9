//! Prometheus metrics, registered in the default registry on first use.

use once_cell::sync::Lazy;
use prometheus::core::Collector;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, TextEncoder};
use tracing::warn;

fn register<C: Collector + Clone + 'static>(collector: C) -> C {
    if let Err(e) = prometheus::register(Box::new(collector.clone())) {
        warn!(error = %e, "Metric registration failed");
    }
    collector
}

pub static SAMPLES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register(
        IntCounter::new("cogload_samples_total", "Total cognitive-load samples processed")
            .expect("valid metric definition"),
    )
});

pub static SAMPLES_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    register(
        IntCounter::new(
            "cogload_samples_dropped_total",
            "Pending samples evicted because the queue was full",
        )
        .expect("valid metric definition"),
    )
});

/// Labelled by `model`: `arma` or `garch`
pub static FIT_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    register(
        IntCounterVec::new(
            Opts::new(
                "cogload_fit_failures_total",
                "Refits that failed and fell back to the previous forecast",
            ),
            &["model"],
        )
        .expect("valid metric definition"),
    )
});

pub static ORDER_RESELECTIONS: Lazy<IntCounter> = Lazy::new(|| {
    register(
        IntCounter::new(
            "cogload_order_reselections_total",
            "Successful ARMA order re-selections",
        )
        .expect("valid metric definition"),
    )
});

pub static OUTLIERS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register(
        IntCounter::new("cogload_outliers_total", "Forecasts flagged as outliers")
            .expect("valid metric definition"),
    )
});

pub static REFIT_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register(
        Histogram::with_opts(
            HistogramOpts::new(
                "cogload_refit_duration_seconds",
                "Wall time of one ARMA + GARCH update",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
        )
        .expect("valid metric definition"),
    )
});

pub static DEVIATION_CHECKS: Lazy<IntCounter> = Lazy::new(|| {
    register(
        IntCounter::new(
            "cogload_deviation_checks_total",
            "Periodic baseline deviation checks run",
        )
        .expect("valid metric definition"),
    )
});

/// Text exposition of everything in the default registry.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_includes_touched_metrics() {
        SAMPLES_TOTAL.inc();
        FIT_FAILURES.with_label_values(&["arma"]).inc();
        let text = gather_text();
        assert!(text.contains("cogload_samples_total"));
        assert!(text.contains("cogload_fit_failures_total{model=\"arma\"}"));
    }
}
