use crate::errors::{ErrorKind, Result};
use crate::models::BalanceAdjustment;
use lazy_static::lazy_static;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Duration;

lazy_static! {
    // Balance mutation metrics
    pub static ref BALANCE_ADJUSTMENTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("balance_adjustments_total", "Balance adjustments by outcome"),
        &["outcome"]
    ).expect("metric can be created");

    pub static ref BALANCE_ADJUSTMENT_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "balance_adjustment_duration_seconds",
            "Time spent inside the balance adjustment unit of work"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        &["outcome"]
    ).expect("metric can be created");
}

/// Register all metrics with the given registry
pub fn register_metrics(registry: &Registry) -> std::result::Result<(), prometheus::Error> {
    registry.register(Box::new(BALANCE_ADJUSTMENTS_TOTAL.clone()))?;
    registry.register(Box::new(BALANCE_ADJUSTMENT_DURATION.clone()))?;
    Ok(())
}

fn outcome_label(outcome: &Result<BalanceAdjustment>) -> &'static str {
    match outcome {
        Ok(_) => "committed",
        Err(err) => match err.kind() {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Transient => "transient",
            ErrorKind::Unauthorized | ErrorKind::Forbidden => "denied",
            ErrorKind::Internal => "internal",
        },
    }
}

pub fn observe_adjustment(outcome: &Result<BalanceAdjustment>, elapsed: Duration) {
    let label = outcome_label(outcome);
    BALANCE_ADJUSTMENTS_TOTAL.with_label_values(&[label]).inc();
    BALANCE_ADJUSTMENT_DURATION
        .with_label_values(&[label])
        .observe(elapsed.as_secs_f64());
}

/// Generate metrics output in Prometheus text format
pub fn metrics_handler(registry: &Registry) -> std::result::Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
