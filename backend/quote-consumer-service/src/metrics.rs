//! Quote Consumer Metrics
//!
//! Prometheus metrics for the consumption loop and the retention job.
//! Everything registers in the default registry; [`render`] produces the text
//! exposition for whatever endpoint or push job scrapes the process.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Encoder, Histogram,
    IntCounter, IntCounterVec, TextEncoder,
};
use std::time::Duration;

static MESSAGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "quote_consumer_messages_total",
        "Messages handled by the consumption loop, by outcome",
        &["outcome"]
    )
    .expect("Failed to register quote consumer messages metric")
});

static APPLY_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "quote_consumer_apply_duration_seconds",
        "Time from first attempt to final outcome for one quote, retries included",
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]
    )
    .expect("Failed to register quote consumer apply duration metric")
});

static RETENTION_RUNS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "quote_consumer_retention_runs_total",
        "Processed-id retention cleanup cycles (success/error)",
        &["status"]
    )
    .expect("Failed to register retention runs metric")
});

static RETENTION_DELETED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "quote_consumer_retention_deleted_total",
        "Processed ids removed by retention cleanup"
    )
    .expect("Failed to register retention deleted metric")
});

/// Record how one message ended: applied, skipped, decode_failed, rejected, dropped or fetch_error
pub fn record_message(outcome: &str) {
    MESSAGES_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_apply_duration(duration: Duration) {
    APPLY_DURATION_SECONDS.observe(duration.as_secs_f64());
}

pub fn record_retention_run(status: &str, deleted: u64) {
    RETENTION_RUNS_TOTAL.with_label_values(&[status]).inc();
    RETENTION_DELETED_TOTAL.inc_by(deleted);
}

/// Encode the default registry in the Prometheus text format
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
