use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec, TextEncoder,
};

static RATE_LIMIT_DECISIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rate_limit_decisions_total",
        "Total number of sliding window decisions",
        &["decision"]
    )
    .unwrap()
});

static RATE_LIMIT_STORE_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "rate_limit_store_errors_total",
        "Total number of failed store batches"
    )
    .unwrap()
});

static RATE_LIMIT_BATCH_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "rate_limit_batch_duration_seconds",
        "Round trip latency of a limiter store batch in seconds",
        vec![0.0001, 0.0005, 0.001, 0.005, 0.010, 0.050, 0.100, 0.500]
    )
    .unwrap()
});

pub struct MetricsRecorder;

impl MetricsRecorder {
    pub fn record_decision(allowed: bool) {
        let decision = if allowed { "allowed" } else { "rejected" };
        RATE_LIMIT_DECISIONS_TOTAL
            .with_label_values(&[decision])
            .inc();
    }

    pub fn record_store_error() {
        RATE_LIMIT_STORE_ERRORS_TOTAL.inc();
    }

    pub fn record_batch_duration(duration: f64) {
        RATE_LIMIT_BATCH_DURATION.observe(duration);
    }

    /// Export all metrics in Prometheus format
    pub fn export() -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        encoder.encode_to_string(&metric_families)
    }
}
