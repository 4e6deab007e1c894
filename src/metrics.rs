//! Prometheus metrics.
//!
//! Components report through [`MetricsSink`] so tests can run without the
//! global registry; [`PrometheusSink`] is the production implementation
//! backed by the lazily-initialized collectors below.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};

lazy_static! {
    pub static ref BRIDGE_TX_TOTAL: CounterVec = register_counter_vec!(
        "bridge_tx_total",
        "Bridge transactions processed, by direction and status",
        &["direction", "status"]
    )
    .unwrap();
    pub static ref TOKEN_AMOUNT: HistogramVec = register_histogram_vec!(
        "bridge_token_amount",
        "Token amounts moved through the bridge",
        &["direction", "token"],
        prometheus::exponential_buckets(1.0, 10.0, 18).unwrap()
    )
    .unwrap();
    pub static ref BLOCK_HEIGHT: GaugeVec = register_gauge_vec!(
        "bridge_block_height",
        "Chain block heights, by kind (handled or tip)",
        &["chain", "kind"]
    )
    .unwrap();
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "bridge_errors_total",
        "Errors encountered, by component",
        &["component"]
    )
    .unwrap();
    pub static ref UP: Gauge =
        register_gauge!("bridge_operator_up", "Whether the operator is running").unwrap();
}

/// Render all registered metrics in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Metrics reporting surface used by the watcher and dispatcher.
pub trait MetricsSink: Send + Sync + 'static {
    fn bridge_tx(&self, direction: &str, status: &str);
    fn token_amount(&self, direction: &str, token: &str, amount: f64);
    fn block_height(&self, chain: &str, kind: &str, height: u64);
    fn error(&self, component: &str);
}

/// Reports into the process-wide Prometheus registry.
#[derive(Clone, Copy, Default)]
pub struct PrometheusSink;

impl MetricsSink for PrometheusSink {
    fn bridge_tx(&self, direction: &str, status: &str) {
        BRIDGE_TX_TOTAL.with_label_values(&[direction, status]).inc();
    }

    fn token_amount(&self, direction: &str, token: &str, amount: f64) {
        TOKEN_AMOUNT
            .with_label_values(&[direction, token])
            .observe(amount);
    }

    fn block_height(&self, chain: &str, kind: &str, height: u64) {
        BLOCK_HEIGHT
            .with_label_values(&[chain, kind])
            .set(height as f64);
    }

    fn error(&self, component: &str) {
        ERRORS_TOTAL.with_label_values(&[component]).inc();
    }
}

/// Discards every report. Used in tests.
#[derive(Clone, Copy, Default)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn bridge_tx(&self, _direction: &str, _status: &str) {}
    fn token_amount(&self, _direction: &str, _token: &str, _amount: f64) {}
    fn block_height(&self, _chain: &str, _kind: &str, _height: u64) {}
    fn error(&self, _component: &str) {}
}
