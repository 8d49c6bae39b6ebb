use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};
use std::sync::LazyLock;

pub static CALLBACKS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "aps_storefront_callbacks_total",
        "Inbound payment callbacks by source and verification result",
        &["source", "result"]
    )
    .unwrap()
});

pub static PURCHASES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "aps_storefront_purchase_total",
        "Server-to-server purchase requests",
        &["flow", "result"]
    )
    .unwrap()
});

pub static PURCHASE_LATENCY: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "aps_storefront_purchase_duration_seconds",
        "Gateway purchase latency in seconds",
        &["flow"],
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .unwrap()
});

pub fn metrics_output() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
