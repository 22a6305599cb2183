use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, TextEncoder, opts, register_int_counter,
    register_int_counter_vec,
};

pub static MESSAGES_DELIVERED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "inbox_messages_delivered_total",
        "Total number of per-receiver message copies stored"
    ))
    .unwrap()
});

pub static DELIVERY_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "inbox_delivery_failures_total",
        "Total number of per-receiver message copies that could not be stored"
    ))
    .unwrap()
});

pub static MESSAGES_READ_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "inbox_messages_read_total",
        "Total number of messages returned by read"
    ))
    .unwrap()
});

pub static AUTH_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("inbox_auth_failures_total", "Denied requests by reason"),
        &["reason"]
    )
    .unwrap()
});

pub static OPERATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("inbox_operations_total", "Inbox operations by outcome"),
        &["operation", "outcome"]
    )
    .unwrap()
});

pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}
