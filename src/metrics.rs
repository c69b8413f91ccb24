use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{opts, register_int_counter, Encoder, IntCounter, TextEncoder};

pub static CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "reclaim_connections_total",
        "Total number of client connections"
    ))
    .unwrap()
});

pub static MESSAGES_INGESTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "reclaim_messages_ingested_total",
        "Total number of messages persisted from inbound frames"
    ))
    .unwrap()
});

pub static MESSAGES_DELIVERED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "reclaim_messages_delivered_total",
        "Total number of messages pushed to a live recipient"
    ))
    .unwrap()
});

pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}
