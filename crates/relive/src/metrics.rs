//! Process-wide counters, scraped from the replay servers.

use axum::http::StatusCode;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, TextEncoder};

/// Manifests successfully ingested by this process.
pub static PROCESSED: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new("relive_processed", "Processed manifests")
        .expect("counter definition");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .ok();
    counter
});

/// Axum handler exposing the default registry in text format.
pub async fn metrics_handler() -> Result<String, StatusCode> {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if encoder
        .encode(&prometheus::default_registry().gather(), &mut buffer)
        .is_err()
    {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
