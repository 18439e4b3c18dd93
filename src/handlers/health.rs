//! Health and infrastructure handlers: liveness with dependency check and
//! the Prometheus scrape endpoint.

use axum::{extract::State, http::StatusCode, response::Json};
use chrono::Utc;

use super::state::AppState;
use super::types::HealthResponse;
use crate::metrics;

/// GET /health - liveness plus a store round-trip.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let store = state.store().clone();
    let store_ok = tokio::task::spawn_blocking(move || store.ping())
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false);

    let (status_code, status, store_status) = if store_ok {
        (StatusCode::OK, "healthy", "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded", "unreachable")
    };

    (
        status_code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            store: store_status,
            adapters: state.adapter_mode(),
            timestamp: Utc::now(),
        }),
    )
}

/// GET /metrics - Prometheus text format.
pub async fn metrics_endpoint() -> Result<String, StatusCode> {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let metric_families = metrics::METRICS_REGISTRY.gather();

    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
