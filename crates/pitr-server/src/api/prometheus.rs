//! Prometheus metrics endpoint

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use pitr_core::PitrMetrics;
use std::sync::Arc;

/// Prometheus metrics endpoint handler
pub async fn prometheus_metrics(State(metrics): State<Arc<PitrMetrics>>) -> impl IntoResponse {
    let formatted = metrics.format_prometheus();

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        formatted,
    )
}
