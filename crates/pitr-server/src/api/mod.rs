//! HTTP endpoints

pub mod health;
pub mod prometheus;

use axum::{Router, routing::get};
use pitr_core::PitrMetrics;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Router serving `/health` and `/metrics`
pub fn router(metrics: Arc<PitrMetrics>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/metrics", get(prometheus::prometheus_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(metrics)
}
