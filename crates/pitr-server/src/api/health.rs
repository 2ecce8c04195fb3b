//! Liveness endpoint

/// Health check handler. The process is alive as long as it answers; a
/// failed collection cycle terminates it.
pub async fn health_check() -> &'static str {
    "ok"
}
