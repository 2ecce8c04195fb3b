//! PITR Server - process surface of the binlog collector and recoverer
//!
//! Provides:
//! - the collection loop and the retention cleanup task
//! - the one-shot recovery run
//! - GET /metrics - Prometheus counters
//! - GET /health - liveness

pub mod api;
pub mod config;
pub mod runner;

pub use config::ServerConfig;
