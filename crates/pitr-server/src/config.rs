//! Server configuration
//!
//! Collector and recoverer settings come from [`pitr_core::config`]; this
//! only covers what the HTTP surface needs.

use pitr_core::config::{Lookup, process_env};
use pitr_core::{Error, Result};
use std::net::SocketAddr;

/// Default listen address of the metrics/health server
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Metrics and health bind address
    pub addr: SocketAddr,
}

impl ServerConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&process_env)
    }

    /// Load through `env`
    pub fn from_lookup(env: Lookup<'_>) -> Result<Self> {
        let raw = env("PITR_HTTP_ADDR")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string());
        let addr = raw
            .parse()
            .map_err(|e| Error::config(format!("invalid PITR_HTTP_ADDR {:?}: {}", raw, e)))?;
        Ok(Self { addr })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_addr() {
        let config = ServerConfig::from_lookup(&|_| None).unwrap();
        assert_eq!(config.addr.port(), 8080);
        assert!(config.addr.ip().is_unspecified());
    }

    #[test]
    fn test_custom_addr() {
        let config = ServerConfig::from_lookup(&|name| {
            (name == "PITR_HTTP_ADDR").then(|| "127.0.0.1:9100".to_string())
        })
        .unwrap();
        assert_eq!(config.addr, "127.0.0.1:9100".parse().unwrap());
    }

    #[test]
    fn test_invalid_addr() {
        let err = ServerConfig::from_lookup(&|_| Some("not-an-addr".to_string())).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
