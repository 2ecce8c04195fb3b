//! Error types for PITR Core

use thiserror::Error;

/// Result type alias using the PITR error
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for binlog collection and recovery
#[derive(Error, Debug)]
pub enum Error {
    /// Unknown or missing required setting
    #[error("Configuration error: {0}")]
    Config(String),

    /// A node or a storage endpoint could not be reached
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query or scan failure against an open connection
    #[error("Query error: {0}")]
    Query(String),

    /// Object storage failures
    #[error("Storage error: {0}")]
    Storage(String),

    /// Host, object or binlog not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// No archived binlog covers the requested recovery target
    #[error("Recovery target unreachable: {0}")]
    RecoveryTargetUnreachable(String),

    /// Replay of a binlog against the target node failed
    #[error("Apply error: {0}")]
    Apply(String),

    /// External helper (peer-list, mysqlbinlog) failed
    #[error("Tool error: {0}")]
    Tool(String),

    /// Deadline exceeded
    #[error("Timeout: {0}")]
    Timeout(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a query error
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a recovery-target-unreachable error
    pub fn unreachable(msg: impl Into<String>) -> Self {
        Self::RecoveryTargetUnreachable(msg.into())
    }

    /// Create an apply error
    pub fn apply(msg: impl Into<String>) -> Self {
        Self::Apply(msg.into())
    }

    /// Create a tool error
    pub fn tool(msg: impl Into<String>) -> Self {
        Self::Tool(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Whether this error means "nothing there" rather than a failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<object_store::Error> for Error {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => Self::NotFound(path),
            other => Self::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_context() {
        let err = Error::query("show binary logs: lost connection");
        assert_eq!(
            err.to_string(),
            "Query error: show binary logs: lost connection"
        );
        assert!(!err.is_not_found());
        assert!(Error::not_found("binlog_1").is_not_found());
    }

    #[test]
    fn test_object_store_not_found_maps_to_not_found() {
        let err: Error = object_store::Error::NotFound {
            path: "archived-gtid-set".to_string(),
            source: "missing".into(),
        }
        .into();
        assert!(err.is_not_found());
    }
}
