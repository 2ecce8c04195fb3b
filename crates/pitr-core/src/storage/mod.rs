//! Object storage capability
//!
//! Collector and recoverer only see [`Storage`]: keys are relative to the
//! cluster's archive prefix, listings come back sorted by key. The concrete
//! backend is an [`ObjectStorage`] built for S3-compatible stores, Azure Blob
//! or memory.

pub mod object;

pub use object::ObjectStorage;

use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

/// Listing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Key relative to the storage prefix
    pub key: String,
    /// Stored size in bytes
    pub size: u64,
    /// Backend modification time
    pub last_modified: DateTime<Utc>,
}

/// Put/get/list/delete over one bucket prefix
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write (or overwrite) an object
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    /// Read a whole object. Missing objects are [`Error::NotFound`](crate::Error::NotFound).
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Metadata of an object, `None` if it does not exist
    async fn head(&self, key: &str) -> Result<Option<ObjectInfo>>;

    /// Objects whose key starts with `prefix`, sorted by key
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>>;

    /// Delete an object. Deleting a missing object succeeds.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Read an object as UTF-8 text, `None` if it does not exist
pub async fn get_text(storage: &dyn Storage, key: &str) -> Result<Option<String>> {
    match storage.get(key).await {
        Ok(data) => Ok(Some(String::from_utf8_lossy(&data).into_owned())),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}
