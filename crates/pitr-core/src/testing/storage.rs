use crate::storage::{ObjectInfo, ObjectStorage, Storage};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Faults {
    drop_puts: Option<String>,
    fail_deletes: Option<String>,
    fail_lists: bool,
}

/// Storage wrapper injecting faults into an inner [`ObjectStorage`]
#[derive(Debug, Clone)]
pub struct FlakyStorage {
    inner: Arc<ObjectStorage>,
    faults: Arc<Mutex<Faults>>,
}

impl FlakyStorage {
    /// Wrap `inner` without any fault
    pub fn new(inner: Arc<ObjectStorage>) -> Self {
        Self {
            inner,
            faults: Arc::default(),
        }
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Silently lose puts of keys ending in `suffix`
    pub fn drop_puts_ending_with(&self, suffix: &str) {
        self.faults().drop_puts = Some(suffix.to_string());
    }

    /// Fail deletes of keys ending in `suffix`
    pub fn fail_deletes_ending_with(&self, suffix: &str) {
        self.faults().fail_deletes = Some(suffix.to_string());
    }

    /// Fail every listing
    pub fn fail_lists(&self) {
        self.faults().fail_lists = true;
    }

    /// Remove all faults
    pub fn heal(&self) {
        *self.faults() = Faults::default();
    }
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let dropped = self.faults().drop_puts.as_ref().is_some_and(|s| key.ends_with(s.as_str()));
        if dropped {
            return Ok(());
        }
        self.inner.put(key, data).await
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        self.inner.get(key).await
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectInfo>> {
        self.inner.head(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        if self.faults().fail_lists {
            return Err(Error::storage("list: service unavailable"));
        }
        self.inner.list(prefix).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let failing = self.faults().fail_deletes.as_ref().is_some_and(|s| key.ends_with(s.as_str()));
        if failing {
            return Err(Error::storage(format!("delete {}: access denied", key)));
        }
        self.inner.delete(key).await
    }
}
