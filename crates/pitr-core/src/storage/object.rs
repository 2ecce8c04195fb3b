//! [`Storage`] on top of `object_store`

use super::{ObjectInfo, Storage};
use crate::config::{AzureConfig, S3Config, StorageConfig};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ClientOptions, ObjectStore, PutPayload};
use std::sync::Arc;

/// Bucket/container plus a key prefix
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    description: String,
}

impl std::fmt::Debug for ObjectStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStorage")
            .field("location", &self.description)
            .field("prefix", &self.prefix)
            .finish()
    }
}

/// Split `bucket/some/prefix` into bucket and normalized prefix
fn split_location(location: &str) -> Result<(String, String)> {
    let location = location
        .trim()
        .trim_start_matches("s3://")
        .trim_matches('/');
    let (bucket, prefix) = location.split_once('/').unwrap_or((location, ""));
    if bucket.is_empty() {
        return Err(Error::config(format!("invalid bucket location {:?}", location)));
    }
    Ok((bucket.to_string(), prefix.trim_matches('/').to_string()))
}

impl ObjectStorage {
    /// Wrap an existing store
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_matches('/').to_string();
        Self {
            description: store.to_string(),
            store,
            prefix,
        }
    }

    /// Memory-backed storage
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), "")
    }

    /// Build the backend selected by `config`
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        match config {
            StorageConfig::S3(s3) => Self::s3(s3),
            StorageConfig::Azure(azure) => Self::azure(azure),
        }
    }

    /// S3 or an S3-compatible endpoint
    pub fn s3(config: &S3Config) -> Result<Self> {
        let (bucket, prefix) = split_location(&config.bucket_url)?;

        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&bucket)
            .with_region(&config.region)
            .with_client_options(
                ClientOptions::new().with_allow_invalid_certificates(!config.verify_tls),
            );

        // Empty keys fall back to the ambient AWS credential chain
        if !config.access_key_id.expose().is_empty() {
            builder = builder
                .with_access_key_id(config.access_key_id.expose())
                .with_secret_access_key(config.secret_access_key.expose());
        }

        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"))
                .with_virtual_hosted_style_request(false);
        }

        let store = builder
            .build()
            .map_err(|e| Error::config(format!("s3 storage for bucket {}: {}", bucket, e)))?;

        tracing::debug!(bucket = %bucket, prefix = %prefix, "using s3 storage");
        Ok(Self::new(Arc::new(store), prefix))
    }

    /// Azure Blob container
    pub fn azure(config: &AzureConfig) -> Result<Self> {
        let (container, prefix) = split_location(&config.container_path)?;

        let mut builder = MicrosoftAzureBuilder::new()
            .with_account(&config.account)
            .with_access_key(config.access_key.expose())
            .with_container_name(&container);

        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let store = builder.build().map_err(|e| {
            Error::config(format!("azure storage for container {}: {}", container, e))
        })?;

        tracing::debug!(container = %container, prefix = %prefix, "using azure storage");
        Ok(Self::new(Arc::new(store), prefix))
    }

    fn path(&self, key: &str) -> Path {
        if self.prefix.is_empty() {
            Path::from(key)
        } else {
            Path::from(format!("{}/{}", self.prefix, key))
        }
    }

    /// Key of `path` relative to the prefix
    fn relative_key(&self, path: &Path) -> String {
        let full = path.as_ref();
        if self.prefix.is_empty() {
            return full.to_string();
        }
        full.strip_prefix(self.prefix.as_str())
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(full)
            .to_string()
    }

    fn info(&self, meta: object_store::ObjectMeta) -> ObjectInfo {
        ObjectInfo {
            key: self.relative_key(&meta.location),
            size: meta.size as u64,
            last_modified: meta.last_modified,
        }
    }
}

#[async_trait]
impl Storage for ObjectStorage {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.store
            .put(&self.path(key), PutPayload::from(data))
            .await
            .map_err(|e| Error::storage(format!("put {}: {}", key, e)))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let result = self.store.get(&self.path(key)).await?;
        Ok(result.bytes().await?)
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectInfo>> {
        match self.store.head(&self.path(key)).await {
            Ok(meta) => Ok(Some(self.info(meta))),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(Error::storage(format!("head {}: {}", key, e))),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        // object_store prefixes match whole path segments, so list the
        // directory and filter on the key text
        let base = (!self.prefix.is_empty()).then(|| Path::from(self.prefix.as_str()));
        let metas: Vec<object_store::ObjectMeta> = self
            .store
            .list(base.as_ref())
            .try_collect()
            .await
            .map_err(|e| Error::storage(format!("list {}: {}", prefix, e)))?;

        let mut objects: Vec<ObjectInfo> = metas
            .into_iter()
            .map(|meta| self.info(meta))
            .filter(|info| info.key.starts_with(prefix) && !info.key.contains('/'))
            .collect();
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self.store.delete(&self.path(key)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(Error::storage(format!("delete {}: {}", key, e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_location() {
        assert_eq!(
            split_location("bucket/cluster-a/binlogs/").unwrap(),
            ("bucket".to_string(), "cluster-a/binlogs".to_string())
        );
        assert_eq!(
            split_location("s3://bucket").unwrap(),
            ("bucket".to_string(), String::new())
        );
        assert!(split_location("/").is_err());
    }

    #[tokio::test]
    async fn test_put_get_head_delete() {
        let storage = ObjectStorage::in_memory();
        storage.put("a", Bytes::from_static(b"hello")).await.unwrap();

        assert_eq!(storage.get("a").await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(storage.head("a").await.unwrap().unwrap().size, 5);
        assert!(storage.head("b").await.unwrap().is_none());
        assert!(storage.get("b").await.unwrap_err().is_not_found());

        storage.delete("a").await.unwrap();
        storage.delete("a").await.unwrap();
        assert!(storage.head("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_under_prefix_is_sorted_and_relative() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let storage = ObjectStorage::new(store.clone(), "cluster-a/");
        let other = ObjectStorage::new(store, "cluster-b");

        for key in ["binlog_2_b", "binlog_1_a", "archived-gtid-set"] {
            storage.put(key, Bytes::from_static(b"x")).await.unwrap();
        }
        other.put("binlog_0_z", Bytes::from_static(b"x")).await.unwrap();

        let keys: Vec<String> = storage
            .list("binlog_")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, vec!["binlog_1_a", "binlog_2_b"]);
        assert_eq!(storage.list("").await.unwrap().len(), 3);
    }
}
