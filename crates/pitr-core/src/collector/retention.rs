//! Retention cleanup of archived segments
//!
//! Age is taken from the first-record timestamp embedded in every object
//! key, so cleanup never has to read manifests. Manifests of an expired
//! segment are deleted before its data so that a half-finished run never
//! leaves a manifest pointing at nothing.

use crate::binlog::{BINLOG_KEY_PREFIX, is_manifest_key, timestamp_from_key};
use crate::metrics::PitrMetrics;
use crate::storage::Storage;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// Outcome of one cleanup run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Keys removed
    pub deleted: Vec<String>,
    /// Keys that could not be removed
    pub failed: Vec<String>,
}

/// Deletes archived objects past their retention
pub struct RetentionCleaner {
    storage: Arc<dyn Storage>,
    metrics: Arc<PitrMetrics>,
}

impl RetentionCleaner {
    /// Create a cleaner over the archive in `storage`
    pub fn new(storage: Arc<dyn Storage>, metrics: Arc<PitrMetrics>) -> Self {
        Self { storage, metrics }
    }

    /// Delete every segment whose first record is more than `retention_days`
    /// days old. `0` disables cleanup.
    pub async fn cleanup_old_binlogs(&self, retention_days: u32) -> Result<CleanupReport> {
        self.cleanup_older_than(Utc::now(), retention_days).await
    }

    /// Same as [`cleanup_old_binlogs`](Self::cleanup_old_binlogs) with an
    /// explicit "now"
    pub async fn cleanup_older_than(
        &self,
        now: DateTime<Utc>,
        retention_days: u32,
    ) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        if retention_days == 0 {
            return Ok(report);
        }

        let cutoff = now.timestamp() - i64::from(retention_days) * SECONDS_PER_DAY;
        let objects = match self.storage.list(BINLOG_KEY_PREFIX).await {
            Ok(objects) => objects,
            Err(e) => {
                self.metrics.record_cleanup(0, 1);
                return Err(Error::storage(format!("list archived binlogs: {}", e)));
            }
        };

        let (mut manifests, data): (Vec<String>, Vec<String>) = objects
            .into_iter()
            .map(|info| info.key)
            .filter(|key| timestamp_from_key(key).is_some_and(|ts| ts < cutoff))
            .partition(|key| is_manifest_key(key));
        manifests.extend(data);

        for key in manifests {
            match self.storage.delete(&key).await {
                Ok(()) => {
                    tracing::debug!(key = %key, "deleted expired object");
                    report.deleted.push(key);
                }
                Err(e) => {
                    tracing::warn!(key = %key, "failed to delete expired object: {}", e);
                    report.failed.push(key);
                }
            }
        }

        self.metrics
            .record_cleanup(report.deleted.len() as u64, report.failed.len() as u64);
        if !report.deleted.is_empty() || !report.failed.is_empty() {
            tracing::info!(
                deleted = report.deleted.len(),
                failed = report.failed.len(),
                retention_days,
                "retention cleanup finished"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ObjectStorage;
    use bytes::Bytes;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_zero_retention_keeps_everything() {
        let storage = Arc::new(ObjectStorage::in_memory());
        storage
            .put(
                "binlog_0000000001_a38ef23cee83e86c_binlog.000001",
                Bytes::from_static(b"x"),
            )
            .await
            .unwrap();
        let cleaner = RetentionCleaner::new(storage.clone(), Arc::new(PitrMetrics::new()));

        let now = Utc.timestamp_opt(10 * SECONDS_PER_DAY, 0).unwrap();
        let report = cleaner.cleanup_older_than(now, 0).await.unwrap();

        assert!(report.deleted.is_empty());
        assert_eq!(storage.list("").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_manifest_deleted_before_data() {
        let storage = Arc::new(ObjectStorage::in_memory());
        for key in [
            "binlog_0000000100_a38ef23cee83e86c_binlog.000001",
            "binlog_0000000100_a38ef23cee83e86c_binlog.000001.json",
        ] {
            storage.put(key, Bytes::from_static(b"x")).await.unwrap();
        }
        let cleaner = RetentionCleaner::new(storage, Arc::new(PitrMetrics::new()));

        let now = Utc.timestamp_opt(100 + 2 * SECONDS_PER_DAY, 0).unwrap();
        let report = cleaner.cleanup_older_than(now, 1).await.unwrap();

        assert_eq!(
            report.deleted,
            vec![
                "binlog_0000000100_a38ef23cee83e86c_binlog.000001.json".to_string(),
                "binlog_0000000100_a38ef23cee83e86c_binlog.000001".to_string(),
            ]
        );
    }
}
