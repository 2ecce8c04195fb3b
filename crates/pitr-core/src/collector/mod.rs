//! Binlog collector
//!
//! One [`Collector::run`] is a collection cycle: connect to the chosen node,
//! rotate, and archive every closed segment whose transactions are not yet
//! in the archive. Progress is tracked by the `archived-gtid-set` object, the
//! union of everything uploaded so far. It is rewritten after every segment,
//! so a cycle that dies halfway leaves the archive consistent and the next
//! cycle resumes from the first segment not covered.

pub mod retention;

pub use retention::{CleanupReport, RetentionCleaner};

use crate::binlog::{ARCHIVED_SET_KEY, ArchivedBinlog, Binlog, MANIFEST_SUFFIX, data_key};
use crate::cluster::NodeSelector;
use crate::gtid::GtidSet;
use crate::metrics::PitrMetrics;
use crate::node::NodeClient;
use crate::storage::{Storage, get_text};
use crate::tools::BinlogSource;
use crate::{Error, Result};
use bytes::Bytes;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one collection cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Node the cycle read from
    pub host: String,
    /// Segments uploaded, in upload order
    pub uploaded: Vec<String>,
    /// Segments skipped because they carry no transactions
    pub empty: usize,
    /// Segments skipped because the archive already covers them
    pub already_archived: usize,
}

/// Archives closed binlogs from one node into storage
pub struct Collector {
    selector: NodeSelector,
    storage: Arc<dyn Storage>,
    source: Arc<dyn BinlogSource>,
    metrics: Arc<PitrMetrics>,
    host: Option<String>,
}

impl Collector {
    /// Create a collector. The source node is chosen on the first cycle.
    pub fn new(
        selector: NodeSelector,
        storage: Arc<dyn Storage>,
        source: Arc<dyn BinlogSource>,
        metrics: Arc<PitrMetrics>,
    ) -> Self {
        Self {
            selector,
            storage,
            source,
            metrics,
            host: None,
        }
    }

    /// Node chosen as source, once a cycle has picked one
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Run one cycle, failing with [`Error::Timeout`] if it exceeds `deadline`
    pub async fn run_with_deadline(&mut self, deadline: Duration) -> Result<CycleReport> {
        let outcome = tokio::time::timeout(deadline, self.run()).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                self.metrics.record_cycle(false);
                Err(Error::timeout(format!(
                    "collection cycle exceeded {}s",
                    deadline.as_secs()
                )))
            }
        }
    }

    /// Run one collection cycle
    pub async fn run(&mut self) -> Result<CycleReport> {
        let result = self.run_cycle().await;
        self.metrics.record_cycle(result.is_ok());
        result
    }

    async fn run_cycle(&mut self) -> Result<CycleReport> {
        let host = self.source_host().await?;
        let mut node = self
            .selector
            .connector()
            .connect(&host)
            .await
            .map_err(|e| Error::connection(format!("new db connection to {}: {}", host, e)))?;

        let result = self.collect_binlogs(node.as_mut()).await;
        if let Err(e) = node.close().await {
            tracing::debug!(host = %host, "close collector connection: {}", e);
        }
        result
    }

    /// The node picked on the first cycle is kept for the process lifetime.
    async fn source_host(&mut self) -> Result<String> {
        if let Some(host) = &self.host {
            return Ok(host.clone());
        }
        let host = self
            .selector
            .oldest_binlog_host()
            .await
            .map_err(|e| Error::not_found(format!("get host: {}", e)))?;
        tracing::info!(host = %host, "reading binlogs from");
        self.host = Some(host.clone());
        Ok(host)
    }

    async fn archived_set(&self) -> Result<GtidSet> {
        let raw = get_text(self.storage.as_ref(), ARCHIVED_SET_KEY)
            .await
            .map_err(|e| Error::storage(format!("get last uploaded gtid set: {}", e)))?;
        Ok(raw.map(GtidSet::new).unwrap_or_default())
    }

    /// Archive every closed, not yet covered segment of `node`
    pub async fn collect_binlogs(&self, node: &mut dyn NodeClient) -> Result<CycleReport> {
        let host = node.host().to_string();
        node.install_recovery_functions()
            .await
            .map_err(|e| Error::query(format!("install binlog functions on {}: {}", host, e)))?;

        let mut binlogs = node
            .list_binlogs()
            .await
            .map_err(|e| Error::query(format!("get binlog list: {}", e)))?;
        binlogs.sort_by(|a, b| binlog_name_order(&a.name, &b.name));

        let mut archived = self.archived_set().await?;
        let mut report = CycleReport {
            host: host.clone(),
            ..Default::default()
        };

        for mut binlog in binlogs {
            binlog.gtid_set = node
                .gtid_set_of(&binlog.name)
                .await
                .map_err(|e| Error::query(format!("get binlog gtid set: {}", e)))?;

            if binlog.gtid_set.is_empty() {
                tracing::debug!(binlog = %binlog.name, "no transactions, skipping");
                report.empty += 1;
                continue;
            }
            if !archived.is_empty() && node.is_subset_of(&binlog.gtid_set, &archived).await? {
                report.already_archived += 1;
                continue;
            }

            let manifest = self.archive(node, &binlog).await?;

            archived = node.union(&archived, &binlog.gtid_set).await?;
            self.storage
                .put(ARCHIVED_SET_KEY, Bytes::from(archived.raw().to_string()))
                .await
                .map_err(|e| Error::storage(format!("put archived gtid set: {}", e)))?;

            self.metrics.record_upload(manifest.size, manifest.last_ts);
            tracing::info!(
                binlog = %binlog.name,
                key = %manifest.data_key(),
                size = manifest.size,
                "binlog archived"
            );
            report.uploaded.push(binlog.name);
        }

        Ok(report)
    }

    /// Upload one segment and its manifest. The manifest is only written
    /// once the segment bytes are verified in storage.
    async fn archive(&self, node: &mut dyn NodeClient, binlog: &Binlog) -> Result<ArchivedBinlog> {
        let first_ts = node.first_timestamp(&binlog.name).await?;
        let last_ts = node.last_timestamp(&binlog.name).await?;
        self.check_key_free(&data_key(first_ts, &binlog.gtid_set, &binlog.name), binlog)
            .await?;
        let data = self
            .source
            .fetch(node.host(), &binlog.name)
            .await
            .map_err(|e| Error::tool(format!("read binlog {}: {}", binlog.name, e)))?;

        let manifest = ArchivedBinlog {
            name: binlog.name.clone(),
            size: data.len() as u64,
            encrypted: binlog.encrypted,
            gtid_set: binlog.gtid_set.clone(),
            first_ts,
            last_ts,
            host: node.host().to_string(),
        };

        let key = manifest.data_key();
        tracing::debug!(binlog = %binlog.name, key = %key, "uploading");
        self.storage
            .put(&key, data)
            .await
            .map_err(|e| Error::storage(format!("put {} object: {}", binlog.name, e)))?;
        self.verify_upload(&key, manifest.size).await?;

        let body = serde_json::to_vec(&manifest)?;
        self.storage
            .put(&manifest.manifest_key(), Bytes::from(body))
            .await
            .map_err(|e| Error::storage(format!("put {} manifest: {}", binlog.name, e)))?;

        Ok(manifest)
    }

    /// A segment already stored under `key` must hold the same transactions,
    /// anything else would be overwritten by this upload.
    async fn check_key_free(&self, key: &str, binlog: &Binlog) -> Result<()> {
        let manifest_key = format!("{key}{MANIFEST_SUFFIX}");
        if self.storage.head(&manifest_key).await?.is_none() {
            return Ok(());
        }
        let body = self.storage.get(&manifest_key).await?;
        let existing: ArchivedBinlog = serde_json::from_slice(&body)?;
        if existing.gtid_set != binlog.gtid_set {
            return Err(Error::storage(format!(
                "{} already holds {} from {}, not overwriting with {} ({})",
                key, existing.gtid_set, existing.host, binlog.gtid_set, binlog.name
            )));
        }
        Ok(())
    }

    async fn verify_upload(&self, key: &str, size: u64) -> Result<()> {
        match self.storage.head(key).await? {
            Some(info) if info.size == size => Ok(()),
            Some(info) => Err(Error::storage(format!(
                "verify {}: stored {} bytes, uploaded {}",
                key, info.size, size
            ))),
            None => Err(Error::storage(format!("verify {}: object missing after put", key))),
        }
    }
}

/// Order binlog names by numeric suffix width first, so `binlog.1000000`
/// sorts after `binlog.999999`
fn binlog_name_order(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binlog_name_order() {
        let mut names = vec!["binlog.1000000", "binlog.000010", "binlog.999999", "binlog.000009"];
        names.sort_by(|a, b| binlog_name_order(a, b));
        assert_eq!(
            names,
            vec!["binlog.000009", "binlog.000010", "binlog.999999", "binlog.1000000"]
        );
    }
}
