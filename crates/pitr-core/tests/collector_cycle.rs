//! Tests for the collection cycle
//!
//! - Closed segments are uploaded once, in name order, with manifests
//! - The archived GTID set tracks everything uploaded
//! - A failed upload fails the cycle and the next cycle resumes
//! - The source node is chosen once
//! - After a failover the stored manifests still add up to the archived set

use bytes::Bytes;
use pitr_core::binlog::{ARCHIVED_SET_KEY, ArchivedBinlog, data_key, is_manifest_key};
use pitr_core::storage::{ObjectStorage, Storage, get_text};
use pitr_core::testing::{
    FakeBinlogTool, FakeCluster, FakeConnector, FlakyStorage, IntervalSet, healthy_status, selector,
};
use pitr_core::{Collector, Error, GtidSet, PitrMetrics};
use std::sync::Arc;
use std::sync::atomic::Ordering;

struct Harness {
    connector: FakeConnector,
    tool: FakeBinlogTool,
    storage: Arc<ObjectStorage>,
    metrics: Arc<PitrMetrics>,
}

impl Harness {
    fn new() -> Self {
        let connector = FakeConnector::new();
        Self {
            tool: FakeBinlogTool::new(connector.clone()),
            connector,
            storage: Arc::new(ObjectStorage::in_memory()),
            metrics: Arc::new(PitrMetrics::new()),
        }
    }

    fn collector(&self, hosts: &[&str], storage: Arc<dyn Storage>) -> Collector {
        let cluster = FakeCluster::new(hosts.iter().map(|h| healthy_status(h)).collect());
        Collector::new(
            selector(cluster, self.connector.clone()),
            storage,
            Arc::new(self.tool.clone()),
            self.metrics.clone(),
        )
    }

    async fn archived_set(&self) -> String {
        get_text(self.storage.as_ref(), ARCHIVED_SET_KEY)
            .await
            .unwrap()
            .unwrap_or_default()
    }

    async fn keys(&self) -> Vec<String> {
        self.storage
            .list("")
            .await
            .unwrap()
            .into_iter()
            .map(|info| info.key)
            .collect()
    }

    async fn manifests(&self) -> Vec<ArchivedBinlog> {
        let mut manifests = Vec::new();
        for key in self.keys().await.into_iter().filter(|k| is_manifest_key(k)) {
            let body = self.storage.get(&key).await.unwrap();
            manifests.push(serde_json::from_slice(&body).unwrap());
        }
        manifests
    }

    /// Union of the GTID sets of every stored manifest
    async fn stored_set(&self) -> String {
        let mut union = IntervalSet::default();
        for manifest in self.manifests().await {
            union = union.union(&IntervalSet::parse(manifest.gtid_set.raw()));
        }
        union.to_string()
    }
}

/// node-0 with two closed segments and an empty active one
fn two_segments(connector: &FakeConnector) {
    connector.add_node("node-0");
    connector.commit("node-0", "src:1-100", 1_000, 1_100);
    connector.rotate("node-0");
    connector.commit("node-0", "src:101-200", 2_000, 2_100);
    connector.rotate("node-0");
}

#[tokio::test]
async fn test_first_cycle_archives_closed_segments_in_order() {
    let h = Harness::new();
    two_segments(&h.connector);
    let mut collector = h.collector(&["node-0"], h.storage.clone());

    let report = collector.run().await.unwrap();

    assert_eq!(report.host, "node-0");
    assert_eq!(report.uploaded, vec!["binlog.000001", "binlog.000002"]);
    assert_eq!(report.empty, 1);
    assert_eq!(h.archived_set().await, "src:1-200");
    assert_eq!(
        h.keys().await,
        vec![
            "archived-gtid-set",
            "binlog_0000001000_b8eb5b4a1163bfe2_binlog.000001",
            "binlog_0000001000_b8eb5b4a1163bfe2_binlog.000001.json",
            "binlog_0000002000_12a035a2d32a6b71_binlog.000002",
            "binlog_0000002000_12a035a2d32a6b71_binlog.000002.json",
        ]
    );

    let body = h
        .storage
        .get("binlog_0000002000_12a035a2d32a6b71_binlog.000002.json")
        .await
        .unwrap();
    let manifest: ArchivedBinlog = serde_json::from_slice(&body).unwrap();
    assert_eq!(manifest.name, "binlog.000002");
    assert_eq!(manifest.gtid_set.raw(), "src:101-200");
    assert_eq!((manifest.first_ts, manifest.last_ts), (2_000, 2_100));
    assert_eq!(manifest.host, "node-0");

    let data = h.storage.get(&manifest.data_key()).await.unwrap();
    assert_eq!(data.len() as u64, manifest.size);

    assert_eq!(h.connector.rotations("node-0"), 1);
    assert_eq!(h.metrics.binlogs_uploaded.load(Ordering::Relaxed), 2);
    assert_eq!(h.metrics.cycles_succeeded.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_later_cycles_upload_only_new_segments() {
    let h = Harness::new();
    two_segments(&h.connector);
    let mut collector = h.collector(&["node-0"], h.storage.clone());

    collector.run().await.unwrap();
    let idle = collector.run().await.unwrap();
    assert!(idle.uploaded.is_empty());
    assert_eq!(idle.already_archived, 2);

    // lands in the file opened by the previous rotation
    h.connector.commit("node-0", "src:201-250", 3_000, 3_050);
    let report = collector.run().await.unwrap();
    assert_eq!(report.uploaded, vec!["binlog.000005"]);
    assert_eq!(h.archived_set().await, "src:1-250");

    assert_eq!(h.connector.installs("node-0"), 1);
    assert_eq!(h.connector.rotations("node-0"), 3);
    assert_eq!(h.tool.fetches(), 3);
}

#[tokio::test]
async fn test_failed_upload_fails_cycle_and_next_cycle_resumes() {
    let h = Harness::new();
    two_segments(&h.connector);
    let flaky = FlakyStorage::new(h.storage.clone());
    flaky.drop_puts_ending_with("binlog.000002");
    let mut collector = h.collector(&["node-0"], Arc::new(flaky.clone()));

    let err = collector.run().await.unwrap_err();
    assert!(matches!(err, Error::Storage(_)), "unexpected error: {err}");
    assert_eq!(h.archived_set().await, "src:1-100");
    assert!(!h.keys().await.iter().any(|k| k.contains("binlog.000002")));
    assert_eq!(h.metrics.cycles_failed.load(Ordering::Relaxed), 1);

    flaky.heal();
    let report = collector.run().await.unwrap();
    assert_eq!(report.uploaded, vec!["binlog.000002"]);
    assert_eq!(h.archived_set().await, "src:1-200");
}

#[tokio::test]
async fn test_source_node_is_chosen_once() {
    let h = Harness::new();
    for (host, ts) in [("node-0", 2_000), ("node-1", 1_000)] {
        h.connector.add_node(host);
        h.connector.commit(host, "src:1-10", ts, ts + 10);
        h.connector.rotate(host);
    }
    let mut collector = h.collector(&["node-0", "node-1"], h.storage.clone());

    collector.run().await.unwrap();
    assert_eq!(collector.host(), Some("node-1"));

    h.connector.set_unreachable("node-1", true);
    assert!(matches!(collector.run().await, Err(Error::Connection(_))));
    assert_eq!(collector.host(), Some("node-1"));
    assert_eq!(h.connector.installs("node-0"), 0);
}

#[tokio::test]
async fn test_new_source_skips_covered_segments() {
    let h = Harness::new();
    two_segments(&h.connector);
    h.collector(&["node-0"], h.storage.clone()).run().await.unwrap();

    // node-1 cut its files at different transactions
    h.connector.add_node("node-1");
    h.connector.commit("node-1", "src:1-150", 1_000, 1_500);
    h.connector.rotate("node-1");
    h.connector.commit("node-1", "src:151-250", 1_600, 3_000);
    h.connector.rotate("node-1");
    h.connector.set_unreachable("node-0", true);

    let mut collector = h.collector(&["node-1"], h.storage.clone());
    let report = collector.run().await.unwrap();

    assert_eq!(report.uploaded, vec!["binlog.000002"]);
    assert_eq!(report.already_archived, 1);
    assert_eq!(h.archived_set().await, "src:1-250");
    assert_eq!(h.stored_set().await, "src:1-250");
}

#[tokio::test]
async fn test_failover_with_same_file_name_and_second_keeps_both_segments() {
    let h = Harness::new();
    two_segments(&h.connector);
    h.collector(&["node-0"], h.storage.clone()).run().await.unwrap();

    // node-1's binlog.000002 starts in the same second as node-0's
    h.connector.add_node("node-1");
    h.connector.commit("node-1", "src:1-150", 1_000, 1_900);
    h.connector.rotate("node-1");
    h.connector.commit("node-1", "src:151-250", 2_000, 2_050);
    h.connector.rotate("node-1");
    h.connector.set_unreachable("node-0", true);

    let report = h.collector(&["node-1"], h.storage.clone()).run().await.unwrap();
    assert_eq!(report.uploaded, vec!["binlog.000002"]);

    let manifests = h.manifests().await;
    assert_eq!(manifests.len(), 3);
    assert!(manifests
        .iter()
        .any(|m| m.host == "node-0" && m.gtid_set.raw() == "src:101-200"));
    assert!(manifests
        .iter()
        .any(|m| m.host == "node-1" && m.gtid_set.raw() == "src:151-250"));
    for manifest in &manifests {
        let data = h.storage.get(&manifest.data_key()).await.unwrap();
        assert_eq!(data.len() as u64, manifest.size);
    }
    assert_eq!(h.archived_set().await, "src:1-250");
    assert_eq!(h.stored_set().await, h.archived_set().await);
}

#[tokio::test]
async fn test_upload_never_overwrites_a_different_segment() {
    let h = Harness::new();
    two_segments(&h.connector);
    let taken = data_key(2_000, &GtidSet::new("src:101-200"), "binlog.000002");
    let squatter = ArchivedBinlog {
        name: "binlog.000002".to_string(),
        size: 3,
        encrypted: false,
        gtid_set: GtidSet::new("other:1-3"),
        first_ts: 2_000,
        last_ts: 2_010,
        host: "node-9".to_string(),
    };
    let body = Bytes::from(serde_json::to_vec(&squatter).unwrap());
    h.storage.put(&format!("{taken}.json"), body.clone()).await.unwrap();

    let mut collector = h.collector(&["node-0"], h.storage.clone());
    let err = collector.run().await.unwrap_err();

    assert!(matches!(err, Error::Storage(_)), "unexpected error: {err}");
    assert_eq!(h.archived_set().await, "src:1-100");
    assert_eq!(h.storage.get(&format!("{taken}.json")).await.unwrap(), body);
    assert!(h.storage.head(&taken).await.unwrap().is_none());
}

#[tokio::test]
async fn test_no_healthy_node_fails_cycle() {
    let h = Harness::new();
    let mut collector = h.collector(&[], h.storage.clone());

    assert!(matches!(collector.run().await, Err(Error::NotFound(_))));
    assert!(h.keys().await.is_empty());
}
