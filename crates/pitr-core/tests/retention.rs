//! Tests for retention cleanup
//!
//! Cleanup at time T with N days deletes exactly the segments whose first
//! record is older than T - N days, leaves everything else, and is
//! idempotent.

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use pitr_core::binlog::{ARCHIVED_SET_KEY, data_key};
use pitr_core::storage::{ObjectStorage, Storage};
use pitr_core::testing::FlakyStorage;
use pitr_core::{GtidSet, PitrMetrics, RetentionCleaner};
use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::Ordering;

const DAY: i64 = 86_400;

fn at(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).unwrap()
}

fn segment_key(first_ts: i64, name: &str) -> String {
    data_key(first_ts, &GtidSet::new("src:1-10"), name)
}

async fn archive(storage: &dyn Storage, first_ts: i64, name: &str) {
    let key = segment_key(first_ts, name);
    storage.put(&key, Bytes::from_static(b"segment")).await.unwrap();
    storage
        .put(&format!("{key}.json"), Bytes::from_static(b"{}"))
        .await
        .unwrap();
}

async fn keys(storage: &dyn Storage) -> Vec<String> {
    storage
        .list("")
        .await
        .unwrap()
        .into_iter()
        .map(|info| info.key)
        .collect()
}

#[tokio::test]
async fn test_cleanup_deletes_exactly_expired_segments() {
    let storage = Arc::new(ObjectStorage::in_memory());
    let now = 100 * DAY;
    archive(storage.as_ref(), now - 10 * DAY, "binlog.000001").await;
    archive(storage.as_ref(), now - 3 * DAY - 1, "binlog.000002").await;
    archive(storage.as_ref(), now - 3 * DAY, "binlog.000003").await;
    archive(storage.as_ref(), now - DAY, "binlog.000004").await;
    storage
        .put(ARCHIVED_SET_KEY, Bytes::from_static(b"src:1-400"))
        .await
        .unwrap();

    let metrics = Arc::new(PitrMetrics::new());
    let cleaner = RetentionCleaner::new(storage.clone(), metrics.clone());
    let report = cleaner.cleanup_older_than(at(now), 3).await.unwrap();

    assert_eq!(report.deleted.len(), 4);
    assert!(report.failed.is_empty());
    let remaining = keys(storage.as_ref()).await;
    assert_eq!(remaining.len(), 5);
    assert!(remaining.iter().any(|k| k == ARCHIVED_SET_KEY));
    assert!(remaining.iter().all(|k| !k.contains("binlog.000001")));
    assert!(remaining.iter().all(|k| !k.contains("binlog.000002")));
    assert_eq!(metrics.cleanup_deleted.load(Ordering::Relaxed), 4);

    let again = cleaner.cleanup_older_than(at(now), 3).await.unwrap();
    assert!(again.deleted.is_empty());
    assert_eq!(keys(storage.as_ref()).await, remaining);
}

#[tokio::test]
async fn test_delete_failure_does_not_stop_cleanup() {
    let inner = Arc::new(ObjectStorage::in_memory());
    let now = 100 * DAY;
    archive(inner.as_ref(), now - 10 * DAY, "binlog.000001").await;
    archive(inner.as_ref(), now - 9 * DAY, "binlog.000002").await;

    let flaky = FlakyStorage::new(inner.clone());
    flaky.fail_deletes_ending_with("binlog.000001");
    let metrics = Arc::new(PitrMetrics::new());
    let cleaner = RetentionCleaner::new(Arc::new(flaky), metrics.clone());

    let report = cleaner.cleanup_older_than(at(now), 1).await.unwrap();
    assert_eq!(report.failed, vec![segment_key(now - 10 * DAY, "binlog.000001")]);
    assert_eq!(report.deleted.len(), 3);
    assert_eq!(keys(inner.as_ref()).await, vec![segment_key(now - 10 * DAY, "binlog.000001")]);
    assert_eq!(metrics.cleanup_failures.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_listing_failure_is_reported() {
    let flaky = FlakyStorage::new(Arc::new(ObjectStorage::in_memory()));
    flaky.fail_lists();
    let cleaner = RetentionCleaner::new(Arc::new(flaky), Arc::new(PitrMetrics::new()));

    assert!(cleaner.cleanup_older_than(at(100 * DAY), 1).await.is_err());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_cleanup_partitions_by_age(
        ages in prop::collection::vec(0i64..20 * DAY, 1..12),
        retention_days in 1u32..15,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            let storage = Arc::new(ObjectStorage::in_memory());
            let now = 1_000 * DAY;
            for (i, age) in ages.iter().enumerate() {
                archive(storage.as_ref(), now - age, &format!("binlog.{:06}", i + 1)).await;
            }

            let cleaner = RetentionCleaner::new(storage.clone(), Arc::new(PitrMetrics::new()));
            cleaner.cleanup_older_than(at(now), retention_days).await.unwrap();

            let cutoff = now - i64::from(retention_days) * DAY;
            let remaining = keys(storage.as_ref()).await;
            for (i, age) in ages.iter().enumerate() {
                let key = segment_key(now - age, &format!("binlog.{:06}", i + 1));
                let kept = remaining.contains(&key);
                prop_assert_eq!(kept, now - age >= cutoff, "key {}", key);
            }
            Ok(())
        })?;
    }
}
