//! Task supervision for the `collect` and `recover` commands
//!
//! Every task owns its own storage and database handles. The only state
//! they share is the metrics counters and the cancellation token.

use anyhow::Context;
use pitr_core::cluster::PeerListTopology;
use pitr_core::config::{ClusterAccess, RetentionConfig};
use pitr_core::node::MysqlConnector;
use pitr_core::storage::{ObjectStorage, Storage};
use pitr_core::tools::MysqlBinlogTool;
use pitr_core::{
    Collector, CollectorConfig, NodeSelector, PitrMetrics, Recoverer, RecovererConfig,
    RetentionCleaner,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

fn node_selector(cluster: &ClusterAccess) -> NodeSelector {
    let connector = MysqlConnector::new(cluster.user.clone(), cluster.pass.expose());
    NodeSelector::new(
        Arc::new(PeerListTopology::default()),
        Arc::new(connector),
        cluster.service.clone(),
    )
}

fn binlog_tool(cluster: &ClusterAccess) -> MysqlBinlogTool {
    MysqlBinlogTool::new(cluster.user.clone(), cluster.pass.clone())
}

/// Run the collector until cancelled or until a cycle fails
pub async fn run_collector(
    config: CollectorConfig,
    metrics: Arc<PitrMetrics>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let storage = ObjectStorage::from_config(&config.storage).context("create storage")?;
    info!(storage = ?storage, span = ?config.collect_span, "starting collector");

    let cleanup = if config.retention.enabled() {
        let storage =
            ObjectStorage::from_config(&config.storage).context("create cleanup storage")?;
        let cleaner = RetentionCleaner::new(Arc::new(storage), metrics.clone());
        Some(tokio::spawn(run_cleanup(
            cleaner,
            config.retention,
            shutdown.clone(),
        )))
    } else {
        info!("retention cleanup disabled");
        None
    };

    let mut collector = Collector::new(
        node_selector(&config.cluster),
        Arc::new(storage),
        Arc::new(binlog_tool(&config.cluster)),
        metrics,
    );
    let result = collection_loop(&mut collector, config.collect_span, &shutdown).await;

    // a fatal cycle takes the cleanup task down with it
    shutdown.cancel();
    if let Some(handle) = cleanup {
        if let Err(e) = handle.await {
            warn!("cleanup task: {}", e);
        }
    }
    result
}

/// Run collection cycles `span` apart. Cancellation is observed between
/// cycles; a cycle that fails or runs longer than `span` ends the loop with
/// an error.
pub async fn collection_loop(
    collector: &mut Collector,
    span: Duration,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let report = collector
            .run_with_deadline(span)
            .await
            .context("collect binlogs")?;
        if report.uploaded.is_empty() {
            debug!(host = %report.host, "no new binlogs");
        } else {
            info!(host = %report.host, uploaded = report.uploaded.len(), "collection cycle finished");
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(span) => {}
        }
    }

    info!("collector stopped");
    Ok(())
}

/// Run retention cleanup now and then every `retention.cleanup_interval`
/// until cancelled. Failures are logged and retried on the next tick.
pub async fn run_cleanup(
    cleaner: RetentionCleaner,
    retention: RetentionConfig,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(retention.cleanup_interval);
    info!(
        retention_days = retention.retention_days,
        interval = ?retention.cleanup_interval,
        "starting retention cleanup"
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = cleaner.cleanup_old_binlogs(retention.retention_days).await {
                    warn!("retention cleanup failed: {}", e);
                }
            }
        }
    }
    debug!("retention cleanup stopped");
}

/// Replay archived binlogs up to the configured target
pub async fn run_recoverer(config: RecovererConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let backup: Arc<dyn Storage> = Arc::new(
        ObjectStorage::from_config(&config.backup_storage).context("create backup storage")?,
    );
    let binlogs: Arc<dyn Storage> = Arc::new(
        ObjectStorage::from_config(&config.binlog_storage).context("create binlog storage")?,
    );
    let recoverer = Recoverer::new(
        node_selector(&config.cluster),
        backup,
        binlogs,
        Arc::new(binlog_tool(&config.cluster)),
        config.target,
    );

    tokio::select! {
        _ = shutdown.cancelled() => anyhow::bail!("recovery interrupted"),
        result = recoverer.run() => {
            let report = result.context("recover")?;
            info!(host = %report.host, applied = report.applied.len(), "recovery complete");
            Ok(())
        }
    }
}
