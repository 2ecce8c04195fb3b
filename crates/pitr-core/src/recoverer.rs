//! Point-in-time recovery
//!
//! The recoverer runs against a node restored from a base backup. It reads
//! the backup's GTID position, chains the archived segments onto it by GTID
//! coverage up to the recovery target, and replays them in chain order. A
//! hole in the archive before the target makes the target unreachable. Any
//! failed segment aborts the run: a partially replayed node is a failed
//! recovery.

use crate::binlog::{ArchivedBinlog, is_manifest_key, BINLOG_KEY_PREFIX};
use crate::cluster::NodeSelector;
use crate::config::RecoveryTarget;
use crate::gtid::GtidSet;
use crate::node::NodeClient;
use crate::storage::{Storage, get_text};
use crate::tools::{ApplyOptions, BinlogApplier};
use crate::{Error, Result};
use std::sync::Arc;

/// Object written by the backup tool next to the base backup
pub const BACKUP_BINLOG_INFO_KEY: &str = "xtrabackup_binlog_info";

/// Extract the GTID set from `xtrabackup_binlog_info`.
///
/// The file holds the binlog name, the position, then the executed GTID set,
/// which the tool may wrap over several lines. A file without the third
/// field means the backup was taken with GTIDs disabled.
pub fn parse_binlog_info(contents: &str) -> GtidSet {
    let set: String = contents.split_whitespace().skip(2).collect();
    GtidSet::new(set)
}

/// Segments to replay and how to replay them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPlan {
    /// Segments in replay order
    pub binlogs: Vec<ArchivedBinlog>,
    /// Filters passed to every replay
    pub options: ApplyOptions,
}

/// Outcome of a finished recovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Node the segments were applied to
    pub host: String,
    /// Segments applied, in order
    pub applied: Vec<String>,
}

/// Replays archived binlogs onto a restored node
pub struct Recoverer {
    selector: NodeSelector,
    backup_storage: Arc<dyn Storage>,
    binlog_storage: Arc<dyn Storage>,
    applier: Arc<dyn BinlogApplier>,
    target: RecoveryTarget,
}

impl Recoverer {
    /// Create a recoverer
    pub fn new(
        selector: NodeSelector,
        backup_storage: Arc<dyn Storage>,
        binlog_storage: Arc<dyn Storage>,
        applier: Arc<dyn BinlogApplier>,
        target: RecoveryTarget,
    ) -> Self {
        Self {
            selector,
            backup_storage,
            binlog_storage,
            applier,
            target,
        }
    }

    /// Recover the cluster's primary to the configured target
    pub async fn run(&self) -> Result<RecoveryReport> {
        let host = self
            .selector
            .primary_host()
            .await
            .map_err(|e| Error::not_found(format!("get host: {}", e)))?;
        tracing::info!(host = %host, target = ?self.target, "starting recovery");

        let mut node = self
            .selector
            .connector()
            .connect(&host)
            .await
            .map_err(|e| Error::connection(format!("new db connection to {}: {}", host, e)))?;
        let plan = self.plan(node.as_mut()).await;
        if let Err(e) = node.close().await {
            tracing::debug!(host = %host, "close recoverer connection: {}", e);
        }
        let plan = plan?;

        let applied = self.apply(&host, &plan).await?;
        tracing::info!(host = %host, applied = applied.len(), "recovery finished");
        Ok(RecoveryReport { host, applied })
    }

    /// Work out which segments to replay, using `node` for GTID algebra
    pub async fn plan(&self, node: &mut dyn NodeClient) -> Result<RecoveryPlan> {
        let base = self.backup_gtid_set().await?;
        tracing::info!(base = %base, "base backup gtid set");
        let archived = self.archived_binlogs().await?;

        let binlogs = select_binlogs(node, &archived, &base, &self.target).await?;
        Ok(RecoveryPlan {
            binlogs,
            options: apply_options(&self.target),
        })
    }

    /// Executed GTID set recorded with the base backup
    pub async fn backup_gtid_set(&self) -> Result<GtidSet> {
        let contents = get_text(self.backup_storage.as_ref(), BACKUP_BINLOG_INFO_KEY)
            .await?
            .ok_or_else(|| {
                Error::not_found(format!("{} is missing from backup storage", BACKUP_BINLOG_INFO_KEY))
            })?;
        Ok(parse_binlog_info(&contents))
    }

    /// All archived manifests, in key order
    pub async fn archived_binlogs(&self) -> Result<Vec<ArchivedBinlog>> {
        let objects = self
            .binlog_storage
            .list(BINLOG_KEY_PREFIX)
            .await
            .map_err(|e| Error::storage(format!("list archived binlogs: {}", e)))?;

        let mut binlogs = Vec::new();
        for info in objects.into_iter().filter(|info| is_manifest_key(&info.key)) {
            let body = self.binlog_storage.get(&info.key).await?;
            let manifest: ArchivedBinlog = serde_json::from_slice(&body)?;
            binlogs.push(manifest);
        }
        Ok(binlogs)
    }

    async fn apply(&self, host: &str, plan: &RecoveryPlan) -> Result<Vec<String>> {
        let total = plan.binlogs.len();
        let mut applied = Vec::with_capacity(total);

        for (i, binlog) in plan.binlogs.iter().enumerate() {
            let data = self.binlog_storage.get(&binlog.data_key()).await?;
            if data.len() as u64 != binlog.size {
                return Err(Error::storage(format!(
                    "archived {} is {} bytes, manifest says {}",
                    binlog.name,
                    data.len(),
                    binlog.size
                )));
            }

            tracing::info!(binlog = %binlog.name, step = i + 1, total, "applying");
            self.applier
                .apply(host, &binlog.name, data, &plan.options)
                .await
                .map_err(|e| {
                    Error::apply(format!(
                        "replay {} ({}/{}) after {} applied segments: {}",
                        binlog.name,
                        i + 1,
                        total,
                        applied.len(),
                        e
                    ))
                })?;
            applied.push(binlog.name.clone());
        }
        Ok(applied)
    }
}

/// Replay filters for a target
pub fn apply_options(target: &RecoveryTarget) -> ApplyOptions {
    match target {
        RecoveryTarget::Latest => ApplyOptions::default(),
        RecoveryTarget::Date(date) => ApplyOptions {
            stop_datetime: Some(*date),
            ..Default::default()
        },
        RecoveryTarget::Transaction(gtid) => ApplyOptions {
            exclude_gtids: Some(gtid.and_later()),
            ..Default::default()
        },
        RecoveryTarget::Skip(gtid) => ApplyOptions {
            exclude_gtids: Some(gtid.as_set()),
            ..Default::default()
        },
    }
}

/// Pick the segments to replay from `archived` (in archive order).
///
/// Segments wholly contained in `base` are already in the backup. The rest
/// are chained onto `base` by GTID coverage, then cut according to `target`.
/// A gap in coverage before the target, or an empty result, means the target
/// cannot be reached from this archive.
pub async fn select_binlogs(
    node: &mut dyn NodeClient,
    archived: &[ArchivedBinlog],
    base: &GtidSet,
    target: &RecoveryTarget,
) -> Result<Vec<ArchivedBinlog>> {
    let mut after_backup = Vec::new();
    for binlog in archived {
        if binlog.gtid_set.is_empty() {
            continue;
        }
        if !base.is_empty() && node.is_subset_of(&binlog.gtid_set, base).await? {
            tracing::debug!(binlog = %binlog.name, "already in base backup");
            continue;
        }
        after_backup.push(binlog.clone());
    }

    if after_backup.is_empty() {
        return Err(Error::unreachable("no archived binlogs after the base backup"));
    }

    let newest = after_backup.iter().map(|b| b.last_ts).max().unwrap_or_default();
    let chain = Chain::build(node, after_backup, base).await?;

    match target {
        RecoveryTarget::Latest => {
            chain.check_no_gap(|_| true)?;
            Ok(chain.binlogs)
        }
        RecoveryTarget::Skip(gtid) => {
            chain.check_no_gap(|_| true)?;
            if !node.is_subset_of(&gtid.as_set(), &chain.covered).await? {
                return Err(Error::unreachable(format!(
                    "{} is not archived after the base backup",
                    gtid
                )));
            }
            Ok(chain.binlogs)
        }
        RecoveryTarget::Date(date) => {
            let ts = date.timestamp();
            if newest < ts {
                return Err(Error::unreachable(format!(
                    "archive ends at {} which is before {}",
                    newest,
                    date.format("%Y-%m-%d %H:%M:%S")
                )));
            }
            chain.check_no_gap(|b| b.first_ts <= ts)?;
            let selected: Vec<ArchivedBinlog> =
                chain.binlogs.into_iter().take_while(|b| b.first_ts <= ts).collect();
            if selected.is_empty() {
                return Err(Error::unreachable(format!(
                    "base backup is already past {}",
                    date.format("%Y-%m-%d %H:%M:%S")
                )));
            }
            Ok(selected)
        }
        RecoveryTarget::Transaction(gtid) => {
            let wanted = gtid.as_set();
            if !base.is_empty() && node.is_subset_of(&wanted, base).await? {
                return Err(Error::unreachable(format!("{} is already in the base backup", gtid)));
            }
            let mut selected = Vec::new();
            for binlog in chain.binlogs.iter() {
                let found = node.is_subset_of(&wanted, &binlog.gtid_set).await?;
                selected.push(binlog.clone());
                if found {
                    return Ok(selected);
                }
            }
            chain.check_no_gap(|_| true)?;
            Err(Error::unreachable(format!("no archived binlog contains {}", gtid)))
        }
    }
}

/// Segments linked onto the base backup without holes
struct Chain {
    /// Linked segments, in replay order
    binlogs: Vec<ArchivedBinlog>,
    /// Segments that never followed on from what was covered
    stranded: Vec<ArchivedBinlog>,
    /// Base plus everything linked
    covered: GtidSet,
}

impl Chain {
    /// Link `candidates` onto `base`.
    ///
    /// A segment links once the transactions it adds pick up right after
    /// the covered set for every source. Segments that do not link yet wait
    /// until a later one fills the hole, so segments cut on different nodes
    /// replay in transaction order. Segments adding nothing are dropped.
    async fn build(
        node: &mut dyn NodeClient,
        candidates: Vec<ArchivedBinlog>,
        base: &GtidSet,
    ) -> Result<Self> {
        let mut chain = Self {
            binlogs: Vec::new(),
            stranded: Vec::new(),
            covered: base.clone(),
        };
        for binlog in candidates {
            chain.stranded.push(binlog);
            while chain.link_next(node, !base.is_empty()).await? {}
        }
        Ok(chain)
    }

    /// Link the first waiting segment that follows on, if any
    async fn link_next(&mut self, node: &mut dyn NodeClient, anchored: bool) -> Result<bool> {
        let mut i = 0;
        while i < self.stranded.len() {
            let set = self.stranded[i].gtid_set.clone();
            let added = if self.covered.is_empty() {
                set.clone()
            } else {
                node.subtract(&set, &self.covered).await?
            };
            if added.is_empty() {
                let dropped = self.stranded.remove(i);
                tracing::debug!(binlog = %dropped.name, host = %dropped.host, "covered by earlier segments");
                continue;
            }
            if follows_on(node, &added, &self.covered, anchored).await? {
                self.covered = if self.covered.is_empty() {
                    set
                } else {
                    node.union(&self.covered, &set).await?
                };
                let linked = self.stranded.remove(i);
                self.binlogs.push(linked);
                return Ok(true);
            }
            i += 1;
        }
        Ok(false)
    }

    /// Fail on the first stranded segment `needed` selects
    fn check_no_gap(&self, needed: impl Fn(&ArchivedBinlog) -> bool) -> Result<()> {
        match self.stranded.iter().find(|b| needed(b)) {
            Some(binlog) => Err(Error::unreachable(format!(
                "gap in archive: {} from {} ({}) does not follow {}",
                binlog.name, binlog.host, binlog.gtid_set, self.covered
            ))),
            None => Ok(()),
        }
    }
}

/// Whether every source in `added` starts right after `covered`. Without a
/// base position (`anchored` false) a source seen for the first time may
/// start anywhere.
async fn follows_on(
    node: &mut dyn NodeClient,
    added: &GtidSet,
    covered: &GtidSet,
    anchored: bool,
) -> Result<bool> {
    let known = covered.first_transactions();
    for first in added.first_transactions() {
        let Some(before) = first.preceding() else {
            continue;
        };
        if !anchored && !known.iter().any(|g| g.source() == first.source()) {
            continue;
        }
        if covered.is_empty() || !node.is_subset_of(&before, covered).await? {
            return Ok(false);
        }
    }
    Ok(true)
}
