use super::gtid::IntervalSet;
use crate::binlog::Binlog;
use crate::gtid::GtidSet;
use crate::node::{ExtensionInstaller, NodeClient, NodeConnector};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// One binlog file on a fake node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentState {
    /// File name
    pub name: String,
    /// Transactions written to it
    pub gtid_set: IntervalSet,
    /// First record, 0 while empty
    pub first_ts: i64,
    /// Last record, 0 while empty
    pub last_ts: i64,
    /// Bytes written
    pub size: u64,
}

impl SegmentState {
    fn new(index: usize) -> Self {
        Self {
            name: format!("binlog.{:06}", index),
            gtid_set: IntervalSet::default(),
            first_ts: 0,
            last_ts: 0,
            size: 0,
        }
    }

    /// Contents [`FakeBinlogTool`](super::FakeBinlogTool) hands out for
    /// this segment
    pub fn contents(&self) -> String {
        format!("{}|{}|{}|{}", self.name, self.gtid_set, self.first_ts, self.last_ts)
    }
}

#[derive(Debug)]
struct NodeState {
    segments: Vec<SegmentState>,
    next_index: usize,
    extension_installed: bool,
    installs: usize,
    rotations: usize,
    unreachable: bool,
}

impl NodeState {
    fn new() -> Self {
        Self {
            segments: vec![SegmentState::new(1)],
            next_index: 2,
            extension_installed: false,
            installs: 0,
            rotations: 0,
            unreachable: false,
        }
    }

    fn rotate(&mut self) {
        self.segments.push(SegmentState::new(self.next_index));
        self.next_index += 1;
    }

    fn segment(&self, name: &str) -> Option<&SegmentState> {
        self.segments.iter().find(|s| s.name == name)
    }
}

type Nodes = Arc<Mutex<HashMap<String, NodeState>>>;

fn lock(nodes: &Nodes) -> MutexGuard<'_, HashMap<String, NodeState>> {
    nodes.lock().unwrap_or_else(|e| e.into_inner())
}

/// Connector over a set of in-memory nodes.
///
/// Every node starts with one empty active binlog. [`commit`](Self::commit)
/// writes into the active file, [`rotate`](Self::rotate) (and every
/// `list_binlogs` call, as on a real node) closes it and opens the next one.
#[derive(Debug, Clone, Default)]
pub struct FakeConnector {
    nodes: Nodes,
}

impl FakeConnector {
    /// No nodes
    pub fn new() -> Self {
        Self::default()
    }

    fn with_node<T>(&self, host: &str, f: impl FnOnce(&mut NodeState) -> T) -> T {
        let mut nodes = lock(&self.nodes);
        f(nodes.entry(host.to_string()).or_insert_with(NodeState::new))
    }

    /// Register a node
    pub fn add_node(&self, host: &str) {
        self.with_node(host, |_| ());
    }

    /// Write transactions `gtid_set` into the active binlog of `host`
    pub fn commit(&self, host: &str, gtid_set: &str, first_ts: i64, last_ts: i64) {
        self.with_node(host, |node| {
            if let Some(active) = node.segments.last_mut() {
                let added = IntervalSet::parse(gtid_set);
                active.gtid_set = active.gtid_set.union(&added);
                if active.first_ts == 0 {
                    active.first_ts = first_ts;
                }
                active.last_ts = last_ts;
                active.size += gtid_set.len() as u64 * 10;
            }
        })
    }

    /// Close the active binlog of `host`
    pub fn rotate(&self, host: &str) {
        self.with_node(host, NodeState::rotate)
    }

    /// Drop the oldest binlog of `host`
    pub fn purge_oldest(&self, host: &str) {
        self.with_node(host, |node| {
            if node.segments.len() > 1 {
                node.segments.remove(0);
            }
        })
    }

    /// Make connections to `host` fail (or succeed again)
    pub fn set_unreachable(&self, host: &str, unreachable: bool) {
        self.with_node(host, |node| node.unreachable = unreachable)
    }

    /// Times the UDF component was installed on `host`
    pub fn installs(&self, host: &str) -> usize {
        self.with_node(host, |node| node.installs)
    }

    /// Times `host` was asked to rotate through `list_binlogs`
    pub fn rotations(&self, host: &str) -> usize {
        self.with_node(host, |node| node.rotations)
    }

    /// Whether the UDF component is present on `host`
    pub fn extension_installed(&self, host: &str) -> bool {
        self.with_node(host, |node| node.extension_installed)
    }

    /// Snapshot of the binlogs of `host`
    pub fn segments(&self, host: &str) -> Vec<SegmentState> {
        self.with_node(host, |node| node.segments.clone())
    }

    /// Open a [`FakeNode`] directly, bypassing reachability
    pub fn node(&self, host: &str) -> FakeNode {
        self.add_node(host);
        FakeNode {
            host: host.to_string(),
            nodes: self.nodes.clone(),
        }
    }
}

#[async_trait]
impl NodeConnector for FakeConnector {
    async fn connect(&self, host: &str) -> Result<Box<dyn NodeClient>> {
        let known = lock(&self.nodes).get(host).map(|node| node.unreachable);
        match known {
            Some(false) => Ok(Box::new(self.node(host))),
            Some(true) => Err(Error::connection(format!("{}: connection refused", host))),
            None => Err(Error::connection(format!("{}: unknown host", host))),
        }
    }
}

/// Connection to one fake node
#[derive(Debug)]
pub struct FakeNode {
    host: String,
    nodes: Nodes,
}

impl FakeNode {
    fn with_state<T>(&self, f: impl FnOnce(&mut NodeState) -> Result<T>) -> Result<T> {
        let mut nodes = lock(&self.nodes);
        match nodes.get_mut(&self.host) {
            Some(node) if !node.unreachable => f(node),
            _ => Err(Error::connection(format!("{}: connection lost", self.host))),
        }
    }

    fn segment<T>(&self, binlog: &str, f: impl FnOnce(&SegmentState) -> T) -> Result<T> {
        self.with_state(|node| {
            node.segment(binlog)
                .map(f)
                .ok_or_else(|| Error::query(format!("Binary log does not exist: {}", binlog)))
        })
    }
}

#[async_trait]
impl ExtensionInstaller for FakeNode {
    async fn extension_installed(&mut self) -> Result<bool> {
        self.with_state(|node| Ok(node.extension_installed))
    }

    async fn install_extension(&mut self) -> Result<()> {
        self.with_state(|node| {
            node.extension_installed = true;
            node.installs += 1;
            Ok(())
        })
    }

    async fn uninstall_extension(&mut self) -> Result<()> {
        self.with_state(|node| {
            node.extension_installed = false;
            Ok(())
        })
    }
}

#[async_trait]
impl NodeClient for FakeNode {
    fn host(&self) -> &str {
        &self.host
    }

    async fn list_binlogs(&mut self) -> Result<Vec<Binlog>> {
        self.with_state(|node| {
            let binlogs = node
                .segments
                .iter()
                .map(|s| Binlog::new(s.name.clone(), s.size, false))
                .collect();
            node.rotate();
            node.rotations += 1;
            Ok(binlogs)
        })
    }

    async fn list_binlog_names(&mut self) -> Result<Vec<String>> {
        self.with_state(|node| Ok(node.segments.iter().map(|s| s.name.clone()).collect()))
    }

    async fn gtid_set_of(&mut self, binlog: &str) -> Result<GtidSet> {
        self.with_state(|node| {
            if !node.extension_installed {
                return Err(Error::query("FUNCTION get_gtid_set_by_binlog does not exist"));
            }
            Ok(node
                .segment(binlog)
                .map(|s| s.gtid_set.to_gtid_set())
                .unwrap_or_default())
        })
    }

    async fn first_timestamp(&mut self, binlog: &str) -> Result<i64> {
        self.segment(binlog, |s| s.first_ts)
    }

    async fn last_timestamp(&mut self, binlog: &str) -> Result<i64> {
        self.segment(binlog, |s| s.last_ts)
    }

    async fn is_subset_of(&mut self, a: &GtidSet, b: &GtidSet) -> Result<bool> {
        Ok(IntervalSet::parse(a.raw()).is_subset_of(&IntervalSet::parse(b.raw())))
    }

    async fn subtract(&mut self, a: &GtidSet, b: &GtidSet) -> Result<GtidSet> {
        Ok(IntervalSet::parse(a.raw())
            .subtract(&IntervalSet::parse(b.raw()))
            .to_gtid_set())
    }

    async fn union(&mut self, a: &GtidSet, b: &GtidSet) -> Result<GtidSet> {
        Ok(IntervalSet::parse(a.raw())
            .union(&IntervalSet::parse(b.raw()))
            .to_gtid_set())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
