//! In-memory stand-ins for the cluster, its nodes, the client tools and
//! object storage
//!
//! Enabled with the `testing` feature. Collector and recoverer tests build a
//! [`NodeSelector`](crate::cluster::NodeSelector) over [`FakeCluster`] and
//! [`FakeConnector`], archive into [`ObjectStorage::in_memory`](crate::storage::ObjectStorage::in_memory)
//! (or a [`FlakyStorage`] around it) and replay through [`FakeBinlogTool`].
//!
//! # Usage
//!
//! ```rust,no_run
//! use pitr_core::testing::{FakeCluster, FakeConnector, healthy_status};
//!
//! let connector = FakeConnector::new();
//! connector.add_node("node-0");
//! connector.commit("node-0", "src:1-100", 1_000, 1_100);
//! connector.rotate("node-0");
//! let cluster = FakeCluster::new(vec![healthy_status("node-0")]);
//! ```

mod cluster;
mod gtid;
mod node;
mod storage;
mod tools;

pub use cluster::{FakeCluster, healthy_status};
pub use gtid::IntervalSet;
pub use node::{FakeConnector, FakeNode, SegmentState};
pub use storage::FlakyStorage;
pub use tools::{AppliedBinlog, FakeBinlogTool};

use crate::cluster::NodeSelector;
use std::sync::Arc;

/// Service name used by [`selector`]
pub const TEST_SERVICE: &str = "cluster1-pxc";

/// Selector over a fake cluster and fake nodes
pub fn selector(cluster: FakeCluster, connector: FakeConnector) -> NodeSelector {
    NodeSelector::new(Arc::new(cluster), Arc::new(connector), TEST_SERVICE)
}
