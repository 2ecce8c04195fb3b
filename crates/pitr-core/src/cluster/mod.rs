//! Cluster membership discovery
//!
//! Membership comes from the `peer-list` helper run against the cluster's
//! headless service. For every peer it runs `get-pxc-state`, which prints a
//! colon-separated status line:
//!
//! ```text
//! node:10.0.0.5:wsrep_ready:ON:wsrep_connected:ON:wsrep_local_state_comment:Synced:wsrep_cluster_status:Primary
//! ```
//!
//! Status lines contain colons themselves, so the output is split on the
//! `node:` marker only.

pub mod selector;

pub use selector::{NodeSelector, select_oldest_binlog_node, select_primary_healthy_node};

use crate::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;

/// Marker preceding every per-node status string
pub const NODE_MARKER: &str = "node:";

/// Default location of the peer discovery helper
pub const PEER_LIST_PATH: &str = "/opt/percona/peer-list";

/// Script `peer-list` runs for each peer
pub const NODE_STATE_SCRIPT: &str = "/usr/bin/get-pxc-state";

/// Component status of a node as seen by the group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// Member of the primary component
    Primary,
    /// Anything else (non-primary, disconnected)
    Replica,
}

/// Parsed status of one cluster member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNode {
    /// Address the node is reachable at
    pub host: String,
    /// `wsrep_ready` is ON
    pub ready: bool,
    /// `wsrep_connected` is ON
    pub connected: bool,
    /// `wsrep_local_state_comment` is Synced
    pub synced: bool,
    /// From `wsrep_cluster_status`
    pub role: NodeRole,
    /// Status string as reported
    pub raw: String,
}

impl ClusterNode {
    /// Parse one status string (without the `node:` marker). Returns `None`
    /// for fragments that carry no host. Only the first line is read, the
    /// helper may log after a status.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim().lines().next().unwrap_or_default().trim();
        let mut fields = raw.split(':').map(str::trim);
        let host = fields.next().filter(|h| !h.is_empty())?;

        let mut node = Self {
            host: host.to_string(),
            ready: false,
            connected: false,
            synced: false,
            role: NodeRole::Replica,
            raw: raw.to_string(),
        };

        while let (Some(key), Some(value)) = (fields.next(), fields.next()) {
            match key {
                "wsrep_ready" => node.ready = value == "ON",
                "wsrep_connected" => node.connected = value == "ON",
                "wsrep_local_state_comment" => node.synced = value == "Synced",
                "wsrep_cluster_status" => {
                    node.role = if value == "Primary" {
                        NodeRole::Primary
                    } else {
                        NodeRole::Replica
                    }
                }
                _ => {}
            }
        }

        Some(node)
    }

    /// Ready, connected, synced and in the primary component
    pub fn is_healthy(&self) -> bool {
        self.ready && self.connected && self.synced && self.role == NodeRole::Primary
    }
}

/// Split raw helper output into per-node status strings
pub fn split_node_statuses(output: &str) -> Vec<String> {
    output
        .split(NODE_MARKER)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Source of cluster membership
#[async_trait]
pub trait ClusterTopology: Send + Sync {
    /// Raw status strings of every member behind `service`
    async fn list_cluster_nodes(&self, service: &str) -> Result<Vec<String>>;
}

/// [`ClusterTopology`] backed by the `peer-list` executable
#[derive(Debug, Clone)]
pub struct PeerListTopology {
    binary: PathBuf,
    on_start: PathBuf,
}

impl Default for PeerListTopology {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(PEER_LIST_PATH),
            on_start: PathBuf::from(NODE_STATE_SCRIPT),
        }
    }
}

impl PeerListTopology {
    /// Use custom helper paths
    pub fn new(binary: impl Into<PathBuf>, on_start: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            on_start: on_start.into(),
        }
    }
}

#[async_trait]
impl ClusterTopology for PeerListTopology {
    async fn list_cluster_nodes(&self, service: &str) -> Result<Vec<String>> {
        let output = Command::new(&self.binary)
            .arg(format!("-on-start={}", self.on_start.display()))
            .arg(format!("-service={}", service))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::tool(format!("run {}: {}", self.binary.display(), e)))?;

        // peer-list interleaves helper output on both streams
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(Error::tool(format!(
                "get peer-list output: {}: {}",
                output.status,
                combined.trim()
            )));
        }

        Ok(split_node_statuses(&combined))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEALTHY: &str = "10.0.0.5:wsrep_ready:ON:wsrep_connected:ON:wsrep_local_state_comment:Synced:wsrep_cluster_status:Primary";

    #[test]
    fn test_parse_healthy_node() {
        let node = ClusterNode::parse(HEALTHY).unwrap();
        assert_eq!(node.host, "10.0.0.5");
        assert!(node.ready && node.connected && node.synced);
        assert_eq!(node.role, NodeRole::Primary);
        assert!(node.is_healthy());
    }

    #[test]
    fn test_missing_primary_status_is_unhealthy() {
        let raw = "10.0.0.6:wsrep_ready:ON:wsrep_connected:ON:wsrep_local_state_comment:Synced";
        let node = ClusterNode::parse(raw).unwrap();
        assert_eq!(node.role, NodeRole::Replica);
        assert!(!node.is_healthy());

        let non_primary = raw.to_string() + ":wsrep_cluster_status:non-Primary";
        assert!(!ClusterNode::parse(&non_primary).unwrap().is_healthy());
    }

    #[test]
    fn test_donor_is_unhealthy() {
        let raw = HEALTHY.replace("Synced", "Donor/Desynced");
        assert!(!ClusterNode::parse(&raw).unwrap().is_healthy());
    }

    #[test]
    fn test_split_on_marker_not_whitespace() {
        let output = format!(
            "2024/01/01 peer-list starting\nnode:{}\nnode:10.0.0.7:wsrep_ready:OFF\n",
            HEALTHY
        );
        let statuses = split_node_statuses(&output);
        assert_eq!(statuses.len(), 3);
        assert_eq!(statuses[1], HEALTHY);
        assert_eq!(statuses[2], "10.0.0.7:wsrep_ready:OFF");
    }

    #[test]
    fn test_log_line_after_status_is_ignored() {
        let output = format!("node:{}\n2024/01/01 12:00:00 lookup done\nnode:{}", HEALTHY, HEALTHY);
        let statuses = split_node_statuses(&output);
        assert_eq!(statuses.len(), 2);

        let node = ClusterNode::parse(&statuses[0]).unwrap();
        assert_eq!(node.role, NodeRole::Primary);
        assert!(node.is_healthy());
        assert_eq!(node.raw, HEALTHY);
    }

    #[test]
    fn test_parse_rejects_empty_host() {
        assert!(ClusterNode::parse("").is_none());
        assert!(ClusterNode::parse(":wsrep_ready:ON").is_none());
    }
}
