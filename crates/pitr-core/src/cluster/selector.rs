//! Health-based node selection
//!
//! Both policies only look at healthy members (see
//! [`ClusterNode::is_healthy`]), ordered lexically by their status string so
//! that repeated calls against an unchanged cluster pick the same host.

use super::{ClusterNode, ClusterTopology};
use crate::node::{NodeClient, NodeConnector};
use crate::{Error, Result};
use std::sync::Arc;

/// Healthy members, sorted by raw status string
fn healthy_candidates(nodes: &[String]) -> Vec<ClusterNode> {
    let mut candidates: Vec<ClusterNode> = nodes
        .iter()
        .filter_map(|raw| ClusterNode::parse(raw))
        .filter(ClusterNode::is_healthy)
        .collect();
    candidates.sort_by(|a, b| a.raw.cmp(&b.raw));
    candidates
}

/// First healthy member of the primary component
pub fn select_primary_healthy_node(nodes: &[String]) -> Result<String> {
    healthy_candidates(nodes)
        .into_iter()
        .next()
        .map(|node| node.host)
        .ok_or_else(|| Error::not_found("can't find host: no healthy primary node"))
}

/// Healthy member whose oldest retained binlog starts earliest.
///
/// Candidates that cannot be reached or report no usable binlog are logged
/// and skipped. Fails only when no candidate yields a timestamp.
pub async fn select_oldest_binlog_node(
    nodes: &[String],
    connector: &dyn NodeConnector,
) -> Result<String> {
    let mut oldest: Option<(String, i64)> = None;

    for node in healthy_candidates(nodes) {
        let ts = match oldest_binlog_time(connector, &node.host).await {
            Ok(ts) => ts,
            Err(e) => {
                tracing::error!(host = %node.host, "get binlog time: {}", e);
                continue;
            }
        };
        tracing::debug!(host = %node.host, ts, "oldest binlog timestamp");

        if oldest.as_ref().is_none_or(|(_, best)| ts < *best) {
            oldest = Some((node.host, ts));
        }
    }

    oldest
        .map(|(host, _)| host)
        .ok_or_else(|| Error::not_found("can't find host: no node reported a binlog timestamp"))
}

/// First positive first-record timestamp among a node's binlogs, oldest file
/// first
async fn oldest_binlog_time(connector: &dyn NodeConnector, host: &str) -> Result<i64> {
    let mut client = connector.connect(host).await?;
    let result = first_positive_timestamp(client.as_mut()).await;
    if let Err(e) = client.close().await {
        tracing::debug!(host, "close selection connection: {}", e);
    }
    result
}

async fn first_positive_timestamp(client: &mut dyn NodeClient) -> Result<i64> {
    let host = client.host().to_string();
    let names = client
        .list_binlog_names()
        .await
        .map_err(|e| Error::query(format!("get binlog list for host {}: {}", host, e)))?;
    if names.is_empty() {
        return Err(Error::not_found(format!(
            "get binlog list for host {}: no binlogs found",
            host
        )));
    }

    for name in &names {
        match client.first_timestamp(name).await {
            Ok(ts) if ts > 0 => return Ok(ts),
            Ok(_) => {}
            Err(e) => {
                tracing::error!(host = %host, binlog = %name, "get binlog timestamp: {}", e);
            }
        }
    }

    Err(Error::not_found(format!(
        "get binlog oldest timestamp for host {}: no binlogs timestamp found",
        host
    )))
}

/// Discovery plus selection for one cluster service
#[derive(Clone)]
pub struct NodeSelector {
    topology: Arc<dyn ClusterTopology>,
    connector: Arc<dyn NodeConnector>,
    service: String,
}

impl NodeSelector {
    /// Create a selector for the members behind `service`
    pub fn new(
        topology: Arc<dyn ClusterTopology>,
        connector: Arc<dyn NodeConnector>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            topology,
            connector,
            service: service.into(),
        }
    }

    /// Connector used for probing, shared with callers
    pub fn connector(&self) -> &Arc<dyn NodeConnector> {
        &self.connector
    }

    async fn nodes(&self) -> Result<Vec<String>> {
        self.topology
            .list_cluster_nodes(&self.service)
            .await
            .map_err(|e| Error::tool(format!("get nodes by service name {}: {}", self.service, e)))
    }

    /// See [`select_primary_healthy_node`]
    pub async fn primary_host(&self) -> Result<String> {
        let nodes = self.nodes().await?;
        select_primary_healthy_node(&nodes)
    }

    /// See [`select_oldest_binlog_node`]
    pub async fn oldest_binlog_host(&self) -> Result<String> {
        let nodes = self.nodes().await?;
        select_oldest_binlog_node(&nodes, self.connector.as_ref()).await
    }
}
