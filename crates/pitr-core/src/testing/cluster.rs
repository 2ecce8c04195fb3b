use crate::Result;
use crate::cluster::ClusterTopology;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Status string of a ready, connected, synced member of the primary
/// component
pub fn healthy_status(host: &str) -> String {
    format!(
        "{}:wsrep_ready:ON:wsrep_connected:ON:wsrep_local_state_comment:Synced:wsrep_cluster_status:Primary",
        host
    )
}

/// Topology returning a fixed (but replaceable) list of status strings
#[derive(Debug, Clone, Default)]
pub struct FakeCluster {
    statuses: Arc<Mutex<Vec<String>>>,
}

impl FakeCluster {
    /// Cluster reporting `statuses`
    pub fn new(statuses: Vec<String>) -> Self {
        Self {
            statuses: Arc::new(Mutex::new(statuses)),
        }
    }

    /// Replace the reported statuses
    pub fn set_statuses(&self, statuses: Vec<String>) {
        *self.statuses.lock().unwrap_or_else(|e| e.into_inner()) = statuses;
    }
}

#[async_trait]
impl ClusterTopology for FakeCluster {
    async fn list_cluster_nodes(&self, _service: &str) -> Result<Vec<String>> {
        Ok(self.statuses.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }
}
