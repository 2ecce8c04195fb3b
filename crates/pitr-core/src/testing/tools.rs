use super::node::FakeConnector;
use crate::tools::{ApplyOptions, BinlogApplier, BinlogSource};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// One recorded replay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedBinlog {
    /// Target node
    pub host: String,
    /// Segment name
    pub binlog: String,
    /// Bytes replayed
    pub data: Bytes,
    /// Filters used
    pub options: ApplyOptions,
}

#[derive(Debug, Default)]
struct ToolState {
    applied: Vec<AppliedBinlog>,
    failing_applies: HashSet<String>,
    fetches: usize,
}

/// `mysqlbinlog` stand-in.
///
/// Fetching reads segment contents from the [`FakeConnector`]; applying
/// records what would have been replayed.
#[derive(Debug, Clone)]
pub struct FakeBinlogTool {
    connector: FakeConnector,
    state: Arc<Mutex<ToolState>>,
}

impl FakeBinlogTool {
    /// Tool reading from the nodes of `connector`
    pub fn new(connector: FakeConnector) -> Self {
        Self {
            connector,
            state: Arc::default(),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ToolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make replaying `binlog` fail
    pub fn fail_apply(&self, binlog: &str) {
        self.state().failing_applies.insert(binlog.to_string());
    }

    /// Replays so far, in order
    pub fn applied(&self) -> Vec<AppliedBinlog> {
        self.state().applied.clone()
    }

    /// Names of replayed segments, in order
    pub fn applied_names(&self) -> Vec<String> {
        self.state().applied.iter().map(|a| a.binlog.clone()).collect()
    }

    /// Number of fetches so far
    pub fn fetches(&self) -> usize {
        self.state().fetches
    }
}

#[async_trait]
impl BinlogSource for FakeBinlogTool {
    async fn fetch(&self, host: &str, binlog: &str) -> Result<Bytes> {
        self.state().fetches += 1;
        self.connector
            .segments(host)
            .into_iter()
            .find(|s| s.name == binlog)
            .map(|s| Bytes::from(s.contents()))
            .ok_or_else(|| Error::tool(format!("mysqlbinlog: could not find {}", binlog)))
    }
}

#[async_trait]
impl BinlogApplier for FakeBinlogTool {
    async fn apply(&self, host: &str, binlog: &str, data: Bytes, options: &ApplyOptions) -> Result<()> {
        let mut state = self.state();
        if state.failing_applies.contains(binlog) {
            return Err(Error::tool(format!("mysql: ERROR 1062 while replaying {}", binlog)));
        }
        state.applied.push(AppliedBinlog {
            host: host.to_string(),
            binlog: binlog.to_string(),
            data,
            options: options.clone(),
        });
        Ok(())
    }
}
