//! Database node access
//!
//! [`NodeClient`] is one authenticated connection to a cluster node's admin
//! interface. It exposes the binlog inventory, per-segment introspection
//! through the binlog UDF component, and the engine's GTID algebra.
//! [`NodeConnector`] opens such connections so that selection and collection
//! code never deal with credentials or drivers directly.
//!
//! Errors are wrapped with the failing operation and never retried here;
//! retry policy belongs to callers.

pub mod extension;
pub mod mysql;

pub use extension::{ensure_installed, ensure_uninstalled, ExtensionInstaller, BINLOG_UDF_COMPONENT};
pub use mysql::{MysqlConnector, MysqlNode};

use crate::Result;
use crate::binlog::Binlog;
use crate::gtid::GtidSet;
use async_trait::async_trait;

/// Admin port. The binlog UDFs are only reachable through it, not through
/// the client-facing 3306.
pub const ADMIN_PORT: u16 = 33062;

/// A connection to one cluster node
#[async_trait]
pub trait NodeClient: ExtensionInstaller + Send {
    /// Host this client is connected to
    fn host(&self) -> &str;

    /// List retained binlogs, then rotate.
    ///
    /// Every returned file is closed once this call succeeds: anything written
    /// afterwards lands in a newer segment.
    async fn list_binlogs(&mut self) -> Result<Vec<Binlog>>;

    /// List retained binlog names without rotating
    async fn list_binlog_names(&mut self) -> Result<Vec<String>>;

    /// GTID set of one segment. A segment the node already purged yields
    /// the empty set.
    async fn gtid_set_of(&mut self, binlog: &str) -> Result<GtidSet>;

    /// Unix seconds of the first record in a segment
    async fn first_timestamp(&mut self, binlog: &str) -> Result<i64>;

    /// Unix seconds of the last record in a segment
    async fn last_timestamp(&mut self, binlog: &str) -> Result<i64>;

    /// Engine `GTID_SUBSET(a, b)`
    async fn is_subset_of(&mut self, a: &GtidSet, b: &GtidSet) -> Result<bool>;

    /// Engine `GTID_SUBTRACT(a, b)`
    async fn subtract(&mut self, a: &GtidSet, b: &GtidSet) -> Result<GtidSet>;

    /// Union of two sets, normalized by the engine
    async fn union(&mut self, a: &GtidSet, b: &GtidSet) -> Result<GtidSet>;

    /// Install the binlog UDF component unless it is already present
    async fn install_recovery_functions(&mut self) -> Result<()> {
        ensure_installed(self).await
    }

    /// Remove the binlog UDF component unless it is already gone
    async fn drop_recovery_functions(&mut self) -> Result<()> {
        ensure_uninstalled(self).await
    }

    /// Close the connection
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Opens [`NodeClient`]s by host name
#[async_trait]
pub trait NodeConnector: Send + Sync {
    /// Connect to `host` on the admin port
    async fn connect(&self, host: &str) -> Result<Box<dyn NodeClient>>;
}
