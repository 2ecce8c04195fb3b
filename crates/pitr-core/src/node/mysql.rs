//! [`NodeClient`] over the MySQL wire protocol

use super::extension::{BINLOG_UDF_COMPONENT, ExtensionInstaller};
use super::{ADMIN_PORT, NodeClient, NodeConnector};
use crate::binlog::Binlog;
use crate::gtid::GtidSet;
use crate::{Error, Result};
use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, OptsBuilder, Row};

/// Message the UDF raises for a segment that is no longer on disk
const BINLOG_MISSING: &str = "Binary log does not exist";

/// Connection to one node's admin port
pub struct MysqlNode {
    conn: Conn,
    host: String,
}

impl MysqlNode {
    /// Connect to `host` on [`ADMIN_PORT`], database `mysql`
    pub async fn connect(host: &str, user: &str, pass: &str) -> Result<Self> {
        let opts = OptsBuilder::default()
            .ip_or_hostname(host)
            .tcp_port(ADMIN_PORT)
            .user(Some(user))
            .pass(Some(pass))
            .db_name(Some("mysql"));

        let conn = Conn::new(opts).await.map_err(|e| {
            Error::connection(format!("connect to {}:{}: {}", host, ADMIN_PORT, e))
        })?;

        Ok(Self {
            conn,
            host: host.to_string(),
        })
    }

    async fn binlog_inventory(&mut self) -> Result<Vec<Binlog>> {
        let rows: Vec<Row> = self
            .conn
            .query("SHOW BINARY LOGS")
            .await
            .map_err(|e| Error::query(format!("show binary logs: {}", e)))?;

        rows.into_iter().map(binlog_from_row).collect()
    }

    async fn timestamp(&mut self, function: &str, binlog: &str) -> Result<i64> {
        let sql = format!("SELECT {}(?) DIV 1000000", function);
        self.conn
            .exec_first::<Option<i64>, _, _>(sql, (binlog,))
            .await
            .map_err(|e| Error::query(format!("scan binlog timestamp of {}: {}", binlog, e)))?
            .flatten()
            .ok_or_else(|| Error::query(format!("scan binlog timestamp of {}: NULL", binlog)))
    }
}

fn binlog_from_row(row: Row) -> Result<Binlog> {
    let name: String = column(&row, 0)?;
    let size: u64 = column(&row, 1)?;
    // 5.7 has no Encrypted column
    let encrypted = match row.get_opt::<String, _>(2) {
        Some(Ok(flag)) => flag.eq_ignore_ascii_case("yes"),
        _ => false,
    };
    Ok(Binlog::new(name, size, encrypted))
}

fn column<T: FromValue>(row: &Row, index: usize) -> Result<T> {
    match row.get_opt::<T, _>(index) {
        Some(Ok(value)) => Ok(value),
        Some(Err(e)) => Err(Error::query(format!("scan binlogs: column {}: {}", index, e))),
        None => Err(Error::query(format!("scan binlogs: missing column {}", index))),
    }
}

#[async_trait]
impl ExtensionInstaller for MysqlNode {
    async fn extension_installed(&mut self) -> Result<bool> {
        let urn: Option<String> = self
            .conn
            .exec_first(
                "SELECT component_urn FROM mysql.component WHERE component_urn = ?",
                (BINLOG_UDF_COMPONENT,),
            )
            .await
            .map_err(|e| Error::query(format!("get {}: {}", BINLOG_UDF_COMPONENT, e)))?;
        Ok(urn.is_some_and(|urn| !urn.is_empty()))
    }

    async fn install_extension(&mut self) -> Result<()> {
        self.conn
            .query_drop(format!("INSTALL COMPONENT '{}'", BINLOG_UDF_COMPONENT))
            .await
            .map_err(|e| Error::query(format!("install component: {}", e)))
    }

    async fn uninstall_extension(&mut self) -> Result<()> {
        self.conn
            .query_drop(format!("UNINSTALL COMPONENT '{}'", BINLOG_UDF_COMPONENT))
            .await
            .map_err(|e| Error::query(format!("uninstall component: {}", e)))
    }
}

#[async_trait]
impl NodeClient for MysqlNode {
    fn host(&self) -> &str {
        &self.host
    }

    async fn list_binlogs(&mut self) -> Result<Vec<Binlog>> {
        let binlogs = self.binlog_inventory().await?;

        self.conn
            .query_drop("FLUSH BINARY LOGS")
            .await
            .map_err(|e| Error::query(format!("flush binary logs: {}", e)))?;

        Ok(binlogs)
    }

    async fn list_binlog_names(&mut self) -> Result<Vec<String>> {
        Ok(self
            .binlog_inventory()
            .await?
            .into_iter()
            .map(|b| b.name)
            .collect())
    }

    async fn gtid_set_of(&mut self, binlog: &str) -> Result<GtidSet> {
        match self
            .conn
            .exec_first::<Option<String>, _, _>("SELECT get_gtid_set_by_binlog(?)", (binlog,))
            .await
        {
            Ok(set) => Ok(GtidSet::new(set.flatten().unwrap_or_default())),
            Err(e) if e.to_string().contains(BINLOG_MISSING) => {
                tracing::debug!(host = %self.host, binlog, "binlog already purged");
                Ok(GtidSet::empty())
            }
            Err(e) => Err(Error::query(format!("scan set of {}: {}", binlog, e))),
        }
    }

    async fn first_timestamp(&mut self, binlog: &str) -> Result<i64> {
        self.timestamp("get_first_record_timestamp_by_binlog", binlog)
            .await
    }

    async fn last_timestamp(&mut self, binlog: &str) -> Result<i64> {
        self.timestamp("get_last_record_timestamp_by_binlog", binlog)
            .await
    }

    async fn is_subset_of(&mut self, a: &GtidSet, b: &GtidSet) -> Result<bool> {
        let result: Option<i64> = self
            .conn
            .exec_first("SELECT GTID_SUBSET(?, ?)", (a.raw(), b.raw()))
            .await
            .map_err(|e| Error::query(format!("scan gtid subset result: {}", e)))?;
        Ok(result == Some(1))
    }

    async fn subtract(&mut self, a: &GtidSet, b: &GtidSet) -> Result<GtidSet> {
        let result: Option<Option<String>> = self
            .conn
            .exec_first("SELECT GTID_SUBTRACT(?, ?)", (a.raw(), b.raw()))
            .await
            .map_err(|e| Error::query(format!("scan gtid subtract result: {}", e)))?;
        Ok(GtidSet::new(result.flatten().unwrap_or_default()))
    }

    async fn union(&mut self, a: &GtidSet, b: &GtidSet) -> Result<GtidSet> {
        if a.is_empty() {
            return Ok(b.clone());
        }
        if b.is_empty() {
            return Ok(a.clone());
        }
        // Subtracting nothing from the concatenation normalizes it
        let result: Option<Option<String>> = self
            .conn
            .exec_first("SELECT GTID_SUBTRACT(CONCAT(?, ',', ?), '')", (a.raw(), b.raw()))
            .await
            .map_err(|e| Error::query(format!("scan gtid union result: {}", e)))?;
        Ok(GtidSet::new(result.flatten().unwrap_or_default()))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let Self { conn, host } = *self;
        conn.disconnect()
            .await
            .map_err(|e| Error::connection(format!("close connection to {}: {}", host, e)))
    }
}

/// Connects with fixed admin credentials
#[derive(Clone)]
pub struct MysqlConnector {
    user: String,
    pass: String,
}

impl MysqlConnector {
    /// Create a connector for `user`
    pub fn new(user: impl Into<String>, pass: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            pass: pass.into(),
        }
    }
}

impl std::fmt::Debug for MysqlConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MysqlConnector")
            .field("user", &self.user)
            .field("pass", &"***")
            .finish()
    }
}

#[async_trait]
impl NodeConnector for MysqlConnector {
    async fn connect(&self, host: &str) -> Result<Box<dyn NodeClient>> {
        let node = MysqlNode::connect(host, &self.user, &self.pass).await?;
        Ok(Box::new(node))
    }
}
