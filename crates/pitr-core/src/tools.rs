//! Reading binlogs off a node and replaying them into one
//!
//! Both directions go through the client tools shipped with the server:
//! `mysqlbinlog --read-from-remote-server --raw` to copy a segment verbatim,
//! and `mysqlbinlog <file> | mysql` to replay one.

use crate::config::Secret;
use crate::gtid::GtidSet;
use crate::node::ADMIN_PORT;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Warning the client tools print whenever a password is supplied
pub const USING_PASS_WARNING: &str =
    "[Warning] Using a password on the command line interface can be insecure.";

/// Replay filters passed to `mysqlbinlog`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Stop at the first event at or after this moment
    pub stop_datetime: Option<DateTime<Utc>>,
    /// Transactions to leave out
    pub exclude_gtids: Option<GtidSet>,
}

impl ApplyOptions {
    /// `mysqlbinlog` arguments for these filters
    pub fn mysqlbinlog_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(date) = self.stop_datetime {
            args.push(format!("--stop-datetime={}", date.format("%Y-%m-%d %H:%M:%S")));
        }
        if let Some(set) = self.exclude_gtids.as_ref().filter(|s| !s.is_empty()) {
            args.push(format!("--exclude-gtids={}", set));
        }
        args
    }
}

/// Copies a binlog off a node
#[async_trait]
pub trait BinlogSource: Send + Sync {
    /// Raw bytes of `binlog` as stored on `host`
    async fn fetch(&self, host: &str, binlog: &str) -> Result<Bytes>;
}

/// Replays a binlog into a node
#[async_trait]
pub trait BinlogApplier: Send + Sync {
    /// Apply `data` (the segment called `binlog`) to `host`
    async fn apply(&self, host: &str, binlog: &str, data: Bytes, options: &ApplyOptions)
    -> Result<()>;
}

/// Drop the password warning from tool diagnostics
fn clean_stderr(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .lines()
        .filter(|line| !line.contains(USING_PASS_WARNING))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Binlog names become file names, so they must not escape the work dir
fn checked_file_name(binlog: &str) -> Result<&str> {
    if binlog.is_empty() || binlog.contains('/') || binlog.contains("..") {
        return Err(Error::tool(format!("refusing binlog name {:?}", binlog)));
    }
    Ok(binlog)
}

/// `mysqlbinlog` / `mysql` on the local PATH
#[derive(Debug, Clone)]
pub struct MysqlBinlogTool {
    user: String,
    pass: Secret,
    mysqlbinlog: PathBuf,
    mysql: PathBuf,
}

impl MysqlBinlogTool {
    /// Tools found on PATH, authenticating as `user`
    pub fn new(user: impl Into<String>, pass: Secret) -> Self {
        Self {
            user: user.into(),
            pass,
            mysqlbinlog: PathBuf::from("mysqlbinlog"),
            mysql: PathBuf::from("mysql"),
        }
    }

    /// Override tool locations
    pub fn with_binaries(mut self, mysqlbinlog: impl Into<PathBuf>, mysql: impl Into<PathBuf>) -> Self {
        self.mysqlbinlog = mysqlbinlog.into();
        self.mysql = mysql.into();
        self
    }
}

#[async_trait]
impl BinlogSource for MysqlBinlogTool {
    async fn fetch(&self, host: &str, binlog: &str) -> Result<Bytes> {
        let file_name = checked_file_name(binlog)?;
        let workdir = tempfile::tempdir()?;
        // With --raw the result file is a prefix; the segment keeps its name
        let result_prefix = format!("{}/", workdir.path().display());

        let output = Command::new(&self.mysqlbinlog)
            .arg("--read-from-remote-server")
            .arg("--raw")
            .arg(format!("--host={}", host))
            .arg(format!("--port={}", ADMIN_PORT))
            .arg(format!("--user={}", self.user))
            .arg(format!("--result-file={}", result_prefix))
            .arg(file_name)
            .env("MYSQL_PWD", self.pass.expose())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::tool(format!("run mysqlbinlog: {}", e)))?;

        if !output.status.success() {
            return Err(Error::tool(format!(
                "mysqlbinlog {} from {}: {}: {}",
                binlog,
                host,
                output.status,
                clean_stderr(&output.stderr)
            )));
        }

        let data = tokio::fs::read(workdir.path().join(file_name))
            .await
            .map_err(|e| Error::tool(format!("read fetched binlog {}: {}", binlog, e)))?;
        Ok(Bytes::from(data))
    }
}

#[async_trait]
impl BinlogApplier for MysqlBinlogTool {
    async fn apply(
        &self,
        host: &str,
        binlog: &str,
        data: Bytes,
        options: &ApplyOptions,
    ) -> Result<()> {
        let file_name = checked_file_name(binlog)?;
        let workdir = tempfile::tempdir()?;
        let path = workdir.path().join(file_name);
        tokio::fs::write(&path, &data).await?;

        let mut decoder = Command::new(&self.mysqlbinlog)
            .args(options.mysqlbinlog_args())
            .arg(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::apply(format!("run mysqlbinlog: {}", e)))?;

        let decoded = decoder
            .stdout
            .take()
            .ok_or_else(|| Error::apply("mysqlbinlog stdout not captured"))?;
        let decoded: Stdio = decoded.try_into()?;

        let client = Command::new(&self.mysql)
            .arg(format!("--host={}", host))
            .arg(format!("--port={}", ADMIN_PORT))
            .arg(format!("--user={}", self.user))
            .env("MYSQL_PWD", self.pass.expose())
            .stdin(decoded)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::apply(format!("run mysql: {}", e)))?;

        let (decoder, client) = tokio::join!(decoder.wait_with_output(), client.wait_with_output());
        let decoder = decoder?;
        let client = client?;

        if !decoder.status.success() {
            return Err(Error::apply(format!(
                "mysqlbinlog {}: {}: {}",
                binlog,
                decoder.status,
                clean_stderr(&decoder.stderr)
            )));
        }
        if !client.status.success() {
            return Err(Error::apply(format!(
                "mysql apply {} to {}: {}: {}",
                binlog,
                host,
                client.status,
                clean_stderr(&client.stderr)
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_apply_options_args() {
        assert!(ApplyOptions::default().mysqlbinlog_args().is_empty());

        let options = ApplyOptions {
            stop_datetime: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()),
            exclude_gtids: Some(GtidSet::new("src:150")),
        };
        assert_eq!(
            options.mysqlbinlog_args(),
            vec![
                "--stop-datetime=2024-03-01 12:30:00".to_string(),
                "--exclude-gtids=src:150".to_string(),
            ]
        );
    }

    #[test]
    fn test_empty_exclusion_is_omitted() {
        let options = ApplyOptions {
            stop_datetime: None,
            exclude_gtids: Some(GtidSet::empty()),
        };
        assert!(options.mysqlbinlog_args().is_empty());
    }

    #[test]
    fn test_clean_stderr_drops_password_warning() {
        let stderr = format!("mysqlbinlog: {}\nERROR: Got error reading packet\n", USING_PASS_WARNING);
        assert_eq!(clean_stderr(stderr.as_bytes()), "ERROR: Got error reading packet");
    }

    #[test]
    fn test_binlog_names_cannot_escape_workdir() {
        assert!(checked_file_name("binlog.000001").is_ok());
        assert!(checked_file_name("../etc/passwd").is_err());
        assert!(checked_file_name("a/b").is_err());
        assert!(checked_file_name("").is_err());
    }
}
