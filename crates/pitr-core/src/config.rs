//! Collector and recoverer configuration
//!
//! Configuration is read once from the environment into immutable structs
//! that are handed to every component constructor. Loaders take a lookup
//! function so tests can feed a map instead of the process environment.

use crate::gtid::Gtid;
use crate::{Error, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Date format of `PITR_DATE`
pub const RECOVERY_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Variable lookup, `std::env::var` in production
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Lookup over the process environment
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn optional(env: Lookup<'_>, name: &str) -> Option<String> {
    env(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn required(env: Lookup<'_>, name: &str) -> Result<String> {
    optional(env, name).ok_or_else(|| Error::config(format!("required variable {} is not set", name)))
}

fn parsed<T: FromStr>(env: Lookup<'_>, name: &str, default: T) -> Result<T>
where
    T::Err: fmt::Display,
{
    match optional(env, name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| Error::config(format!("invalid {}={:?}: {}", name, raw, e))),
        None => Ok(default),
    }
}

/// A credential that never shows up in logs
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The secret itself
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***REDACTED***")
    }
}

/// Storage backend selector (`STORAGE_TYPE`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    /// S3 or S3-compatible
    S3,
    /// Azure Blob
    Azure,
}

impl FromStr for StorageType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "s3" => Ok(Self::S3),
            "azure" => Ok(Self::Azure),
            other => Err(Error::config(format!("unknown STORAGE_TYPE {:?}", other))),
        }
    }
}

/// S3-compatible bucket settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Config {
    /// `bucket[/prefix]`
    pub bucket_url: String,
    /// Region, `us-east-1` unless set
    pub region: String,
    /// Custom endpoint for S3-compatible services
    pub endpoint: Option<String>,
    /// Access key id; empty means ambient credentials
    pub access_key_id: Secret,
    /// Secret access key
    pub secret_access_key: Secret,
    /// Verify the endpoint's TLS certificate
    pub verify_tls: bool,
}

/// Azure Blob container settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureConfig {
    /// Storage account name
    pub account: String,
    /// Account access key
    pub access_key: Secret,
    /// `container[/prefix]`
    pub container_path: String,
    /// Custom endpoint
    pub endpoint: Option<String>,
}

/// Storage location of an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    /// S3 backend
    S3(S3Config),
    /// Azure backend
    Azure(AzureConfig),
}

impl StorageConfig {
    /// Load the backend chosen by `kind`; every variable name is prefixed
    /// with `prefix` (empty, or `BINLOG_` for the recoverer's binlog store).
    pub fn from_lookup(env: Lookup<'_>, kind: StorageType, prefix: &str) -> Result<Self> {
        let var = |name: &str| format!("{}{}", prefix, name);
        match kind {
            StorageType::S3 => Ok(Self::S3(S3Config {
                bucket_url: required(env, &var("S3_BUCKET_URL"))?,
                region: optional(env, &var("DEFAULT_REGION"))
                    .unwrap_or_else(|| "us-east-1".to_string()),
                endpoint: optional(env, &var("ENDPOINT")),
                access_key_id: Secret::new(optional(env, &var("ACCESS_KEY_ID")).unwrap_or_default()),
                secret_access_key: Secret::new(
                    optional(env, &var("SECRET_ACCESS_KEY")).unwrap_or_default(),
                ),
                verify_tls: parsed(env, &var("VERIFY_TLS"), true)?,
            })),
            StorageType::Azure => Ok(Self::Azure(AzureConfig {
                account: required(env, &var("AZURE_STORAGE_ACCOUNT"))?,
                access_key: Secret::new(required(env, &var("AZURE_ACCESS_KEY"))?),
                container_path: required(env, &var("AZURE_CONTAINER_PATH"))?,
                endpoint: optional(env, &var("AZURE_ENDPOINT")),
            })),
        }
    }

    /// Backend type
    pub fn kind(&self) -> StorageType {
        match self {
            Self::S3(_) => StorageType::S3,
            Self::Azure(_) => StorageType::Azure,
        }
    }
}

fn storage_type(env: Lookup<'_>) -> Result<StorageType> {
    optional(env, "STORAGE_TYPE")
        .ok_or_else(|| Error::config("unknown STORAGE_TYPE: variable is not set"))?
        .parse()
}

/// Cluster service plus admin credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterAccess {
    /// Headless service name of the cluster
    pub service: String,
    /// Admin user
    pub user: String,
    /// Admin password
    pub pass: Secret,
}

impl ClusterAccess {
    fn from_lookup(env: Lookup<'_>) -> Result<Self> {
        Ok(Self {
            service: required(env, "PXC_SERVICE")?,
            user: required(env, "PXC_USER")?,
            pass: Secret::new(required(env, "PXC_PASS")?),
        })
    }
}

/// Retention of archived segments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionConfig {
    /// Maximum age in days; 0 keeps everything
    pub retention_days: u32,
    /// Time between cleanup runs
    pub cleanup_interval: Duration,
}

impl RetentionConfig {
    /// Whether cleanup has anything to do
    pub fn enabled(&self) -> bool {
        self.retention_days > 0
    }
}

/// Collector settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorConfig {
    /// Where to find the cluster
    pub cluster: ClusterAccess,
    /// Where to archive
    pub storage: StorageConfig,
    /// Sleep between cycles, also the per-cycle deadline
    pub collect_span: Duration,
    /// Retention settings
    pub retention: RetentionConfig,
}

impl CollectorConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&process_env)
    }

    /// Load through `env`
    pub fn from_lookup(env: Lookup<'_>) -> Result<Self> {
        let kind = storage_type(env)?;
        let collect_span_sec: u64 = parsed(env, "COLLECT_SPAN_SEC", 60)?;
        if collect_span_sec == 0 {
            return Err(Error::config("COLLECT_SPAN_SEC must be positive"));
        }
        let cleanup_interval_min: u64 = parsed(env, "CLEANUP_INTERVAL_MIN", 60)?;
        if cleanup_interval_min == 0 {
            return Err(Error::config("CLEANUP_INTERVAL_MIN must be positive"));
        }

        Ok(Self {
            cluster: ClusterAccess::from_lookup(env)?,
            storage: StorageConfig::from_lookup(env, kind, "")?,
            collect_span: Duration::from_secs(collect_span_sec),
            retention: RetentionConfig {
                retention_days: parsed(env, "RETENTION_DAYS", 0)?,
                cleanup_interval: Duration::from_secs(cleanup_interval_min * 60),
            },
        })
    }
}

/// What point to recover to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryTarget {
    /// Everything archived
    Latest,
    /// Up to (excluding) the given moment
    Date(DateTime<Utc>),
    /// Up to (excluding) the given transaction
    Transaction(Gtid),
    /// Everything archived except the given transaction
    Skip(Gtid),
}

impl RecoveryTarget {
    /// Parse `PITR_RECOVERY_TYPE` together with `PITR_DATE` / `PITR_GTID`
    pub fn from_lookup(env: Lookup<'_>) -> Result<Self> {
        let kind = required(env, "PITR_RECOVERY_TYPE")?;
        let gtid = || -> Result<Gtid> {
            let raw = required(env, "PITR_GTID")?;
            Gtid::parse(&raw).ok_or_else(|| Error::config(format!("invalid PITR_GTID {:?}", raw)))
        };

        match kind.as_str() {
            "latest" => Ok(Self::Latest),
            "date" => {
                let raw = required(env, "PITR_DATE")?;
                let date = NaiveDateTime::parse_from_str(&raw, RECOVERY_DATE_FORMAT)
                    .map_err(|e| Error::config(format!("invalid PITR_DATE {:?}: {}", raw, e)))?;
                Ok(Self::Date(date.and_utc()))
            }
            "transaction" => Ok(Self::Transaction(gtid()?)),
            "skip" => Ok(Self::Skip(gtid()?)),
            other => Err(Error::config(format!("unknown PITR_RECOVERY_TYPE {:?}", other))),
        }
    }
}

/// Recoverer settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecovererConfig {
    /// Where to find the cluster
    pub cluster: ClusterAccess,
    /// Storage holding the base backup
    pub backup_storage: StorageConfig,
    /// Storage holding archived binlogs
    pub binlog_storage: StorageConfig,
    /// Recovery point
    pub target: RecoveryTarget,
}

impl RecovererConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&process_env)
    }

    /// Load through `env`
    pub fn from_lookup(env: Lookup<'_>) -> Result<Self> {
        let kind = storage_type(env)?;
        Ok(Self {
            cluster: ClusterAccess::from_lookup(env)?,
            backup_storage: StorageConfig::from_lookup(env, kind, "")?,
            binlog_storage: StorageConfig::from_lookup(env, kind, "BINLOG_")?,
            target: RecoveryTarget::from_lookup(env)?,
        })
    }
}
