//! Binlog inventory entries and the archive layout in object storage
//!
//! Every archived segment occupies two objects under the cluster's storage
//! prefix:
//!
//! ```text
//! binlog_<first_ts:010>_<digest>_<name>        raw segment bytes
//! binlog_<first_ts:010>_<digest>_<name>.json   ArchivedBinlog manifest
//! ```
//!
//! The zero-padded first-record timestamp keeps keys roughly in replay order
//! and lets retention decide on age without opening anything. File names
//! restart on every node, so `<digest>`, taken over the segment's GTID set,
//! keeps segments cut on different nodes from landing on the same key.
//! The union of everything archived so far lives in [`ARCHIVED_SET_KEY`].

use crate::gtid::GtidSet;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Prefix shared by every archived segment object
pub const BINLOG_KEY_PREFIX: &str = "binlog_";

/// Suffix of manifest objects
pub const MANIFEST_SUFFIX: &str = ".json";

/// Object holding the union of all archived GTID sets
pub const ARCHIVED_SET_KEY: &str = "archived-gtid-set";

/// One entry of the engine's binlog inventory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binlog {
    /// Engine-assigned file name, e.g. `binlog.000012`
    pub name: String,
    /// File size in bytes
    pub size: u64,
    /// Whether the file is encrypted at rest
    pub encrypted: bool,
    /// Transactions in this file; empty until fetched
    pub gtid_set: GtidSet,
}

impl Binlog {
    /// Inventory entry without its GTID set
    pub fn new(name: impl Into<String>, size: u64, encrypted: bool) -> Self {
        Self {
            name: name.into(),
            size,
            encrypted,
            gtid_set: GtidSet::empty(),
        }
    }
}

impl fmt::Display for Binlog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} bytes) [E:{}]: {}",
            self.name,
            self.size,
            if self.encrypted { "Yes" } else { "No" },
            self.gtid_set
        )
    }
}

/// Manifest stored next to every archived segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedBinlog {
    /// Binlog file name on the source node
    pub name: String,
    /// Bytes stored
    pub size: u64,
    /// Encrypted flag reported by the engine
    pub encrypted: bool,
    /// Transactions contained in the segment
    pub gtid_set: GtidSet,
    /// Unix seconds of the first record
    pub first_ts: i64,
    /// Unix seconds of the last record
    pub last_ts: i64,
    /// Node the segment was read from
    pub host: String,
}

impl ArchivedBinlog {
    /// Key of the segment bytes
    pub fn data_key(&self) -> String {
        data_key(self.first_ts, &self.gtid_set, &self.name)
    }

    /// Key of this manifest
    pub fn manifest_key(&self) -> String {
        format!("{}{}", self.data_key(), MANIFEST_SUFFIX)
    }
}

/// Key of a segment given its first-record timestamp, GTID set and file name
pub fn data_key(first_ts: i64, gtid_set: &GtidSet, name: &str) -> String {
    format!(
        "{BINLOG_KEY_PREFIX}{:010}_{}_{name}",
        first_ts.max(0),
        gtid_digest(gtid_set)
    )
}

/// First 8 bytes of the SHA-256 of the set's text, hex encoded
fn gtid_digest(gtid_set: &GtidSet) -> String {
    let digest = Sha256::digest(gtid_set.raw().as_bytes());
    hex::encode(&digest[..8])
}

/// Whether `key` names a manifest object
pub fn is_manifest_key(key: &str) -> bool {
    key.starts_with(BINLOG_KEY_PREFIX) && key.ends_with(MANIFEST_SUFFIX)
}

/// First-record timestamp embedded in a segment or manifest key
pub fn timestamp_from_key(key: &str) -> Option<i64> {
    let rest = key.strip_prefix(BINLOG_KEY_PREFIX)?;
    let (ts, name) = rest.split_once('_')?;
    if name.is_empty() || ts.is_empty() || !ts.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    ts.parse().ok()
}
