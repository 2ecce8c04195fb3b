//! PITR Core - binlog archiving and point-in-time recovery for Galera clusters
//!
//! This crate provides the two halves of continuous binlog archiving:
//! - Collector: picks the node with the longest binlog history, rotates its
//!   binlog and uploads every closed segment not yet archived, plus retention
//!   cleanup of old segments
//! - Recoverer: replays archived segments onto a node restored from a base
//!   backup, up to a date, up to a transaction, or skipping one transaction
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐    ┌──────────────────────┐
//! │      Collector       │    │      Recoverer       │
//! │ (cycle, retention)   │    │ (plan, apply)        │
//! └───┬──────────┬───────┘    └───┬──────────┬───────┘
//!     │          │                │          │
//! ┌───┴──────────┴────────────────┴──────────┴───────┐
//! │ NodeSelector (cluster) · NodeClient (node)       │
//! │ BinlogSource / BinlogApplier (tools) · Storage   │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! GTID set algebra is always answered by the database engine; see
//! [`gtid::GtidSet`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod binlog;
pub mod cluster;
pub mod collector;
pub mod config;
pub mod error;
pub mod gtid;
pub mod metrics;
pub mod node;
pub mod recoverer;
pub mod storage;
pub mod tools;

#[cfg(feature = "testing")]
pub mod testing;

pub use binlog::{ArchivedBinlog, Binlog};
pub use cluster::NodeSelector;
pub use collector::{Collector, CycleReport, RetentionCleaner};
pub use config::{CollectorConfig, RecovererConfig, RecoveryTarget};
pub use error::{Error, Result};
pub use gtid::{Gtid, GtidSet};
pub use metrics::PitrMetrics;
pub use recoverer::{Recoverer, RecoveryReport};
