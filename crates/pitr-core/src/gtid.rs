//! GTID set value type
//!
//! A [`GtidSet`] is the engine's textual encoding of a set of transactions,
//! e.g. `3e11fa47-71ca-11e1-9e33-c80aa9429562:1-5:11-18,ab2f...:1-3`.
//! Subset, subtraction and union are answered by the database engine through
//! [`NodeClient`](crate::node::NodeClient); this type only stores the text,
//! offers a display listing and reads where each source starts.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest transaction number a GTID can carry (`2^63 - 1`, exclusive).
const MAX_GNO: u64 = (i64::MAX - 1) as u64;

/// Opaque, immutable GTID set
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GtidSet(String);

impl GtidSet {
    /// Wrap an engine-produced GTID set. Surrounding whitespace and the line
    /// breaks the engine inserts after commas are dropped.
    pub fn new(raw: impl Into<String>) -> Self {
        let raw: String = raw.into();
        Self(raw.split_whitespace().collect())
    }

    /// The empty set
    pub fn empty() -> Self {
        Self(String::new())
    }

    /// True when the set holds no transactions
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Raw engine text
    pub fn raw(&self) -> &str {
        &self.0
    }

    /// Comma-separated tokens, sorted lexically.
    ///
    /// Lexical order is not numeric order (`src:10-20` sorts before
    /// `src:9`). Use for logs and debugging only.
    pub fn list(&self) -> Vec<&str> {
        if self.0.is_empty() {
            return Vec::new();
        }
        let mut list: Vec<&str> = self.0.split(',').collect();
        list.sort_unstable();
        list
    }

    /// Lowest transaction number of every source, in text order.
    ///
    /// Only reads the text. A tag (`uuid:tag:1-5`) becomes part of the
    /// source, as in [`Gtid::parse`].
    pub fn first_transactions(&self) -> Vec<Gtid> {
        let mut firsts: Vec<Gtid> = Vec::new();
        for member in self.0.split(',').filter(|m| !m.is_empty()) {
            let mut parts = member.split(':');
            let Some(uuid) = parts.next() else { continue };
            let mut source = uuid.to_string();
            for part in parts {
                let lo = part.split_once('-').map_or(part, |(lo, _)| lo);
                match lo.parse::<u64>() {
                    Ok(0) => {}
                    Ok(number) => match firsts.iter_mut().find(|g| g.source == source) {
                        Some(first) => first.number = first.number.min(number),
                        None => firsts.push(Gtid {
                            source: source.clone(),
                            number,
                        }),
                    },
                    Err(_) => source = format!("{uuid}:{part}"),
                }
            }
        }
        firsts
    }
}

impl fmt::Display for GtidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GtidSet {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for GtidSet {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

/// A single transaction identifier, `source:number`.
///
/// Only used to name a recovery boundary supplied by an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gtid {
    source: String,
    number: u64,
}

impl Gtid {
    /// Parse `source:number`. The source may itself contain a tag
    /// (`uuid:tag:number`), so the split happens on the last colon.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (source, number) = raw.rsplit_once(':')?;
        if source.is_empty() || source.contains(',') {
            return None;
        }
        let number = number.parse::<u64>().ok().filter(|n| *n > 0)?;
        Some(Self {
            source: source.to_string(),
            number,
        })
    }

    /// Source (server UUID, optionally tagged)
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Transaction number
    pub fn number(&self) -> u64 {
        self.number
    }

    /// The transaction as a one-element set
    pub fn as_set(&self) -> GtidSet {
        GtidSet(format!("{}:{}", self.source, self.number))
    }

    /// Every earlier transaction of the same source, `None` for the first
    pub fn preceding(&self) -> Option<GtidSet> {
        (self.number > 1).then(|| GtidSet(format!("{}:1-{}", self.source, self.number - 1)))
    }

    /// This transaction and every later one from the same source
    pub fn and_later(&self) -> GtidSet {
        GtidSet(format!("{}:{}-{}", self.source, self.number, MAX_GNO))
    }
}

impl fmt::Display for Gtid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.number)
    }
}
