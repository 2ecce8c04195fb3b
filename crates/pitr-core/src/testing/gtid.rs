use crate::gtid::GtidSet;
use std::collections::BTreeMap;
use std::fmt;

/// Interval arithmetic over the `source:lo-hi:lo-hi,...` text format.
///
/// Stands in for the engine's `GTID_SUBSET` / `GTID_SUBTRACT`. Intervals per
/// source are kept sorted and merged, so two sets with the same members
/// print the same.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalSet(BTreeMap<String, Vec<(u64, u64)>>);

impl IntervalSet {
    /// Parse a GTID set. Tokens that do not parse are ignored.
    pub fn parse(raw: &str) -> Self {
        let mut set = Self::default();
        for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let mut parts = token.split(':');
            let Some(source) = parts.next() else { continue };
            for interval in parts {
                let (lo, hi) = match interval.split_once('-') {
                    Some((lo, hi)) => (lo.parse(), hi.parse()),
                    None => (interval.parse(), interval.parse()),
                };
                if let (Ok(lo), Ok(hi)) = (lo, hi) {
                    set.insert(source, lo, hi);
                }
            }
        }
        set
    }

    /// Add `lo..=hi` for `source`
    pub fn insert(&mut self, source: &str, lo: u64, hi: u64) {
        if lo > hi {
            return;
        }
        let intervals = self.0.entry(source.to_string()).or_default();
        intervals.push((lo, hi));
        intervals.sort_unstable();

        let mut merged: Vec<(u64, u64)> = Vec::with_capacity(intervals.len());
        for &(lo, hi) in intervals.iter() {
            match merged.last_mut() {
                Some(last) if lo <= last.1.saturating_add(1) => last.1 = last.1.max(hi),
                _ => merged.push((lo, hi)),
            }
        }
        *intervals = merged;
    }

    /// True when no source has any interval
    pub fn is_empty(&self) -> bool {
        self.0.values().all(Vec::is_empty)
    }

    /// Every member of `self` is in `other`
    pub fn is_subset_of(&self, other: &Self) -> bool {
        self.0.iter().all(|(source, intervals)| {
            let Some(theirs) = other.0.get(source) else {
                return intervals.is_empty();
            };
            intervals
                .iter()
                .all(|&(lo, hi)| theirs.iter().any(|&(tlo, thi)| tlo <= lo && hi <= thi))
        })
    }

    /// Members of `self` not in `other`
    pub fn subtract(&self, other: &Self) -> Self {
        let mut result = Self::default();
        for (source, intervals) in &self.0 {
            let theirs = other.0.get(source).map(Vec::as_slice).unwrap_or_default();
            for &(lo, hi) in intervals {
                let mut start = lo;
                for &(tlo, thi) in theirs {
                    if thi < start || tlo > hi {
                        continue;
                    }
                    if tlo > start {
                        result.insert(source, start, tlo - 1);
                    }
                    start = thi.saturating_add(1);
                    if start > hi {
                        break;
                    }
                }
                if start <= hi {
                    result.insert(source, start, hi);
                }
            }
        }
        result
    }

    /// Members of either set
    pub fn union(&self, other: &Self) -> Self {
        let mut result = self.clone();
        for (source, intervals) in &other.0 {
            for &(lo, hi) in intervals {
                result.insert(source, lo, hi);
            }
        }
        result
    }

    /// As an engine-style [`GtidSet`]
    pub fn to_gtid_set(&self) -> GtidSet {
        GtidSet::new(self.to_string())
    }
}

impl fmt::Display for IntervalSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (source, intervals) in self.0.iter().filter(|(_, i)| !i.is_empty()) {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            f.write_str(source)?;
            for &(lo, hi) in intervals {
                if lo == hi {
                    write!(f, ":{}", lo)?;
                } else {
                    write!(f, ":{}-{}", lo, hi)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_and_format() {
        let set = IntervalSet::parse("b:5,a:1-3:4-6,b:7-9");
        assert_eq!(set.to_string(), "a:1-6,b:5:7-9");
    }

    #[test]
    fn test_subset() {
        let big = IntervalSet::parse("src:1-300");
        assert!(IntervalSet::parse("src:150").is_subset_of(&big));
        assert!(!IntervalSet::parse("src:150,other:1").is_subset_of(&big));
        assert!(IntervalSet::default().is_subset_of(&big));
    }

    #[test]
    fn test_subtract_self_is_empty() {
        let set = IntervalSet::parse("a:1-10:20-30,b:1");
        assert!(set.subtract(&set).is_empty());
        assert_eq!(
            IntervalSet::parse("a:1-10").subtract(&IntervalSet::parse("a:3-4")).to_string(),
            "a:1-2:5-10"
        );
    }
}
