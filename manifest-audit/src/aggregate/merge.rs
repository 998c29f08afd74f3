//! Partial aggregates and the fold that combines them.
//!
//! Workers finish chunks in any order, so [`PartialAggregate::merge`] must be
//! commutative and associative: every field is a plain sum keyed by prefix.
//! The property tests at the bottom of this file check both laws.
//!
//! Sums are checked. A total that would not fit in a `u64` is an
//! [`AuditError::Overflow`], never a wrapped value.

use crate::utils::errors::{AuditError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Size and file count accumulated under one directory prefix
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryTotals {
    pub total_size: u64,
    pub file_count: u64,
}

impl DirectoryTotals {
    /// Sum of both totals, `None` on overflow
    pub fn checked_add(self, other: Self) -> Option<Self> {
        Some(Self {
            total_size: self.total_size.checked_add(other.total_size)?,
            file_count: self.file_count.checked_add(other.file_count)?,
        })
    }
}

fn add_u64(total: u64, value: u64, what: &str) -> Result<u64> {
    total
        .checked_add(value)
        .ok_or_else(|| AuditError::Overflow(format!("{} {} + {}", what, total, value)))
}

/// Why an aggregation input line was not counted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Fewer than two tokens
    Malformed,
    NotAbsolute,
    InvalidSize,
    /// Not a strict descendant of the base path
    OutsideBase,
}

/// Lines skipped, by reason
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipCounters {
    pub malformed: u64,
    pub not_absolute: u64,
    pub invalid_size: u64,
    pub outside_base: u64,
}

impl SkipCounters {
    pub fn record(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::Malformed => self.malformed += 1,
            SkipReason::NotAbsolute => self.not_absolute += 1,
            SkipReason::InvalidSize => self.invalid_size += 1,
            SkipReason::OutsideBase => self.outside_base += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.malformed + self.not_absolute + self.invalid_size + self.outside_base
    }
}

impl std::ops::AddAssign for SkipCounters {
    fn add_assign(&mut self, other: Self) {
        self.malformed += other.malformed;
        self.not_absolute += other.not_absolute;
        self.invalid_size += other.invalid_size;
        self.outside_base += other.outside_base;
    }
}

/// Totals produced from one chunk (or from a fold of several)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialAggregate {
    pub directories: HashMap<String, DirectoryTotals>,
    /// Accepted files, counted once each regardless of depth
    pub files: u64,
    /// Bytes of accepted files, counted once each regardless of depth
    pub bytes: u64,
    pub lines: u64,
    pub skipped: SkipCounters,
}

impl PartialAggregate {
    /// Count one accepted file under each of its first `depth` ancestor
    /// prefixes. `relative` holds the path components below the base path.
    pub fn add_file(&mut self, relative: &[&str], size: u64, depth: usize) -> Result<()> {
        self.bytes = add_u64(self.bytes, size, "total bytes")?;
        self.files += 1;

        let file = DirectoryTotals {
            total_size: size,
            file_count: 1,
        };
        let mut key = String::new();
        for component in relative.iter().take(depth) {
            if !key.is_empty() {
                key.push('/');
            }
            key.push_str(component);

            match self.directories.get_mut(key.as_str()) {
                Some(totals) => {
                    *totals = totals.checked_add(file).ok_or_else(|| {
                        AuditError::Overflow(format!("directory {:?} + {} bytes", key, size))
                    })?;
                }
                None => {
                    self.directories.insert(key.clone(), file);
                }
            }
        }
        Ok(())
    }

    /// Fold `other` into `self` by summing matching prefixes and counters
    pub fn merge(&mut self, other: PartialAggregate) -> Result<()> {
        self.bytes = add_u64(self.bytes, other.bytes, "total bytes")?;
        self.files = add_u64(self.files, other.files, "file count")?;
        self.lines = add_u64(self.lines, other.lines, "line count")?;
        self.skipped += other.skipped;

        if self.directories.is_empty() {
            self.directories = other.directories;
            return Ok(());
        }
        for (prefix, totals) in other.directories {
            let entry = self.directories.entry(prefix).or_default();
            *entry = entry
                .checked_add(totals)
                .ok_or_else(|| AuditError::Overflow(format!("directory totals {:?} + {:?}", entry, totals)))?;
        }
        Ok(())
    }

    /// By-value form of [`merge`](Self::merge)
    pub fn merged(mut self, other: PartialAggregate) -> Result<Self> {
        self.merge(other)?;
        Ok(self)
    }
}

/// One directory row of an aggregation report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryAggregate {
    prefix: String,
    total_size: u64,
    file_count: u64,
}

impl DirectoryAggregate {
    /// Build a row, rejecting prefixes that could not come from a relative
    /// path of at most `depth` components.
    pub fn new(prefix: String, totals: DirectoryTotals, depth: usize) -> Result<Self> {
        if prefix.is_empty() || prefix.starts_with('/') || prefix.ends_with('/') {
            return Err(AuditError::InvalidPath(format!("bad directory prefix: {:?}", prefix)));
        }
        let components = prefix.split('/').count();
        if prefix.split('/').any(str::is_empty) || components > depth {
            return Err(AuditError::InvalidPath(format!(
                "prefix {:?} does not fit depth {}",
                prefix, depth
            )));
        }
        Ok(Self {
            prefix,
            total_size: totals.total_size,
            file_count: totals.file_count,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn file_count(&self) -> u64 {
        self.file_count
    }

    /// Number of path components in the prefix
    pub fn depth(&self) -> usize {
        self.prefix.split('/').count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_add_file_counts_every_ancestor() {
        let mut partial = PartialAggregate::default();
        partial.add_file(&["home", "x", "f1"], 10, 2).unwrap();
        partial.add_file(&["home", "y"], 5, 2).unwrap();

        assert_eq!(partial.files, 2);
        assert_eq!(partial.bytes, 15);
        assert_eq!(partial.directories["home"], DirectoryTotals { total_size: 15, file_count: 2 });
        assert_eq!(partial.directories["home/x"], DirectoryTotals { total_size: 10, file_count: 1 });
        assert_eq!(partial.directories["home/y"], DirectoryTotals { total_size: 5, file_count: 1 });
        assert_eq!(partial.directories.len(), 3);
    }

    #[test]
    fn test_merge_sums_matching_prefixes() {
        let mut a = PartialAggregate::default();
        a.add_file(&["d", "f"], 3, 3).unwrap();
        a.skipped.record(SkipReason::InvalidSize);
        let mut b = PartialAggregate::default();
        b.add_file(&["d", "g"], 4, 3).unwrap();
        b.skipped.record(SkipReason::OutsideBase);

        let merged = a.merged(b).unwrap();
        assert_eq!(merged.directories["d"], DirectoryTotals { total_size: 7, file_count: 2 });
        assert_eq!(merged.files, 2);
        assert_eq!(merged.skipped.total(), 2);
    }

    #[test]
    fn test_add_file_rejects_size_overflow() {
        let mut partial = PartialAggregate::default();
        partial.add_file(&["a", "f"], u64::MAX, 2).unwrap();
        let err = partial.add_file(&["a", "g"], 1, 2).unwrap_err();
        assert!(matches!(err, AuditError::Overflow(_)), "{err}");
    }

    #[test]
    fn test_merge_rejects_directory_overflow() {
        let mut a = PartialAggregate::default();
        a.directories.insert("d".into(), DirectoryTotals { total_size: u64::MAX, file_count: 1 });
        let mut b = PartialAggregate::default();
        b.directories.insert("d".into(), DirectoryTotals { total_size: 1, file_count: 1 });
        assert!(matches!(a.merge(b), Err(AuditError::Overflow(_))));

        let mut c = PartialAggregate { bytes: u64::MAX, ..Default::default() };
        let d = PartialAggregate { bytes: 2, ..Default::default() };
        assert!(matches!(c.merge(d), Err(AuditError::Overflow(_))));
    }

    #[test]
    fn test_checked_add_at_the_limit() {
        let max = DirectoryTotals { total_size: u64::MAX - 1, file_count: 1 };
        let one = DirectoryTotals { total_size: 1, file_count: 1 };
        assert_eq!(max.checked_add(one), Some(DirectoryTotals { total_size: u64::MAX, file_count: 2 }));
        assert_eq!(max.checked_add(one).and_then(|t| t.checked_add(one)), None);
    }

    #[test]
    fn test_directory_aggregate_validation() {
        let totals = DirectoryTotals { total_size: 1, file_count: 1 };
        assert!(DirectoryAggregate::new("home/x".into(), totals, 2).is_ok());
        assert!(DirectoryAggregate::new("home/x".into(), totals, 1).is_err());
        assert!(DirectoryAggregate::new("".into(), totals, 3).is_err());
        assert!(DirectoryAggregate::new("/home".into(), totals, 3).is_err());
        assert!(DirectoryAggregate::new("home//x".into(), totals, 3).is_err());
        assert_eq!(DirectoryAggregate::new("a/b/c".into(), totals, 3).unwrap().depth(), 3);
    }

    fn arb_partial() -> impl Strategy<Value = PartialAggregate> {
        (
            prop::collection::hash_map("[a-c](/[a-c]){0,2}", (0u64..1_000, 0u64..50), 0..8),
            0u64..1_000,
            0u64..1_000_000,
            0u64..1_000,
            (0u64..10, 0u64..10, 0u64..10, 0u64..10),
        )
            .prop_map(|(dirs, files, bytes, lines, (m, n, i, o))| PartialAggregate {
                directories: dirs
                    .into_iter()
                    .map(|(k, (total_size, file_count))| (k, DirectoryTotals { total_size, file_count }))
                    .collect(),
                files,
                bytes,
                lines,
                skipped: SkipCounters {
                    malformed: m,
                    not_absolute: n,
                    invalid_size: i,
                    outside_base: o,
                },
            })
    }

    proptest! {
        #[test]
        fn prop_merge_commutative(a in arb_partial(), b in arb_partial()) {
            prop_assert_eq!(a.clone().merged(b.clone()).unwrap(), b.merged(a).unwrap());
        }

        #[test]
        fn prop_merge_associative(a in arb_partial(), b in arb_partial(), c in arb_partial()) {
            let left = a.clone().merged(b.clone()).unwrap().merged(c.clone()).unwrap();
            let right = a.merged(b.merged(c).unwrap()).unwrap();
            prop_assert_eq!(left, right);
        }

        #[test]
        fn prop_empty_is_identity(a in arb_partial()) {
            prop_assert_eq!(PartialAggregate::default().merged(a.clone()).unwrap(), a.clone());
            prop_assert_eq!(a.clone().merged(PartialAggregate::default()).unwrap(), a);
        }
    }
}
