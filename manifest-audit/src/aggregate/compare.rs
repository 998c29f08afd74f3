//! Cross-check of two aggregation documents.
//!
//! Prefixes are compared after dropping leading `/`, so a document keyed
//! `/home/x` lines up with one keyed `home/x`. Only `total_size` is compared.

use super::AggregationReport;
use crate::utils::errors::Result;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// A prefix present on both sides with different sizes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeDifference {
    pub prefix: String,
    pub left: u64,
    pub right: u64,
}

impl SizeDifference {
    /// `left - right`
    pub fn delta(&self) -> i128 {
        i128::from(self.left) - i128::from(self.right)
    }
}

/// Outcome of comparing two prefix → size mappings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportComparison {
    /// Prefixes only the left document has, sorted
    pub only_left: Vec<String>,
    /// Prefixes only the right document has, sorted
    pub only_right: Vec<String>,
    /// Shared prefixes whose sizes differ, sorted by prefix
    pub size_differences: Vec<SizeDifference>,
}

impl ReportComparison {
    pub fn is_match(&self) -> bool {
        self.only_left.is_empty() && self.only_right.is_empty() && self.size_differences.is_empty()
    }
}

#[derive(Deserialize)]
struct DirectoryDocument {
    directories: BTreeMap<String, DirectoryEntry>,
}

#[derive(Deserialize)]
struct DirectoryEntry {
    total_size: u64,
}

fn normalize_keys<I>(entries: I) -> BTreeMap<String, u64>
where
    I: IntoIterator<Item = (String, u64)>,
{
    entries
        .into_iter()
        .map(|(prefix, size)| (prefix.trim_start_matches('/').to_string(), size))
        .collect()
}

/// Read the `directories` sizes of an aggregation document. Fields other
/// than `total_size` are ignored, so documents from other tools load too.
pub fn parse_sizes(text: &str) -> Result<BTreeMap<String, u64>> {
    let document: DirectoryDocument = serde_json::from_str(text)?;
    Ok(normalize_keys(
        document.directories.into_iter().map(|(prefix, entry)| (prefix, entry.total_size)),
    ))
}

pub fn load_sizes(path: &Path) -> Result<BTreeMap<String, u64>> {
    parse_sizes(&std::fs::read_to_string(path)?)
}

/// Compare two prefix → size mappings. Keys are expected without a
/// leading `/` (see [`parse_sizes`]).
pub fn compare_sizes(left: &BTreeMap<String, u64>, right: &BTreeMap<String, u64>) -> ReportComparison {
    let mut comparison = ReportComparison::default();
    for (prefix, &left_size) in left {
        match right.get(prefix) {
            None => comparison.only_left.push(prefix.clone()),
            Some(&right_size) if right_size != left_size => comparison.size_differences.push(SizeDifference {
                prefix: prefix.clone(),
                left: left_size,
                right: right_size,
            }),
            Some(_) => {}
        }
    }
    comparison.only_right = right.keys().filter(|k| !left.contains_key(*k)).cloned().collect();
    comparison
}

impl AggregationReport {
    /// Compare this report's directory sizes against `other`'s
    pub fn compare(&self, other: &AggregationReport) -> ReportComparison {
        let sizes = |report: &AggregationReport| {
            normalize_keys(report.directories.iter().map(|(k, t)| (k.clone(), t.total_size)))
        };
        compare_sizes(&sizes(self), &sizes(other))
    }
}
