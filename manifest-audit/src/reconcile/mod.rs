//! Manifest reconciliation.
//!
//! Compares a backup index against a file-list index path by path and files
//! every path of the key union into exactly one of six categories. Size and
//! mtime are the only attributes compared (the same change heuristic rsync
//! uses by default); contents are never inspected.
//!
//! The walk visits paths in lexicographic order so that two runs over the
//! same inputs produce identical reports.

pub mod writer;

use crate::manifest::{FileRecord, ManifestIndex, Source};
use crate::progress::{LineProgress, DEFAULT_PROGRESS_INTERVAL};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use tracing::info;

/// Outcome of comparing one path across both inventories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    OnlyInBackup,
    OnlyInFileList,
    Identical,
    SizeMismatch,
    MtimeMismatch,
    BothMismatch,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::OnlyInBackup,
        Category::OnlyInFileList,
        Category::Identical,
        Category::SizeMismatch,
        Category::MtimeMismatch,
        Category::BothMismatch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::OnlyInBackup => "only_in_backup",
            Category::OnlyInFileList => "only_in_filelist",
            Category::Identical => "identical",
            Category::SizeMismatch => "size_mismatch",
            Category::MtimeMismatch => "mtime_mismatch",
            Category::BothMismatch => "both_mismatch",
        }
    }

    /// Whether full records of this category are kept in the report
    pub fn is_retained(&self) -> bool {
        !matches!(self, Category::Identical)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a path from its presence and attribute equality.
///
/// Returns `None` only when the path is in neither index. Attributes count
/// as equal only when both sides are known and equal.
pub fn classify(backup: Option<&FileRecord>, filelist: Option<&FileRecord>) -> Option<Category> {
    match (backup, filelist) {
        (None, None) => None,
        (Some(_), None) => Some(Category::OnlyInBackup),
        (None, Some(_)) => Some(Category::OnlyInFileList),
        (Some(b), Some(f)) => {
            let size_eq = b.size().matches(&f.size());
            let mtime_eq = b.mtime().matches(&f.mtime());
            Some(match (size_eq, mtime_eq) {
                (true, true) => Category::Identical,
                (false, false) => Category::BothMismatch,
                (false, true) => Category::SizeMismatch,
                (true, false) => Category::MtimeMismatch,
            })
        }
    }
}

/// One classified path with the record(s) that produced the classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationRecord {
    OnlyInBackup(FileRecord),
    OnlyInFileList(FileRecord),
    Identical { backup: FileRecord, filelist: FileRecord },
    SizeMismatch { backup: FileRecord, filelist: FileRecord },
    MtimeMismatch { backup: FileRecord, filelist: FileRecord },
    BothMismatch { backup: FileRecord, filelist: FileRecord },
}

impl ReconciliationRecord {
    /// Pair the records under the category `classify` assigned them
    fn build(category: Category, backup: Option<&FileRecord>, filelist: Option<&FileRecord>) -> Option<Self> {
        let pair = || Some((backup?.clone(), filelist?.clone()));
        Some(match category {
            Category::OnlyInBackup => Self::OnlyInBackup(backup?.clone()),
            Category::OnlyInFileList => Self::OnlyInFileList(filelist?.clone()),
            Category::Identical => {
                let (backup, filelist) = pair()?;
                Self::Identical { backup, filelist }
            }
            Category::SizeMismatch => {
                let (backup, filelist) = pair()?;
                Self::SizeMismatch { backup, filelist }
            }
            Category::MtimeMismatch => {
                let (backup, filelist) = pair()?;
                Self::MtimeMismatch { backup, filelist }
            }
            Category::BothMismatch => {
                let (backup, filelist) = pair()?;
                Self::BothMismatch { backup, filelist }
            }
        })
    }

    pub fn category(&self) -> Category {
        match self {
            Self::OnlyInBackup(_) => Category::OnlyInBackup,
            Self::OnlyInFileList(_) => Category::OnlyInFileList,
            Self::Identical { .. } => Category::Identical,
            Self::SizeMismatch { .. } => Category::SizeMismatch,
            Self::MtimeMismatch { .. } => Category::MtimeMismatch,
            Self::BothMismatch { .. } => Category::BothMismatch,
        }
    }

    pub fn canonical_path(&self) -> &str {
        match self {
            Self::OnlyInBackup(r) | Self::OnlyInFileList(r) => r.canonical_path(),
            Self::Identical { backup, .. }
            | Self::SizeMismatch { backup, .. }
            | Self::MtimeMismatch { backup, .. }
            | Self::BothMismatch { backup, .. } => backup.canonical_path(),
        }
    }

    /// The backup-side record, if the path is in the backup index
    pub fn backup(&self) -> Option<&FileRecord> {
        match self {
            Self::OnlyInBackup(r) => Some(r),
            Self::OnlyInFileList(_) => None,
            Self::Identical { backup, .. }
            | Self::SizeMismatch { backup, .. }
            | Self::MtimeMismatch { backup, .. }
            | Self::BothMismatch { backup, .. } => Some(backup),
        }
    }

    /// The file-list record, if the path is in the file-list index
    pub fn filelist(&self) -> Option<&FileRecord> {
        match self {
            Self::OnlyInBackup(_) => None,
            Self::OnlyInFileList(r) => Some(r),
            Self::Identical { filelist, .. }
            | Self::SizeMismatch { filelist, .. }
            | Self::MtimeMismatch { filelist, .. }
            | Self::BothMismatch { filelist, .. } => Some(filelist),
        }
    }
}

/// Number of paths per category
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub only_in_backup: u64,
    pub only_in_filelist: u64,
    pub identical: u64,
    pub size_mismatch: u64,
    pub mtime_mismatch: u64,
    pub both_mismatch: u64,
}

impl CategoryCounts {
    fn slot(&mut self, category: Category) -> &mut u64 {
        match category {
            Category::OnlyInBackup => &mut self.only_in_backup,
            Category::OnlyInFileList => &mut self.only_in_filelist,
            Category::Identical => &mut self.identical,
            Category::SizeMismatch => &mut self.size_mismatch,
            Category::MtimeMismatch => &mut self.mtime_mismatch,
            Category::BothMismatch => &mut self.both_mismatch,
        }
    }

    pub fn increment(&mut self, category: Category) {
        *self.slot(category) += 1;
    }

    pub fn get(&self, category: Category) -> u64 {
        match category {
            Category::OnlyInBackup => self.only_in_backup,
            Category::OnlyInFileList => self.only_in_filelist,
            Category::Identical => self.identical,
            Category::SizeMismatch => self.size_mismatch,
            Category::MtimeMismatch => self.mtime_mismatch,
            Category::BothMismatch => self.both_mismatch,
        }
    }

    /// Paths present in both indices
    pub fn in_both(&self) -> u64 {
        self.identical + self.size_mismatch + self.mtime_mismatch + self.both_mismatch
    }

    /// Sum over all six categories; equals the size of the key union
    pub fn total(&self) -> u64 {
        self.only_in_backup + self.only_in_filelist + self.in_both()
    }
}

/// Categorized difference between two indices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub counts: CategoryCounts,
    pub backup_total: u64,
    pub filelist_total: u64,
    records: Vec<ReconciliationRecord>,
}

impl ReconciliationReport {
    /// Number of distinct canonical paths across both indices
    pub fn union_len(&self) -> u64 {
        self.counts.total()
    }

    /// Retained records (every category except identical), in path order
    pub fn records(&self) -> &[ReconciliationRecord] {
        &self.records
    }

    pub fn records_in(&self, category: Category) -> impl Iterator<Item = &ReconciliationRecord> {
        self.records.iter().filter(move |r| r.category() == category)
    }

    /// First `limit` canonical paths of `category`, in path order. Always
    /// empty for identical paths, which are only counted.
    pub fn sample_paths(&self, category: Category, limit: usize) -> Vec<&str> {
        self.records_in(category).take(limit).map(|r| r.canonical_path()).collect()
    }
}

/// Single-threaded comparison of two indices
#[derive(Debug, Clone)]
pub struct Reconciler {
    progress_interval: u64,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRESS_INTERVAL)
    }
}

impl Reconciler {
    pub fn new(progress_interval: u64) -> Self {
        Self { progress_interval }
    }

    pub fn run(&self, backup: &ManifestIndex, filelist: &ManifestIndex) -> ReconciliationReport {
        debug_assert_eq!(backup.source(), Source::Backup);
        debug_assert_eq!(filelist.source(), Source::FileList);

        let backup_paths = backup.sorted_paths();
        let filelist_paths = filelist.sorted_paths();

        info!(
            "Comparing {} backup paths against {} filelist paths",
            backup_paths.len(),
            filelist_paths.len()
        );

        let mut counts = CategoryCounts::default();
        let mut records = Vec::new();
        let mut progress = LineProgress::new("paths compared", self.progress_interval);

        let (mut i, mut j) = (0, 0);
        loop {
            let path = match (backup_paths.get(i), filelist_paths.get(j)) {
                (Some(b), Some(f)) => match b.cmp(f) {
                    Ordering::Less => {
                        i += 1;
                        *b
                    }
                    Ordering::Greater => {
                        j += 1;
                        *f
                    }
                    Ordering::Equal => {
                        i += 1;
                        j += 1;
                        *b
                    }
                },
                (Some(b), None) => {
                    i += 1;
                    *b
                }
                (None, Some(f)) => {
                    j += 1;
                    *f
                }
                (None, None) => break,
            };

            progress.tick();
            let b = backup.get(path);
            let f = filelist.get(path);
            let Some(category) = classify(b, f) else {
                continue;
            };

            counts.increment(category);
            if category.is_retained() {
                if let Some(record) = ReconciliationRecord::build(category, b, f) {
                    records.push(record);
                }
            }
        }

        progress.finish();
        info!(
            "Comparison complete: {} only in backup, {} only in filelist, {} identical, {} size, {} mtime, {} both",
            counts.only_in_backup,
            counts.only_in_filelist,
            counts.identical,
            counts.size_mismatch,
            counts.mtime_mismatch,
            counts.both_mismatch
        );

        ReconciliationReport {
            counts,
            backup_total: backup.len() as u64,
            filelist_total: filelist.len() as u64,
            records,
        }
    }
}

/// Reconcile two indices with default settings
pub fn reconcile(backup: &ManifestIndex, filelist: &ManifestIndex) -> ReconciliationReport {
    Reconciler::default().run(backup, filelist)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::MetaValue;
    use proptest::prelude::*;
    use std::collections::{BTreeMap, BTreeSet};

    fn record(source: Source, path: &str, size: u64, mtime: i64) -> FileRecord {
        FileRecord::new(
            source,
            path.to_string(),
            MetaValue::Known(size),
            MetaValue::Known(mtime),
            format!("raw:{path}"),
        )
        .unwrap()
    }

    fn index(source: Source, entries: &[(&str, u64, i64)]) -> ManifestIndex {
        let mut index = ManifestIndex::new(source);
        for (path, size, mtime) in entries {
            index.insert(record(source, path, *size, *mtime));
        }
        index
    }

    #[test]
    fn test_only_in_backup() {
        let backup = index(Source::Backup, &[("/a/b.txt", 10, 100)]);
        let filelist = index(Source::FileList, &[]);

        let report = reconcile(&backup, &filelist);

        assert_eq!(report.counts.only_in_backup, 1);
        assert_eq!(report.union_len(), 1);
        assert_eq!(report.records().len(), 1);
        let ReconciliationRecord::OnlyInBackup(r) = &report.records()[0] else {
            panic!("expected only-in-backup");
        };
        assert_eq!(r.canonical_path(), "/a/b.txt");
        for category in Category::ALL {
            if category != Category::OnlyInBackup {
                assert_eq!(report.counts.get(category), 0, "{category}");
            }
        }
    }

    #[test]
    fn test_mtime_only_difference() {
        let backup = index(Source::Backup, &[("/f", 5, 100)]);
        let filelist = index(Source::FileList, &[("/f", 5, 200)]);

        let report = reconcile(&backup, &filelist);

        assert_eq!(report.counts.mtime_mismatch, 1);
        assert_eq!(report.counts.both_mismatch, 0);
        assert_eq!(report.records()[0].category(), Category::MtimeMismatch);
    }

    #[test]
    fn test_classification_table() {
        let backup = index(
            Source::Backup,
            &[("/same", 1, 1), ("/size", 1, 1), ("/both", 1, 1), ("/mtime", 1, 1), ("/bonly", 1, 1)],
        );
        let filelist = index(
            Source::FileList,
            &[("/same", 1, 1), ("/size", 2, 1), ("/both", 2, 2), ("/mtime", 1, 2), ("/fonly", 1, 1)],
        );

        let report = reconcile(&backup, &filelist);
        let by_path: BTreeMap<&str, Category> = report
            .records()
            .iter()
            .map(|r| (r.canonical_path(), r.category()))
            .collect();

        assert_eq!(by_path["/size"], Category::SizeMismatch);
        assert_eq!(by_path["/both"], Category::BothMismatch);
        assert_eq!(by_path["/mtime"], Category::MtimeMismatch);
        assert_eq!(by_path["/bonly"], Category::OnlyInBackup);
        assert_eq!(by_path["/fonly"], Category::OnlyInFileList);
        assert!(!by_path.contains_key("/same"));
        assert_eq!(report.counts.identical, 1);
        assert_eq!(report.counts.in_both(), 4);
    }

    #[test]
    fn test_records_are_in_path_order() {
        let backup = index(Source::Backup, &[("/c", 1, 1), ("/a", 1, 1)]);
        let filelist = index(Source::FileList, &[("/b", 1, 1), ("/a/x", 1, 1)]);

        let report = reconcile(&backup, &filelist);
        let paths: Vec<&str> = report.records().iter().map(|r| r.canonical_path()).collect();
        assert_eq!(paths, vec!["/a", "/a/x", "/b", "/c"]);
    }

    #[test]
    fn test_sample_paths_per_category() {
        let backup = index(
            Source::Backup,
            &[("/s1", 1, 1), ("/s2", 1, 1), ("/s3", 1, 1), ("/same", 1, 1), ("/gone", 1, 1)],
        );
        let filelist = index(Source::FileList, &[("/s3", 2, 1), ("/s1", 2, 1), ("/s2", 2, 1), ("/same", 1, 1)]);

        let report = reconcile(&backup, &filelist);
        assert_eq!(report.sample_paths(Category::SizeMismatch, 2), vec!["/s1", "/s2"]);
        assert_eq!(report.sample_paths(Category::SizeMismatch, 5), vec!["/s1", "/s2", "/s3"]);
        assert_eq!(report.sample_paths(Category::OnlyInBackup, 5), vec!["/gone"]);
        assert!(report.sample_paths(Category::OnlyInFileList, 5).is_empty());
        assert!(report.sample_paths(Category::Identical, 5).is_empty());
    }

    #[test]
    fn test_unknown_values_are_mismatches() {
        let mut backup = ManifestIndex::new(Source::Backup);
        backup.insert(
            FileRecord::new(Source::Backup, "/u".into(), MetaValue::Unknown, MetaValue::Known(1), "/u".into())
                .unwrap(),
        );
        let mut filelist = ManifestIndex::new(Source::FileList);
        filelist.insert(
            FileRecord::new(Source::FileList, "/u".into(), MetaValue::Unknown, MetaValue::Known(1), "/u".into())
                .unwrap(),
        );

        let report = reconcile(&backup, &filelist);
        assert_eq!(report.counts.size_mismatch, 1);
        assert_eq!(report.counts.identical, 0);
    }

    #[test]
    fn test_record_accessors() {
        let backup = index(Source::Backup, &[("/p", 1, 1)]);
        let filelist = index(Source::FileList, &[("/p", 2, 1)]);

        let report = reconcile(&backup, &filelist);
        let record = &report.records()[0];
        assert_eq!(record.backup().unwrap().size(), MetaValue::Known(1));
        assert_eq!(record.filelist().unwrap().size(), MetaValue::Known(2));
        assert_eq!(report.records_in(Category::SizeMismatch).count(), 1);
        assert_eq!(report.records_in(Category::BothMismatch).count(), 0);
    }

    fn arb_entries() -> impl Strategy<Value = BTreeMap<String, (u64, i64)>> {
        prop::collection::btree_map("/[a-d]{1,3}", (0u64..3, 0i64..3), 0..24)
    }

    fn build(source: Source, entries: &BTreeMap<String, (u64, i64)>) -> ManifestIndex {
        let mut index = ManifestIndex::new(source);
        for (path, (size, mtime)) in entries {
            index.insert(record(source, path, *size, *mtime));
        }
        index
    }

    proptest! {
        #[test]
        fn prop_categories_partition_the_union(b in arb_entries(), f in arb_entries()) {
            let backup = build(Source::Backup, &b);
            let filelist = build(Source::FileList, &f);
            let report = reconcile(&backup, &filelist);

            let union: BTreeSet<&String> = b.keys().chain(f.keys()).collect();
            prop_assert_eq!(report.union_len(), union.len() as u64);

            let retained: BTreeSet<&str> = report.records().iter().map(|r| r.canonical_path()).collect();
            prop_assert_eq!(retained.len(), report.records().len());
            prop_assert_eq!(
                report.records().len() as u64 + report.counts.identical,
                union.len() as u64
            );
        }

        #[test]
        fn prop_reconcile_is_idempotent(b in arb_entries(), f in arb_entries()) {
            let backup = build(Source::Backup, &b);
            let filelist = build(Source::FileList, &f);
            prop_assert_eq!(reconcile(&backup, &filelist), reconcile(&backup, &filelist));
        }
    }
}
