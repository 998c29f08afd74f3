//! Manifest records and per-source indices.
//!
//! A manifest lists every file of a tree with its size and mtime. Two
//! manifests of the same tree are produced by different tools with different
//! path conventions; after normalization both land in one canonical
//! namespace and are held in a [`ManifestIndex`] keyed by canonical path.

pub mod normalize;
pub mod parser;

use crate::utils::errors::{AuditError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub use normalize::PathNormalizer;
pub use parser::{load_index, BackupParser, FileListParser, ManifestParser, MalformedLine, ParsedLine};

/// Marker that must never survive normalization
pub(crate) const SNAPSHOT_SEGMENT: &str = "/.zfs/snapshot/";

/// Which inventory a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Backup-side metadata export (snapshot paths, dataset column)
    Backup,
    /// Live collection file list (flat collection root)
    FileList,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Backup => "backup",
            Source::FileList => "filelist",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How unparsable numeric fields are recorded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericPolicy {
    /// Keep the field as [`MetaValue::Unknown`]
    #[default]
    Strict,
    /// Legacy behaviour: record the field as `Known(0)`
    CoerceZero,
}

/// A metadata value that may have failed to parse.
///
/// `Unknown` is deliberately distinct from `Known(0)` so a genuine zero-byte
/// file is never conflated with a parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaValue<T> {
    Known(T),
    Unknown,
}

impl<T: Copy + PartialEq> MetaValue<T> {
    pub fn known(&self) -> Option<T> {
        match self {
            MetaValue::Known(v) => Some(*v),
            MetaValue::Unknown => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, MetaValue::Unknown)
    }

    /// True only when both sides are known and equal
    pub fn matches(&self, other: &Self) -> bool {
        match (self, other) {
            (MetaValue::Known(a), MetaValue::Known(b)) => a == b,
            _ => false,
        }
    }
}

impl MetaValue<u64> {
    /// Parse a size field: plain ASCII digits only
    pub fn parse_size(field: &str, policy: NumericPolicy) -> Self {
        let field = field.trim();
        let parsed = if !field.is_empty() && field.bytes().all(|b| b.is_ascii_digit()) {
            field.parse().ok()
        } else {
            None
        };
        Self::from_parsed(parsed, policy)
    }
}

impl MetaValue<i64> {
    /// Parse an epoch-seconds field: ASCII digits with an optional leading `-`
    pub fn parse_mtime(field: &str, policy: NumericPolicy) -> Self {
        let field = field.trim();
        let digits = field.strip_prefix('-').unwrap_or(field);
        let parsed = if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            field.parse().ok()
        } else {
            None
        };
        Self::from_parsed(parsed, policy)
    }
}

impl<T: Default> MetaValue<T> {
    fn from_parsed(parsed: Option<T>, policy: NumericPolicy) -> Self {
        match (parsed, policy) {
            (Some(v), _) => MetaValue::Known(v),
            (None, NumericPolicy::CoerceZero) => MetaValue::Known(T::default()),
            (None, NumericPolicy::Strict) => MetaValue::Unknown,
        }
    }
}

/// One file as listed by one inventory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    canonical_path: String,
    size: MetaValue<u64>,
    mtime: MetaValue<i64>,
    source: Source,
    original_path: String,
}

impl FileRecord {
    /// Build a record, rejecting paths that are not in canonical form.
    pub fn new(
        source: Source,
        canonical_path: String,
        size: MetaValue<u64>,
        mtime: MetaValue<i64>,
        original_path: String,
    ) -> Result<Self> {
        validate_canonical_path(&canonical_path)?;
        Ok(Self {
            canonical_path,
            size,
            mtime,
            source,
            original_path,
        })
    }

    pub fn canonical_path(&self) -> &str {
        &self.canonical_path
    }

    pub fn size(&self) -> MetaValue<u64> {
        self.size
    }

    pub fn mtime(&self) -> MetaValue<i64> {
        self.mtime
    }

    pub fn source(&self) -> Source {
        self.source
    }

    /// Path as it appeared in the raw inventory (diagnostics only)
    pub fn original_path(&self) -> &str {
        &self.original_path
    }
}

/// Check the canonical form: one leading `/`, no empty segments, no trailing
/// whitespace, no snapshot indirection.
pub fn validate_canonical_path(path: &str) -> Result<()> {
    if !path.starts_with('/') || path.starts_with("//") {
        return Err(AuditError::InvalidPath(format!(
            "expected exactly one leading separator: {:?}",
            path
        )));
    }
    if path.len() == 1 {
        return Err(AuditError::InvalidPath("path names the root".to_string()));
    }
    if path.contains("//") {
        return Err(AuditError::InvalidPath(format!(
            "duplicate separator: {:?}",
            path
        )));
    }
    if path.ends_with(char::is_whitespace) {
        return Err(AuditError::InvalidPath(format!(
            "trailing whitespace: {:?}",
            path
        )));
    }
    if path.contains(SNAPSHOT_SEGMENT) {
        return Err(AuditError::InvalidPath(format!(
            "snapshot segment left in path: {:?}",
            path
        )));
    }
    Ok(())
}

/// Line-level tallies for one source, collected while loading an index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseStats {
    pub lines_read: u64,
    pub header_lines: u64,
    pub blank_lines: u64,
    pub records: u64,
    pub malformed: u64,
    pub unknown_size: u64,
    pub unknown_mtime: u64,
    /// Records that replaced an earlier record with the same canonical path
    pub duplicates: u64,
}

/// All records of one source keyed by canonical path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestIndex {
    source: Source,
    files: HashMap<String, FileRecord>,
}

impl ManifestIndex {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            files: HashMap::new(),
        }
    }

    pub fn source(&self) -> Source {
        self.source
    }

    /// Insert with last-write-wins. Returns the record that was replaced.
    pub fn insert(&mut self, record: FileRecord) -> Option<FileRecord> {
        debug_assert_eq!(record.source, self.source, "record from the wrong source");
        self.files.insert(record.canonical_path.clone(), record)
    }

    pub fn get(&self, canonical_path: &str) -> Option<&FileRecord> {
        self.files.get(canonical_path)
    }

    pub fn contains(&self, canonical_path: &str) -> bool {
        self.files.contains_key(canonical_path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.values()
    }

    /// Canonical paths in lexicographic order
    pub fn sorted_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.files.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }
}
