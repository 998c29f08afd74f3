//! Path canonicalization for both inventories.
//!
//! Backup paths are read through a snapshot directory
//! (`/pool/home/.zfs/snapshot/<name>/...`) and carry the dataset in a separate
//! column. File-list paths are rooted at a flat collection directory. Both are
//! rewritten into one namespace: `/<dataset>/<path inside dataset>`.
//!
//! Everything here is pure string manipulation on `/`; the host's path
//! library is never consulted.

use super::{Source, SNAPSHOT_SEGMENT};

/// Collection root used by the live file-list collector
pub const DEFAULT_COLLECTION_ROOT: &str = "/storage/tmp/zfs-fd-analysis/";

/// Dataset prefix the collection root corresponds to on the backup side
pub const DEFAULT_BACKUP_PREFIX: &str = "deep_chll/backup/";

/// Rewrites raw inventory paths into canonical paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathNormalizer {
    collection_root: String,
    backup_prefix: String,
}

impl Default for PathNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_COLLECTION_ROOT, DEFAULT_BACKUP_PREFIX)
    }
}

impl PathNormalizer {
    pub fn new(collection_root: impl Into<String>, backup_prefix: impl Into<String>) -> Self {
        Self {
            collection_root: collection_root.into(),
            backup_prefix: backup_prefix.into(),
        }
    }

    pub fn collection_root(&self) -> &str {
        &self.collection_root
    }

    pub fn backup_prefix(&self) -> &str {
        &self.backup_prefix
    }

    /// Canonicalize `raw_path` as listed by `source`.
    ///
    /// `dataset` is only meaningful for [`Source::Backup`]; a missing dataset
    /// is treated as empty.
    pub fn normalize(&self, source: Source, dataset: Option<&str>, raw_path: &str) -> String {
        match source {
            Source::Backup => normalize_backup(dataset.unwrap_or(""), raw_path),
            Source::FileList => self.normalize_filelist(raw_path),
        }
    }

    fn normalize_filelist(&self, raw_path: &str) -> String {
        match self.strip_collection_root(raw_path) {
            Some(rest) => canonicalize(&format!("{}/{}", self.backup_prefix, rest)),
            None => canonicalize(raw_path),
        }
    }

    /// The part of `raw_path` below the collection root. The root only
    /// matches whole components, with or without a trailing `/`.
    fn strip_collection_root<'a>(&self, raw_path: &'a str) -> Option<&'a str> {
        if self.collection_root.is_empty() {
            return None;
        }
        let root = self.collection_root.trim_end_matches('/');
        let rest = raw_path.strip_prefix(root)?;
        (rest.is_empty() || rest.starts_with('/')).then_some(rest)
    }
}

fn normalize_backup(dataset: &str, raw_path: &str) -> String {
    match strip_snapshot(raw_path) {
        Some(rest) => canonicalize(&format!("{}/{}", dataset, rest)),
        None => canonicalize(&format!("{}/{}", dataset, raw_path)),
    }
}

/// Return the part of `raw_path` after the first
/// `/.zfs/snapshot/<name>/` segment, where `<name>` is non-empty.
pub fn strip_snapshot(raw_path: &str) -> Option<&str> {
    for (idx, _) in raw_path.match_indices(SNAPSHOT_SEGMENT) {
        let after = &raw_path[idx + SNAPSHOT_SEGMENT.len()..];
        if let Some(slash) = after.find('/') {
            if slash > 0 {
                return Some(&after[slash + 1..]);
            }
        }
    }
    None
}

/// Enforce a single leading separator, collapse separator runs, and drop
/// trailing separators and trailing whitespace.
pub fn canonicalize(path: &str) -> String {
    let trimmed = path.trim_end();
    let mut out = String::with_capacity(trimmed.len() + 1);
    for segment in trimmed.split('/').filter(|s| !s.is_empty()) {
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_snapshot_segment_is_dropped() {
        let n = PathNormalizer::default();
        let canonical = n.normalize(
            Source::Backup,
            Some("deep_chll/backup"),
            "/deep_chll/backup/.zfs/snapshot/auto-2025-07-30/home/x/f1.txt",
        );
        assert_eq!(canonical, "/deep_chll/backup/home/x/f1.txt");
    }

    #[test]
    fn test_backup_without_snapshot_keeps_full_path() {
        let n = PathNormalizer::default();
        assert_eq!(n.normalize(Source::Backup, Some("tank"), "/home/x"), "/tank/home/x");
        assert_eq!(n.normalize(Source::Backup, Some("tank/"), "home/x"), "/tank/home/x");
        assert_eq!(n.normalize(Source::Backup, None, "/home/x"), "/home/x");
    }

    #[test]
    fn test_snapshot_requires_a_named_segment_and_rest() {
        assert_eq!(strip_snapshot("/p/.zfs/snapshot/s1/a/b"), Some("a/b"));
        assert_eq!(strip_snapshot("/p/.zfs/snapshot/s1"), None);
        assert_eq!(strip_snapshot("/p/.zfs/snapshot//a"), None);
        assert_eq!(strip_snapshot("/p/home/a"), None);
    }

    #[test]
    fn test_filelist_collection_root_is_replaced() {
        let n = PathNormalizer::default();
        assert_eq!(
            n.normalize(Source::FileList, None, "/storage/tmp/zfs-fd-analysis/home/x/f1.txt"),
            "/deep_chll/backup/home/x/f1.txt"
        );
        assert_eq!(
            n.normalize(Source::FileList, None, "/elsewhere/home/x"),
            "/elsewhere/home/x"
        );
    }

    #[test]
    fn test_collection_root_matches_whole_components() {
        for root in ["/collect", "/collect/"] {
            let n = PathNormalizer::new(root, "pool/");
            assert_eq!(n.normalize(Source::FileList, None, "/collect/a"), "/pool/a", "{root}");
            assert_eq!(n.normalize(Source::FileList, None, "/collectX/a"), "/collectX/a", "{root}");
            assert_eq!(n.normalize(Source::FileList, None, "/collect"), "/pool", "{root}");
        }
    }

    #[test]
    fn test_filelist_dataset_argument_is_ignored() {
        let n = PathNormalizer::new("/collect/", "pool/");
        assert_eq!(n.normalize(Source::FileList, Some("ignored"), "/collect/a"), "/pool/a");
    }

    #[test]
    fn test_both_sources_meet_in_one_namespace() {
        let n = PathNormalizer::default();
        let backup = n.normalize(
            Source::Backup,
            Some("deep_chll/backup"),
            "/deep_chll/backup/.zfs/snapshot/daily/home/pat/notes with space.txt",
        );
        let filelist = n.normalize(
            Source::FileList,
            None,
            "/storage/tmp/zfs-fd-analysis/home/pat/notes with space.txt",
        );
        assert_eq!(backup, filelist);
    }

    #[test]
    fn test_canonicalize_guarantees() {
        assert_eq!(canonicalize("a//b///c/"), "/a/b/c");
        assert_eq!(canonicalize("//a/b  \t"), "/a/b");
        assert_eq!(canonicalize("/a /b"), "/a /b");
        assert_eq!(canonicalize(""), "/");
    }
}
