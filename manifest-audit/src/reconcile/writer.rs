//! Writes a reconciliation report as flat record sets.
//!
//! Each retained category becomes one JSON Lines file with one flat object
//! per path, ready for dataframe tooling. Unknown sizes and mtimes are
//! written as `null`. `summary.json` carries the counters.

use super::{Category, CategoryCounts, ReconciliationRecord, ReconciliationReport};
use crate::context::RunContext;
use crate::manifest::{FileRecord, NumericPolicy, ParseStats, Source};
use crate::utils::errors::Result;
use chrono::{DateTime, SecondsFormat};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

pub const SUMMARY_FILE: &str = "summary.json";

/// File name for a retained category, `None` for identical paths
pub fn category_file_name(category: Category) -> Option<&'static str> {
    match category {
        Category::OnlyInBackup => Some("only_in_backup.jsonl"),
        Category::OnlyInFileList => Some("only_in_filelist.jsonl"),
        Category::SizeMismatch => Some("size_mismatches.jsonl"),
        Category::MtimeMismatch => Some("mtime_mismatches.jsonl"),
        Category::BothMismatch => Some("both_mismatches.jsonl"),
        Category::Identical => None,
    }
}

/// Render epoch seconds as an RFC 3339 UTC timestamp
pub fn format_mtime(mtime: Option<i64>) -> Option<String> {
    mtime
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}

#[derive(Debug, Serialize)]
struct PresenceRow<'a> {
    path: &'a str,
    size: Option<u64>,
    mtime: Option<i64>,
    mtime_utc: Option<String>,
    original_path: &'a str,
}

impl<'a> PresenceRow<'a> {
    fn new(record: &'a FileRecord) -> Self {
        Self {
            path: record.canonical_path(),
            size: record.size().known(),
            mtime: record.mtime().known(),
            mtime_utc: format_mtime(record.mtime().known()),
            original_path: record.original_path(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SizeMismatchRow<'a> {
    path: &'a str,
    backup_size: Option<u64>,
    filelist_size: Option<u64>,
    mtime: Option<i64>,
    mtime_utc: Option<String>,
    backup_original: &'a str,
    filelist_original: &'a str,
}

#[derive(Debug, Serialize)]
struct MtimeMismatchRow<'a> {
    path: &'a str,
    size: Option<u64>,
    backup_mtime: Option<i64>,
    filelist_mtime: Option<i64>,
    backup_mtime_utc: Option<String>,
    filelist_mtime_utc: Option<String>,
    backup_original: &'a str,
    filelist_original: &'a str,
}

#[derive(Debug, Serialize)]
struct BothMismatchRow<'a> {
    path: &'a str,
    backup_size: Option<u64>,
    filelist_size: Option<u64>,
    backup_mtime: Option<i64>,
    filelist_mtime: Option<i64>,
    backup_mtime_utc: Option<String>,
    filelist_mtime_utc: Option<String>,
    backup_original: &'a str,
    filelist_original: &'a str,
}

fn write_row(out: &mut impl Write, record: &ReconciliationRecord) -> Result<()> {
    match record {
        ReconciliationRecord::OnlyInBackup(r) | ReconciliationRecord::OnlyInFileList(r) => {
            serde_json::to_writer(&mut *out, &PresenceRow::new(r))?;
        }
        ReconciliationRecord::SizeMismatch { backup, filelist } => {
            let row = SizeMismatchRow {
                path: backup.canonical_path(),
                backup_size: backup.size().known(),
                filelist_size: filelist.size().known(),
                mtime: backup.mtime().known(),
                mtime_utc: format_mtime(backup.mtime().known()),
                backup_original: backup.original_path(),
                filelist_original: filelist.original_path(),
            };
            serde_json::to_writer(&mut *out, &row)?;
        }
        ReconciliationRecord::MtimeMismatch { backup, filelist } => {
            let row = MtimeMismatchRow {
                path: backup.canonical_path(),
                size: backup.size().known(),
                backup_mtime: backup.mtime().known(),
                filelist_mtime: filelist.mtime().known(),
                backup_mtime_utc: format_mtime(backup.mtime().known()),
                filelist_mtime_utc: format_mtime(filelist.mtime().known()),
                backup_original: backup.original_path(),
                filelist_original: filelist.original_path(),
            };
            serde_json::to_writer(&mut *out, &row)?;
        }
        ReconciliationRecord::BothMismatch { backup, filelist } => {
            let row = BothMismatchRow {
                path: backup.canonical_path(),
                backup_size: backup.size().known(),
                filelist_size: filelist.size().known(),
                backup_mtime: backup.mtime().known(),
                filelist_mtime: filelist.mtime().known(),
                backup_mtime_utc: format_mtime(backup.mtime().known()),
                filelist_mtime_utc: format_mtime(filelist.mtime().known()),
                backup_original: backup.original_path(),
                filelist_original: filelist.original_path(),
            };
            serde_json::to_writer(&mut *out, &row)?;
        }
        // identical paths are counted, never written
        ReconciliationRecord::Identical { .. } => return Ok(()),
    }
    out.write_all(b"\n")?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct SourceStats<'a> {
    backup: &'a ParseStats,
    filelist: &'a ParseStats,
}

/// Contents of `summary.json`
#[derive(Debug, Serialize)]
struct Summary<'a> {
    total_backup: u64,
    total_filelist: u64,
    total_paths: u64,
    in_both: u64,
    categories: &'a CategoryCounts,
    numeric_policy: NumericPolicy,
    parse: SourceStats<'a>,
}

/// Write every retained category and the summary under `out_dir`.
///
/// All five record files are written even when empty, so a rerun always
/// replaces the full set. Returns the paths written.
pub fn write_report(report: &ReconciliationReport, ctx: &RunContext, out_dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(out_dir)?;
    let mut written = Vec::new();

    for category in Category::ALL {
        let Some(name) = category_file_name(category) else {
            continue;
        };
        let path = out_dir.join(name);
        let mut out = BufWriter::new(File::create(&path)?);
        let mut rows = 0u64;
        for record in report.records_in(category) {
            write_row(&mut out, record)?;
            rows += 1;
        }
        out.flush()?;

        info!("Saved {} {} records to {}", rows, category, path.display());
        written.push(path);
    }

    let summary = Summary {
        total_backup: report.backup_total,
        total_filelist: report.filelist_total,
        total_paths: report.union_len(),
        in_both: report.counts.in_both(),
        categories: &report.counts,
        numeric_policy: ctx.options().numeric_policy,
        parse: SourceStats {
            backup: ctx.stats(Source::Backup),
            filelist: ctx.stats(Source::FileList),
        },
    };
    let path = out_dir.join(SUMMARY_FILE);
    let mut out = BufWriter::new(File::create(&path)?);
    serde_json::to_writer_pretty(&mut out, &summary)?;
    out.write_all(b"\n")?;
    out.flush()?;
    written.push(path);

    Ok(written)
}
