use async_compression::tokio::write::ZstdEncoder;
use manifest_audit::aggregate::{aggregate, AggregationReport};
use manifest_audit::input::open_input;
use manifest_audit::manifest::{load_index, BackupParser, FileListParser, PathNormalizer};
use manifest_audit::reconcile::writer::write_report;
use manifest_audit::{reconcile, Category, NumericPolicy, RunContext, RunOptions, Source};
use std::path::Path;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;

const SNAP: &str = "/deep_chll/backup/.zfs/snapshot/auto-2025-07-30";
const ROOT: &str = "/storage/tmp/zfs-fd-analysis";

fn backup_manifest() -> String {
    let mut text = String::from("dataset\x1csize\x1cmtime\x1cpath\n");
    for (size, mtime, rel) in [
        ("10", "100", "home/x/f1"),
        ("20", "100", "home/x/f2"),
        ("5", "100", "home/y/report final.txt"),
        ("7", "300", "only/backup.bin"),
        ("n/a", "100", "home/z/unknown"),
    ] {
        text.push_str(&format!("deep_chll/backup\x1c{size}\x1c{mtime}\x1c{SNAP}/{rel}\n"));
    }
    text.push_str("broken line without separators\n");
    text
}

fn filelist_manifest() -> String {
    let mut text = String::new();
    for (size, mtime, rel) in [
        ("10", "100", "home/x/f1"),
        ("21", "100", "home/x/f2"),
        ("5", "200", "home/y/report final.txt"),
        ("3", "100", "only/filelist.bin"),
        ("0", "100", "home/z/unknown"),
    ] {
        text.push_str(&format!("{size} {mtime} {ROOT}/{rel}\n"));
    }
    text.push_str("42\n");
    text
}

async fn write_zstd(path: &Path, content: &str) {
    let mut encoder = ZstdEncoder::new(tokio::fs::File::create(path).await.unwrap());
    encoder.write_all(content.as_bytes()).await.unwrap();
    encoder.shutdown().await.unwrap();
}

fn read_rows(path: &Path) -> Vec<serde_json::Value> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[tokio::test]
async fn test_reconcile_pipeline_end_to_end() {
    let dir = TempDir::new().unwrap();
    let backup_path = dir.path().join("backup.txt");
    let filelist_path = dir.path().join("filelist.txt.zst");
    std::fs::write(&backup_path, backup_manifest()).unwrap();
    write_zstd(&filelist_path, &filelist_manifest()).await;

    let mut ctx = RunContext::new(RunOptions::default());
    let normalizer = PathNormalizer::default();
    let backup = load_index(
        &BackupParser::new(normalizer.clone(), NumericPolicy::Strict),
        open_input(&backup_path).await.unwrap(),
        "backup.txt",
        &mut ctx,
    )
    .await
    .unwrap();
    let filelist = load_index(
        &FileListParser::new(normalizer, NumericPolicy::Strict),
        open_input(&filelist_path).await.unwrap(),
        "filelist.txt.zst",
        &mut ctx,
    )
    .await
    .unwrap();

    assert_eq!(backup.len(), 5);
    assert_eq!(filelist.len(), 5);
    assert_eq!(ctx.stats(Source::Backup).header_lines, 1);
    assert_eq!(ctx.stats(Source::Backup).malformed, 1);
    assert_eq!(ctx.stats(Source::Backup).unknown_size, 1);
    assert_eq!(ctx.stats(Source::FileList).malformed, 1);

    let report = reconcile(&backup, &filelist);
    assert_eq!(report.union_len(), 6);
    assert_eq!(report.counts.get(Category::Identical), 1);
    assert_eq!(report.counts.get(Category::SizeMismatch), 2);
    assert_eq!(report.counts.get(Category::MtimeMismatch), 1);
    assert_eq!(report.counts.get(Category::OnlyInBackup), 1);
    assert_eq!(report.counts.get(Category::OnlyInFileList), 1);
    assert_eq!(report.counts.total(), report.union_len());

    let out = dir.path().join("out");
    write_report(&report, &ctx, &out).unwrap();

    let sizes = read_rows(&out.join("size_mismatches.jsonl"));
    let paths: Vec<&str> = sizes.iter().map(|r| r["path"].as_str().unwrap()).collect();
    assert_eq!(paths, vec!["/deep_chll/backup/home/x/f2", "/deep_chll/backup/home/z/unknown"]);
    assert!(sizes[1]["backup_size"].is_null());
    assert_eq!(sizes[1]["filelist_size"], 0);

    let mtimes = read_rows(&out.join("mtime_mismatches.jsonl"));
    assert_eq!(mtimes[0]["path"], "/deep_chll/backup/home/y/report final.txt");

    let only_backup = read_rows(&out.join("only_in_backup.jsonl"));
    assert_eq!(only_backup[0]["path"], "/deep_chll/backup/only/backup.bin");

    let summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out.join("summary.json")).unwrap()).unwrap();
    assert_eq!(summary["total_paths"], 6);
    assert_eq!(summary["parse"]["backup"]["unknown_size"], 1);
}

#[tokio::test]
async fn test_legacy_zero_policy_hides_the_unknown_size() {
    let mut ctx = RunContext::new(RunOptions {
        numeric_policy: NumericPolicy::CoerceZero,
        ..RunOptions::default()
    });
    let backup_text = backup_manifest();
    let filelist_text = filelist_manifest();
    let backup = load_index(
        &BackupParser::new(PathNormalizer::default(), NumericPolicy::CoerceZero),
        backup_text.as_bytes(),
        "backup",
        &mut ctx,
    )
    .await
    .unwrap();
    let filelist = load_index(
        &FileListParser::new(PathNormalizer::default(), NumericPolicy::CoerceZero),
        filelist_text.as_bytes(),
        "filelist",
        &mut ctx,
    )
    .await
    .unwrap();

    let report = reconcile(&backup, &filelist);
    assert_eq!(report.counts.get(Category::SizeMismatch), 1);
    assert_eq!(report.counts.get(Category::Identical), 2);
}

#[tokio::test]
async fn test_aggregate_pipeline_end_to_end() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("filelist.txt.zst");
    write_zstd(&input, &filelist_manifest()).await;

    let report = aggregate(open_input(&input).await.unwrap(), ROOT, 2, 4).await.unwrap();
    assert_eq!(report.lines_read, 6);
    assert_eq!(report.skipped.malformed, 1);
    assert_eq!(report.summary.total_files, 5);
    assert_eq!(report.summary.total_bytes, 39);
    assert_eq!(report.directories["home"].total_size, 36);
    assert_eq!(report.directories["home"].file_count, 4);
    assert_eq!(report.directories["home/x"].total_size, 31);
    assert_eq!(report.directories["only/filelist.bin"].file_count, 1);

    let output = dir.path().join("sizes.json");
    report.write_to(&output).unwrap();
    let reread: AggregationReport = serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(reread, report);
}
