//! Hierarchical size aggregation over a filelist stream.
//!
//! A producer task cuts the input into chunks of whole lines, a pool of
//! workers scans each chunk on the blocking pool into a [`PartialAggregate`],
//! and a single collector folds the partials as they arrive. Any failure
//! cancels the whole pipeline and no report is produced.

pub mod compare;
pub mod merge;

pub use compare::{compare_sizes, load_sizes, ReportComparison, SizeDifference};
pub use merge::{DirectoryAggregate, DirectoryTotals, PartialAggregate, SkipCounters, SkipReason};

use crate::manifest::{MetaValue, NumericPolicy};
use crate::manifest::parser::WhitespaceSplitN;
use crate::progress::{LineProgress, DEFAULT_PROGRESS_INTERVAL};
use crate::utils::errors::{AuditError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Lines per chunk handed to a worker
pub const DEFAULT_CHUNK_SIZE: usize = 200_000;

/// Number of path components below the base that get their own bucket
pub const DEFAULT_DEPTH: usize = 3;

/// Hardware parallelism, or 1 when it cannot be determined
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Split a path into components on `/`, dropping empty and `.` segments
pub fn split_components(path: &str) -> Vec<&str> {
    path.split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect()
}

/// Absolute directory that aggregation is rooted at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasePath {
    raw: String,
    components: Vec<String>,
}

impl BasePath {
    pub fn parse(raw: &str) -> Result<Self> {
        if !raw.starts_with('/') {
            return Err(AuditError::InvalidPath(format!("base path must be absolute: {:?}", raw)));
        }
        Ok(Self {
            raw: raw.to_string(),
            components: split_components(raw).into_iter().map(str::to_string).collect(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Components of `path` below this base, or `None` unless `path` is a
    /// strict descendant. Matching is per component, so `/base` does not
    /// contain `/basement`.
    pub fn relative<'a>(&self, path: &'a str) -> Option<Vec<&'a str>> {
        let mut components = split_components(path);
        if components.len() <= self.components.len() {
            return None;
        }
        let inside = components
            .iter()
            .zip(&self.components)
            .all(|(c, base)| *c == base.as_str());
        if !inside {
            return None;
        }
        components.drain(..self.components.len());
        Some(components)
    }
}

/// What a single input line contributes
#[derive(Debug, PartialEq, Eq)]
pub enum LineOutcome<'a> {
    Accepted { size: u64, relative: Vec<&'a str> },
    Skipped(SkipReason),
}

/// Classify one `size [mtime] path` line against `base`
pub fn classify_line<'a>(line: &'a str, base: &BasePath) -> LineOutcome<'a> {
    let tokens: Vec<&str> = WhitespaceSplitN::new(line, 3).collect();
    let (size, path) = match tokens.as_slice() {
        [size, .., path] => (*size, *path),
        _ => return LineOutcome::Skipped(SkipReason::Malformed),
    };

    if !path.starts_with('/') {
        return LineOutcome::Skipped(SkipReason::NotAbsolute);
    }
    let Some(size) = MetaValue::<u64>::parse_size(size, NumericPolicy::Strict).known() else {
        return LineOutcome::Skipped(SkipReason::InvalidSize);
    };
    match base.relative(path) {
        Some(relative) => LineOutcome::Accepted { size, relative },
        None => LineOutcome::Skipped(SkipReason::OutsideBase),
    }
}

/// Fixed inputs shared by every worker
#[derive(Debug)]
struct ScanRules {
    base: BasePath,
    depth: usize,
}

/// Scan a block of newline-separated lines into a partial aggregate
fn scan_chunk(text: &str, rules: &ScanRules) -> Result<PartialAggregate> {
    let mut partial = PartialAggregate::default();
    for line in text.lines() {
        partial.lines += 1;
        match classify_line(line, &rules.base) {
            LineOutcome::Accepted { size, relative } => partial.add_file(&relative, size, rules.depth)?,
            LineOutcome::Skipped(reason) => partial.skipped.record(reason),
        }
    }
    Ok(partial)
}

/// Contiguous run of whole lines, still as raw bytes
#[derive(Debug)]
struct Chunk {
    index: u64,
    lines: usize,
    data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationSummary {
    pub total_files: u64,
    pub total_directories: u64,
    pub total_bytes: u64,
}

/// Final aggregation document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationReport {
    pub directories: BTreeMap<String, DirectoryTotals>,
    pub summary: AggregationSummary,
    pub skipped: SkipCounters,
    pub lines_read: u64,
    pub depth: usize,
    pub base_path: String,
}

impl AggregationReport {
    fn from_partial(partial: PartialAggregate, base: &BasePath, depth: usize) -> Self {
        let directories: BTreeMap<_, _> = partial.directories.into_iter().collect();
        Self {
            summary: AggregationSummary {
                total_files: partial.files,
                total_directories: directories.len() as u64,
                total_bytes: partial.bytes,
            },
            directories,
            skipped: partial.skipped,
            lines_read: partial.lines,
            depth,
            base_path: base.as_str().to_string(),
        }
    }

    /// Directory rows in prefix order
    pub fn aggregates(&self) -> impl Iterator<Item = DirectoryAggregate> + '_ {
        self.directories
            .iter()
            .filter_map(|(prefix, totals)| DirectoryAggregate::new(prefix.clone(), *totals, self.depth).ok())
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the pretty-printed document to `path`
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut out, self)?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }
}

/// Parallel chunked aggregation
#[derive(Debug, Clone)]
pub struct AggregationEngine {
    rules: Arc<ScanRules>,
    parallelism: usize,
    chunk_size: usize,
    progress_interval: u64,
    source_name: String,
    cancel: CancellationToken,
}

impl AggregationEngine {
    pub fn new(base_path: &str, depth: usize) -> Result<Self> {
        if depth == 0 {
            return Err(AuditError::Config("depth must be at least 1".to_string()));
        }
        Ok(Self {
            rules: Arc::new(ScanRules {
                base: BasePath::parse(base_path)?,
                depth,
            }),
            parallelism: default_parallelism(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            source_name: "aggregation input".to_string(),
            cancel: CancellationToken::new(),
        })
    }

    /// Worker count; 0 is treated as 1
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Lines per chunk; 0 is treated as 1
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Name used in read errors
    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = name.into();
        self
    }

    /// Stop the run when `cancel` fires
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn base_path(&self) -> &BasePath {
        &self.rules.base
    }

    pub fn depth(&self) -> usize {
        self.rules.depth
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Aggregate every line of `reader`
    pub async fn run<R>(&self, reader: R) -> Result<AggregationReport>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        info!(
            "Aggregating {} under {} (depth {}, {} workers, {} lines per chunk)",
            self.source_name,
            self.rules.base.as_str(),
            self.rules.depth,
            self.parallelism,
            self.chunk_size
        );

        let cancel = self.cancel.child_token();
        let (chunk_tx, chunk_rx) = mpsc::channel::<Chunk>(self.parallelism * 2);
        let (partial_tx, mut partial_rx) = mpsc::channel::<PartialAggregate>(self.parallelism * 2);
        let chunk_rx = Arc::new(Mutex::new(chunk_rx));

        let producer = {
            let cancel = cancel.clone();
            let chunk_size = self.chunk_size;
            let interval = self.progress_interval;
            let source_name = self.source_name.clone();
            tokio::spawn(async move {
                let result = read_chunks(reader, chunk_tx, chunk_size, interval, &source_name, &cancel).await;
                if result.is_err() {
                    cancel.cancel();
                }
                result
            })
        };

        let mut workers: Vec<JoinHandle<Result<()>>> = Vec::with_capacity(self.parallelism);
        for worker_id in 0..self.parallelism {
            let chunks = Arc::clone(&chunk_rx);
            let partials = partial_tx.clone();
            let rules = Arc::clone(&self.rules);
            let cancel = cancel.clone();
            workers.push(tokio::spawn(async move {
                run_worker(worker_id, chunks, partials, rules, cancel).await
            }));
        }
        drop(partial_tx);

        let mut merged = PartialAggregate::default();
        let mut failure = None;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = partial_rx.recv() => match next {
                    Some(partial) => {
                        if let Err(e) = merged.merge(partial) {
                            cancel.cancel();
                            failure = Some(e);
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        drop(partial_rx);

        for handle in workers {
            let outcome = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    cancel.cancel();
                    Err(AuditError::WorkerFailure(format!("worker task failed: {}", e)))
                }
            };
            if let Err(e) = outcome {
                failure.get_or_insert(e);
            }
        }
        let produced = match producer.await {
            Ok(result) => result,
            Err(e) => Err(AuditError::WorkerFailure(format!("reader task failed: {}", e))),
        };

        if let Some(e) = failure {
            return Err(e);
        }
        let lines_read = produced?;
        if cancel.is_cancelled() {
            return Err(AuditError::Cancelled);
        }
        debug_assert_eq!(lines_read, merged.lines);

        let report = AggregationReport::from_partial(merged, &self.rules.base, self.rules.depth);
        info!(
            "Aggregated {} files into {} directories ({} lines, {} skipped)",
            report.summary.total_files,
            report.summary.total_directories,
            report.lines_read,
            report.skipped.total()
        );
        Ok(report)
    }
}

/// Read `reader` into chunks of `chunk_size` lines. Returns the line count.
async fn read_chunks<R>(
    mut reader: R,
    chunks: mpsc::Sender<Chunk>,
    chunk_size: usize,
    progress_interval: u64,
    source_name: &str,
    cancel: &CancellationToken,
) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut progress = LineProgress::new("lines read", progress_interval);
    let mut line_no = 0u64;
    let mut index = 0u64;
    let mut chunk = Chunk {
        index,
        lines: 0,
        data: Vec::new(),
    };

    loop {
        if chunk.lines == 0 && cancel.is_cancelled() {
            return Err(AuditError::Cancelled);
        }

        let n = reader
            .read_until(b'\n', &mut chunk.data)
            .await
            .map_err(|e| AuditError::read(source_name, line_no + 1, e))?;
        if n == 0 {
            break;
        }
        line_no += 1;
        chunk.lines += 1;
        progress.tick();

        if chunk.lines == chunk_size {
            index += 1;
            let full = std::mem::replace(
                &mut chunk,
                Chunk {
                    index,
                    lines: 0,
                    data: Vec::new(),
                },
            );
            if !send_chunk(&chunks, full, cancel).await? {
                return Ok(line_no);
            }
        }
    }

    if chunk.lines > 0 && !send_chunk(&chunks, chunk, cancel).await? {
        return Ok(line_no);
    }
    progress.finish();
    Ok(line_no)
}

/// Returns `false` when every worker has gone away
async fn send_chunk(chunks: &mpsc::Sender<Chunk>, chunk: Chunk, cancel: &CancellationToken) -> Result<bool> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AuditError::Cancelled),
        sent = chunks.send(chunk) => Ok(sent.is_ok()),
    }
}

async fn run_worker(
    worker_id: usize,
    chunks: Arc<Mutex<mpsc::Receiver<Chunk>>>,
    partials: mpsc::Sender<PartialAggregate>,
    rules: Arc<ScanRules>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            chunk = async { chunks.lock().await.recv().await } => chunk,
        };
        let Some(chunk) = next else {
            return Ok(());
        };

        let index = chunk.index;
        let lines = chunk.lines;
        let rules = Arc::clone(&rules);
        let scanned = tokio::task::spawn_blocking(move || {
            let text = String::from_utf8_lossy(&chunk.data);
            scan_chunk(&text, &rules)
        })
        .await;

        let partial = match scanned {
            Ok(Ok(partial)) => partial,
            Ok(Err(e)) => {
                cancel.cancel();
                return Err(e);
            }
            Err(e) => {
                cancel.cancel();
                return Err(AuditError::WorkerFailure(format!(
                    "worker {} failed on chunk {}: {}",
                    worker_id, index, e
                )));
            }
        };
        debug!(
            "Worker {} scanned chunk {} ({} lines, {} files, {} prefixes)",
            worker_id,
            index,
            lines,
            partial.files,
            partial.directories.len()
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            sent = partials.send(partial) => {
                if sent.is_err() {
                    return Ok(());
                }
            }
        }
    }
}

/// Aggregate `stream` under `base_path` with the default chunk size
pub async fn aggregate<R>(stream: R, base_path: &str, depth: usize, parallelism: usize) -> Result<AggregationReport>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    AggregationEngine::new(base_path, depth)?
        .with_parallelism(parallelism)
        .run(stream)
        .await
}
