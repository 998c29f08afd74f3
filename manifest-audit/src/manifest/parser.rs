//! Line parsers for the two inventory formats.
//!
//! Backup metadata export (one header line, then):
//!
//! ```text
//! dataset \x1c size \x1c mtime \x1c fullpath
//! ```
//!
//! Live file list (no header):
//!
//! ```text
//! size mtime path with optional spaces
//! ```

use super::{FileRecord, ManifestIndex, MetaValue, NumericPolicy, PathNormalizer, Source};
use crate::context::RunContext;
use crate::progress::LineProgress;
use crate::utils::errors::{AuditError, Result};
use std::fmt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

/// ASCII file separator used between backup export fields
pub const FIELD_SEPARATOR: char = '\x1c';

/// How often (in lines) the loader checks for cancellation
const CANCEL_CHECK_INTERVAL: u64 = 4096;

/// Why a line was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedLine {
    FieldCount { expected: usize, found: usize },
    EmptyPath,
    InvalidPath(String),
}

impl fmt::Display for MalformedLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedLine::FieldCount { expected, found } => {
                write!(f, "has {} fields instead of {}", found, expected)
            }
            MalformedLine::EmptyPath => f.write_str("has an empty path"),
            MalformedLine::InvalidPath(msg) => write!(f, "has an unusable path ({})", msg),
        }
    }
}

/// Result of parsing one raw line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    Record(FileRecord),
    Malformed(MalformedLine),
    Blank,
}

/// Turns raw inventory lines into [`FileRecord`]s
pub trait ManifestParser {
    fn source(&self) -> Source;

    /// Whether the first line of the input is a header to discard
    fn has_header(&self) -> bool {
        false
    }

    fn parse(&self, line: &str) -> ParsedLine;
}

/// Parser for the `\x1c`-separated backup metadata export
#[derive(Debug, Clone, Default)]
pub struct BackupParser {
    normalizer: PathNormalizer,
    policy: NumericPolicy,
}

impl BackupParser {
    pub fn new(normalizer: PathNormalizer, policy: NumericPolicy) -> Self {
        Self { normalizer, policy }
    }
}

impl ManifestParser for BackupParser {
    fn source(&self) -> Source {
        Source::Backup
    }

    fn has_header(&self) -> bool {
        true
    }

    fn parse(&self, line: &str) -> ParsedLine {
        let line = strip_line_ending(line);
        if line.trim().is_empty() {
            return ParsedLine::Blank;
        }

        let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
        let [dataset, size, mtime, fullpath] = fields.as_slice() else {
            return ParsedLine::Malformed(MalformedLine::FieldCount {
                expected: 4,
                found: fields.len(),
            });
        };

        if fullpath.trim().is_empty() {
            return ParsedLine::Malformed(MalformedLine::EmptyPath);
        }

        let canonical = self.normalizer.normalize(Source::Backup, Some(dataset.trim()), fullpath);
        build_record(
            Source::Backup,
            canonical,
            MetaValue::<u64>::parse_size(size, self.policy),
            MetaValue::<i64>::parse_mtime(mtime, self.policy),
            fullpath,
        )
    }
}

/// Parser for the whitespace-separated live file list
#[derive(Debug, Clone, Default)]
pub struct FileListParser {
    normalizer: PathNormalizer,
    policy: NumericPolicy,
}

impl FileListParser {
    pub fn new(normalizer: PathNormalizer, policy: NumericPolicy) -> Self {
        Self { normalizer, policy }
    }
}

impl ManifestParser for FileListParser {
    fn source(&self) -> Source {
        Source::FileList
    }

    fn parse(&self, line: &str) -> ParsedLine {
        let line = line.trim();
        if line.is_empty() {
            return ParsedLine::Blank;
        }

        let mut tokens = WhitespaceSplitN::new(line, 3);
        let (Some(size), Some(mtime), Some(path)) = (tokens.next(), tokens.next(), tokens.next())
        else {
            return ParsedLine::Malformed(MalformedLine::FieldCount {
                expected: 3,
                found: WhitespaceSplitN::new(line, 3).count(),
            });
        };

        let canonical = self.normalizer.normalize(Source::FileList, None, path);
        build_record(
            Source::FileList,
            canonical,
            MetaValue::<u64>::parse_size(size, self.policy),
            MetaValue::<i64>::parse_mtime(mtime, self.policy),
            path,
        )
    }
}

fn build_record(
    source: Source,
    canonical: String,
    size: MetaValue<u64>,
    mtime: MetaValue<i64>,
    original: &str,
) -> ParsedLine {
    match FileRecord::new(source, canonical, size, mtime, original.to_string()) {
        Ok(record) => ParsedLine::Record(record),
        Err(e) => ParsedLine::Malformed(MalformedLine::InvalidPath(e.to_string())),
    }
}

fn strip_line_ending(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

/// Splits on whitespace runs, yielding at most `max` tokens; the last token
/// is the untouched remainder of the input, so it may contain whitespace.
#[derive(Debug, Clone)]
pub struct WhitespaceSplitN<'a> {
    rest: &'a str,
    remaining: usize,
}

impl<'a> WhitespaceSplitN<'a> {
    pub fn new(input: &'a str, max: usize) -> Self {
        Self {
            rest: input.trim(),
            remaining: max,
        }
    }
}

impl<'a> Iterator for WhitespaceSplitN<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if self.remaining == 0 {
            return None;
        }
        let rest = self.rest.trim_start();
        if rest.is_empty() {
            return None;
        }

        self.remaining -= 1;
        if self.remaining == 0 {
            self.rest = "";
            return Some(rest);
        }

        match rest.find(char::is_whitespace) {
            Some(idx) => {
                self.rest = &rest[idx..];
                Some(&rest[..idx])
            }
            None => {
                self.rest = "";
                Some(rest)
            }
        }
    }
}

/// Read an inventory into a [`ManifestIndex`].
///
/// Line-level problems are tallied into `ctx` for the parser's source and
/// never abort the load. Read failures abort with `source_name` and the line
/// number attached. Invalid UTF-8 is replaced rather than rejected.
pub async fn load_index<P, R>(
    parser: &P,
    mut reader: R,
    source_name: &str,
    ctx: &mut RunContext,
) -> Result<ManifestIndex>
where
    P: ManifestParser + ?Sized,
    R: AsyncBufRead + Unpin,
{
    let source = parser.source();
    let cancel = ctx.cancel_token().clone();
    let options = ctx.options().clone();
    let label = match source {
        Source::Backup => "backup entries",
        Source::FileList => "filelist entries",
    };

    info!("Parsing {} manifest: {}", source, source_name);

    let stats = ctx.stats_mut(source);
    *stats = Default::default();

    let mut index = ManifestIndex::new(source);
    let mut progress = LineProgress::new(label, options.progress_interval);
    let mut buf = Vec::with_capacity(512);
    let mut line_no = 0u64;

    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|e| AuditError::read(source_name, line_no + 1, e))?;
        if n == 0 {
            break;
        }
        line_no += 1;
        stats.lines_read += 1;

        if line_no % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
            return Err(AuditError::Cancelled);
        }

        if line_no == 1 && parser.has_header() {
            stats.header_lines += 1;
            continue;
        }

        progress.tick();
        let line = String::from_utf8_lossy(&buf);

        match parser.parse(&line) {
            ParsedLine::Record(record) => {
                stats.records += 1;
                if record.size().is_unknown() {
                    stats.unknown_size += 1;
                }
                if record.mtime().is_unknown() {
                    stats.unknown_mtime += 1;
                }
                if index.insert(record).is_some() {
                    stats.duplicates += 1;
                }
            }
            ParsedLine::Malformed(reason) => {
                stats.malformed += 1;
                if stats.malformed <= options.warn_limit {
                    warn!("{} line {} {}", source_name, line_no, reason);
                }
            }
            ParsedLine::Blank => stats.blank_lines += 1,
        }
    }

    if cancel.is_cancelled() {
        return Err(AuditError::Cancelled);
    }

    progress.finish();
    info!(
        "Loaded {} {} records ({} malformed, {} duplicates, {} unknown sizes, {} unknown mtimes)",
        index.len(),
        source,
        stats.malformed,
        stats.duplicates,
        stats.unknown_size,
        stats.unknown_mtime
    );

    Ok(index)
}
