//! Run-scoped state threaded through every pass.
//!
//! A [`RunContext`] carries the options that shape parsing, the per-source
//! tallies collected while loading inventories, and the cancellation token
//! shared with the aggregation workers. Nothing here is global; two runs in
//! one process never see each other's counters.

use crate::config::Config;
use crate::manifest::{NumericPolicy, ParseStats, Source};
use crate::progress::DEFAULT_PROGRESS_INTERVAL;
use tokio_util::sync::CancellationToken;

/// Number of malformed lines per source that are logged individually
pub const DEFAULT_WARN_LIMIT: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub numeric_policy: NumericPolicy,
    pub progress_interval: u64,
    pub warn_limit: u64,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            numeric_policy: NumericPolicy::default(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            warn_limit: DEFAULT_WARN_LIMIT,
        }
    }
}

impl From<&Config> for RunOptions {
    fn from(config: &Config) -> Self {
        Self {
            numeric_policy: config.parse.numeric_policy,
            progress_interval: config.parse.progress_interval,
            warn_limit: DEFAULT_WARN_LIMIT,
        }
    }
}

#[derive(Debug, Default)]
pub struct RunContext {
    options: RunOptions,
    cancel: CancellationToken,
    backup: ParseStats,
    filelist: ParseStats,
}

impl RunContext {
    pub fn new(options: RunOptions) -> Self {
        Self::with_cancel(options, CancellationToken::new())
    }

    /// Create a context whose run stops when `cancel` fires
    pub fn with_cancel(options: RunOptions, cancel: CancellationToken) -> Self {
        Self {
            options,
            cancel,
            backup: ParseStats::default(),
            filelist: ParseStats::default(),
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn stats(&self, source: Source) -> &ParseStats {
        match source {
            Source::Backup => &self.backup,
            Source::FileList => &self.filelist,
        }
    }

    pub fn stats_mut(&mut self, source: Source) -> &mut ParseStats {
        match source {
            Source::Backup => &mut self.backup,
            Source::FileList => &mut self.filelist,
        }
    }
}
