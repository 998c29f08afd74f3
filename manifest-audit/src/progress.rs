//! Line-count progress tracking for long manifest passes.
//!
//! Inventories run to tens of millions of lines, so every pass (parsing,
//! comparing, chunking) reports how far it got on a fixed line cadence,
//! together with the observed rate.

use std::time::{Duration, Instant};
use tracing::info;

/// Default number of lines between two progress events
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 100_000;

/// Counts processed lines and emits an `info` event every `interval` lines
#[derive(Debug)]
pub struct LineProgress {
    label: &'static str,
    interval: u64,
    processed: u64,
    start_time: Instant,
}

impl LineProgress {
    /// Create a tracker; an `interval` of 0 is treated as 1
    pub fn new(label: &'static str, interval: u64) -> Self {
        Self {
            label,
            interval: interval.max(1),
            processed: 0,
            start_time: Instant::now(),
        }
    }

    /// Record one processed line. Returns `true` when an event was emitted.
    pub fn tick(&mut self) -> bool {
        self.processed += 1;
        if self.processed % self.interval != 0 {
            return false;
        }

        let elapsed = self.elapsed();
        info!(
            "  Processed {} {} ({:.0}/sec, {} elapsed)",
            self.processed,
            self.label,
            self.rate(),
            format_duration(elapsed.as_secs())
        );
        true
    }

    /// Number of lines recorded so far
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Time since the tracker was created
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average lines per second since start
    pub fn rate(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.processed as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Emit the closing event for this pass
    pub fn finish(&self) {
        info!(
            "  Final: {} {} in {:.1}s ({:.0}/sec)",
            self.processed,
            self.label,
            self.elapsed().as_secs_f64(),
            self.rate()
        );
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
