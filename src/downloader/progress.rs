//! Run progress counters and periodic progress reporting.
//!
//! [`RunProgress`] is plain data owned by the caller of the engine and
//! returned in every report. [`ProgressState`] decides when a `[PROGRESS]`
//! line is worth logging and formats it.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);
const MIN_DOWNLOAD_DURATION: Duration = Duration::from_secs(30);
const BYTES_PER_MB: f64 = 1_000_000.0;

/// Counters for one collection run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProgress {
    /// Observations handed to the sink
    pub records: u64,
    /// Photos written
    pub media_files: u64,
    /// Photo bytes written
    pub media_bytes: u64,
    /// Photos skipped after a failure
    pub failed_media: u64,
    /// Page queries sent, probe included
    pub queries: u64,
}

impl RunProgress {
    /// Photo volume in megabytes (10^6 bytes)
    pub fn media_megabytes(&self) -> f64 {
        self.media_bytes as f64 / BYTES_PER_MB
    }

    /// Add another run's counters
    pub fn merge(&mut self, other: &RunProgress) {
        self.records += other.records;
        self.media_files += other.media_files;
        self.media_bytes += other.media_bytes;
        self.failed_media += other.failed_media;
        self.queries += other.queries;
    }

    /// One-line summary, e.g. "120 observations, 310 images (42.17 MB)"
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} observations, {} images ({:.2} MB)",
            self.records,
            self.media_files,
            self.media_megabytes()
        );
        if self.failed_media > 0 {
            summary.push_str(&format!(", {} images skipped", self.failed_media));
        }
        summary
    }
}

/// Throttles `[PROGRESS]` log lines by time and percentage
#[derive(Debug, Clone)]
pub struct ProgressState {
    target: u64,
    start_time: Instant,
    last_update: Instant,
    update_interval: Duration,
    last_reported_percentage: f64,
    min_percentage_step: f64,
}

impl ProgressState {
    /// Tracker for a run aiming at `target` observations
    pub fn new(target: u64) -> Self {
        let now = Instant::now();
        Self {
            target,
            start_time: now,
            last_update: now,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            last_reported_percentage: 0.0,
            min_percentage_step: 10.0,
        }
    }

    /// Override the cadence
    pub fn with_update_interval(mut self, interval: Duration, min_percentage_step: f64) -> Self {
        self.update_interval = interval;
        self.min_percentage_step = min_percentage_step;
        self
    }

    /// Observations the run aims at
    pub fn target(&self) -> u64 {
        self.target
    }

    /// Completion percentage (0-100)
    pub fn percentage(&self, progress: &RunProgress) -> f64 {
        if self.target == 0 {
            return 100.0;
        }
        (progress.records as f64 / self.target as f64 * 100.0).min(100.0)
    }

    /// Whether a progress line should be emitted now
    pub fn should_emit_update(&self, progress: &RunProgress) -> bool {
        if progress.records == 0 {
            return false;
        }

        if self.percentage(progress) - self.last_reported_percentage >= self.min_percentage_step {
            return true;
        }

        self.start_time.elapsed() >= MIN_DOWNLOAD_DURATION
            && self.last_update.elapsed() >= self.update_interval
    }

    /// Call after emitting a progress line
    pub fn mark_emitted(&mut self, progress: &RunProgress) {
        self.last_update = Instant::now();
        self.last_reported_percentage = self.percentage(progress);
    }

    /// Remaining time at the current observation rate
    pub fn estimate_remaining(&self, progress: &RunProgress) -> Option<Duration> {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if progress.records == 0 || elapsed <= 0.0 {
            return None;
        }
        let remaining = self.target.saturating_sub(progress.records);
        if remaining == 0 {
            return None;
        }
        let rate = progress.records as f64 / elapsed;
        Some(Duration::from_secs_f64(remaining as f64 / rate))
    }

    /// Human-readable progress string for logging
    pub fn format_progress(&self, progress: &RunProgress) -> String {
        let mut line = format!(
            "[PROGRESS] Observation {}/{} - {:.1}% complete - {} images ({:.2} MB)",
            progress.records,
            self.target,
            self.percentage(progress),
            progress.media_files,
            progress.media_megabytes()
        );
        if let Some(remaining) = self.estimate_remaining(progress) {
            line.push_str(&format!(" - ~{} remaining", format_duration(remaining)));
        }
        line
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
