//! Per-collection checkpoints

use crate::downloader::progress::RunProgress;
use crate::Cursor;
use serde::{Deserialize, Serialize};

/// Last committed position of one collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionCheckpoint {
    cursor: Cursor,
    records: u64,
    media_files: u64,
    media_bytes: u64,
    #[serde(default)]
    completed: bool,
    committed_at: i64,
}

impl CollectionCheckpoint {
    /// Checkpoint at `cursor` carrying the counters of the run that wrote it
    pub fn new(cursor: Cursor, progress: &RunProgress) -> Self {
        Self {
            cursor,
            records: progress.records,
            media_files: progress.media_files,
            media_bytes: progress.media_bytes,
            completed: false,
            committed_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Mark the collection's target as reached
    pub fn completed(mut self) -> Self {
        self.completed = true;
        self
    }

    /// Last record ID fully handed to the sink
    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Observations processed by the writing run
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Photos saved by the writing run
    pub fn media_files(&self) -> u64 {
        self.media_files
    }

    /// Photo bytes saved by the writing run
    pub fn media_bytes(&self) -> u64 {
        self.media_bytes
    }

    /// Whether the writing run reached its target
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Commit time (Unix milliseconds)
    pub fn committed_at(&self) -> i64 {
        self.committed_at
    }
}
