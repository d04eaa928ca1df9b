//! Collection jobs, engine phases and run reports

use crate::downloader::progress::RunProgress;
use crate::Cursor;
use serde::{Deserialize, Serialize};

/// One collection to walk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionJob {
    /// Collection key (taxon name)
    pub collection_key: String,
    /// Exclusive lower bound on observation IDs
    pub start_cursor: Cursor,
    /// Per-job override of the configured target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_count: Option<u64>,
}

impl CollectionJob {
    /// Job starting above `start_cursor`
    pub fn new(collection_key: impl Into<String>, start_cursor: Cursor) -> Self {
        Self {
            collection_key: collection_key.into(),
            start_cursor,
            target_count: None,
        }
    }

    /// Override the target for this job only
    pub fn with_target_count(mut self, target_count: u64) -> Self {
        self.target_count = Some(target_count);
        self
    }

    /// Validate job parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.collection_key.trim().is_empty() {
            return Err("Collection key cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Engine state for one collection.
///
/// `Probing -> FetchingPage -> ProcessingItems -> (FetchingPage | Done)`;
/// `Error` and `Cancelled` are reachable from any non-terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Reading the remote total
    #[default]
    Probing,
    /// Waiting on a page query
    FetchingPage,
    /// Handing page records and their media to the sink
    ProcessingItems,
    /// Target reached or collection exhausted
    Done,
    /// Run aborted by an error
    Error,
    /// Stop requested
    Cancelled,
}

impl Phase {
    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Error | Phase::Cancelled)
    }

    /// Whether `next` is a legal successor
    pub fn can_transition_to(&self, next: Phase) -> bool {
        use Phase::*;
        match (self, next) {
            (s, _) if s.is_terminal() => false,
            (_, Error | Cancelled) => true,
            (Probing, FetchingPage | Done) => true,
            (FetchingPage, ProcessingItems | Done) => true,
            (ProcessingItems, FetchingPage | Done) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Phase::Probing => "probing",
            Phase::FetchingPage => "fetching_page",
            Phase::ProcessingItems => "processing_items",
            Phase::Done => "done",
            Phase::Error => "error",
            Phase::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Outcome of a finished collection run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionReport {
    /// Collection key
    pub collection_key: String,
    /// Counters for this run
    pub progress: RunProgress,
    /// Cursor the run started above
    pub start_cursor: Cursor,
    /// Last record fully handed to the sink
    pub final_cursor: Cursor,
    /// Observations requested
    pub requested: u64,
    /// Observations aimed at after the probe
    pub target: u64,
    /// Remote total above the start cursor, from the probe
    pub remote_total: u64,
    /// Records dropped for being at or below the cursor
    pub stale_dropped: u64,
    /// Terminal phase
    pub phase: Phase,
}

impl CollectionReport {
    /// Requested observations that were not delivered
    pub fn shortfall(&self) -> u64 {
        self.requested.saturating_sub(self.progress.records)
    }
}

/// Outcome of a multi-collection run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Per-collection reports, in run order
    pub collections: Vec<CollectionReport>,
    /// Counters summed over all collections
    pub total: RunProgress,
}

impl RunReport {
    /// Append a collection report
    pub fn push(&mut self, report: CollectionReport) {
        self.total.merge(&report.progress);
        self.collections.push(report);
    }
}
