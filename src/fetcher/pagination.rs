//! Cursor pagination over an ID-ordered collection
//!
//! Pages are addressed by an exclusive `id_above` watermark instead of page
//! numbers, so records inserted or deleted between requests never shift the
//! window. The walker is pure: it builds requests, plans the target from the
//! probe, and checks each page before the cursor moves.
//!
//! Safety mechanisms:
//! - Maximum iteration limit to prevent infinite loops
//! - Empty page detection
//! - Stale and out-of-order record detection

use super::{PageFilters, PageRequest};
use crate::{Cursor, Record};
use tracing::{debug, warn};

/// Maximum number of page iterations per collection before giving up
pub const MAX_ITERATIONS: usize = 100_000;

/// Page-level invariant violations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaginationError {
    /// Page IDs were not strictly ascending
    #[error("page is not ascending by id: {next} follows {previous}")]
    NonMonotonic { previous: u64, next: u64 },

    /// Every record on a non-empty page was at or below the cursor
    #[error("page made no progress past cursor {cursor} ({stale} stale records)")]
    NoProgress { cursor: Cursor, stale: usize },

    /// Iteration guard tripped
    #[error("max iterations ({MAX_ITERATIONS}) exceeded for {collection}; last cursor {cursor}")]
    TooManyIterations { collection: String, cursor: Cursor },
}

/// Target after comparing the request with the remote total
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetPlan {
    /// Records to fetch
    pub target: u64,
    /// Records the service reports above the start cursor
    pub available: u64,
    /// Whether the request was reduced to `available`
    pub clamped: bool,
}

/// Result of checking one page against the cursor
#[derive(Debug, Clone, PartialEq)]
pub enum PageStep {
    /// Empty page: the collection has nothing more above the cursor
    Exhausted,
    /// Records to process and the cursor after the last one
    Page {
        records: Vec<Record>,
        next_cursor: Cursor,
        dropped: usize,
    },
}

/// Builds page requests and advances the cursor
#[derive(Debug, Clone)]
pub struct PageCursorWalker {
    page_size_max: u32,
    filters: PageFilters,
}

impl PageCursorWalker {
    /// Create a walker with the server's page size limit and the run's filters
    pub fn new(page_size_max: u32, filters: PageFilters) -> Self {
        Self {
            page_size_max: page_size_max.max(1),
            filters,
        }
    }

    /// Largest page this walker requests
    pub fn page_size_max(&self) -> u32 {
        self.page_size_max
    }

    /// Single-record query used to read `total_results`
    pub fn probe_request(&self, collection_key: &str, cursor: Cursor) -> PageRequest {
        PageRequest {
            collection_key: collection_key.to_string(),
            cursor,
            page_size: 1,
            filters: self.filters.clone(),
        }
    }

    /// Next page request, or `None` when nothing remains to fetch.
    ///
    /// `page_size = min(page_size_max, remaining)`.
    pub fn next_page(
        &self,
        collection_key: &str,
        cursor: Cursor,
        remaining: u64,
    ) -> Option<PageRequest> {
        if remaining == 0 {
            return None;
        }
        let page_size = u64::from(self.page_size_max).min(remaining) as u32;
        Some(PageRequest {
            collection_key: collection_key.to_string(),
            cursor,
            page_size,
            filters: self.filters.clone(),
        })
    }

    /// Compare the requested count with what the service reports
    pub fn plan_target(&self, requested: u64, available: u64) -> TargetPlan {
        TargetPlan {
            target: requested.min(available),
            available,
            clamped: available < requested,
        }
    }

    /// Check a page against `cursor` and compute the next cursor.
    ///
    /// Records at or below the cursor are dropped with a warning. The rest
    /// must be strictly ascending.
    pub fn advance(&self, cursor: Cursor, records: Vec<Record>) -> Result<PageStep, PaginationError> {
        if records.is_empty() {
            debug!(%cursor, "Empty page received, collection exhausted");
            return Ok(PageStep::Exhausted);
        }

        let received = records.len();
        let fresh: Vec<Record> = records.into_iter().filter(|r| r.cursor() > cursor).collect();
        let dropped = received - fresh.len();

        if dropped > 0 {
            warn!(%cursor, dropped, "Dropping records at or below the cursor");
        }

        let Some(last) = fresh.last() else {
            return Err(PaginationError::NoProgress {
                cursor,
                stale: dropped,
            });
        };
        let next_cursor = last.cursor();

        if let Some(pair) = fresh.windows(2).find(|pair| pair[0].id >= pair[1].id) {
            return Err(PaginationError::NonMonotonic {
                previous: pair[0].id,
                next: pair[1].id,
            });
        }

        Ok(PageStep::Page {
            records: fresh,
            next_cursor,
            dropped,
        })
    }

    /// Iteration guard
    pub fn check_iteration(
        &self,
        iteration: usize,
        collection_key: &str,
        cursor: Cursor,
    ) -> Result<(), PaginationError> {
        if iteration >= MAX_ITERATIONS {
            return Err(PaginationError::TooManyIterations {
                collection: collection_key.to_string(),
                cursor,
            });
        }
        Ok(())
    }
}
