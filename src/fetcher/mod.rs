//! Remote access: resilient transport, iNaturalist client and cursor pagination

use crate::{Cursor, MediaRef, QualityGrade, Record};
use async_trait::async_trait;
use bytes::Bytes;

pub mod http;
pub mod inat;
pub mod inat_config;
pub mod inat_parser;
pub mod pagination;
pub mod retry_formatter;
pub mod shared_resources;

pub use http::{HttpTransport, TransportError};
pub use pagination::{PageCursorWalker, PageStep, PaginationError, TargetPlan};

/// Fetcher errors
#[derive(Debug, thiserror::Error)]
pub enum FetcherError {
    /// Transport failed (after retries when the failure was transient)
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Response parse error
    #[error("parse error: {0}")]
    ParseError(String),

    /// Response is well-formed JSON but not a valid observations page
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl FetcherError {
    /// Whether the failure was transient and retries ran out
    pub fn is_transient(&self) -> bool {
        matches!(self, FetcherError::Transport(e) if e.is_transient())
    }

    /// Whether a stop request interrupted the call
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetcherError::Transport(TransportError::Cancelled))
    }
}

/// Result type for fetcher operations
pub type FetcherResult<T> = Result<T, FetcherError>;

/// Query filters shared by every page of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFilters {
    /// Quality grade constraint
    pub quality: QualityGrade,
    /// Licence constraint for observation and photos ("any" disables it)
    pub license: String,
}

impl Default for PageFilters {
    fn default() -> Self {
        Self {
            quality: QualityGrade::Research,
            license: "any".to_string(),
        }
    }
}

/// One page query: records strictly above `cursor`, ascending by ID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Collection being walked (taxon name)
    pub collection_key: String,
    /// Exclusive lower bound on record IDs
    pub cursor: Cursor,
    /// Records requested
    pub page_size: u32,
    /// Query filters
    pub filters: PageFilters,
}

/// Records returned for a page query
#[derive(Debug, Clone, PartialEq)]
pub struct PageResponse {
    /// Records matching the query above the cursor, as reported by the service
    pub total_results: u64,
    /// Page content, ascending by ID
    pub records: Vec<Record>,
}

/// Remote paginated collection with downloadable media
#[async_trait]
pub trait RemoteCollection: Send + Sync {
    /// Execute one page query
    async fn query_page(&self, request: &PageRequest) -> FetcherResult<PageResponse>;

    /// Download the bytes behind a media reference
    async fn fetch_media(&self, media: &MediaRef) -> FetcherResult<Bytes>;
}
