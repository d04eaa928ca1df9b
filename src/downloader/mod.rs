//! Quota-governed collection downloads
//!
//! # Overview
//!
//! 1. **Job Creation**: Describe a collection with [`job::CollectionJob`]
//! 2. **Quota Tracking**: Admission against every window via [`quota::QuotaTracker`]
//! 3. **Execution**: Walk the collection with [`executor::FetchEngine`]
//! 4. **Progress Tracking**: Counters in [`progress::RunProgress`], returned in a
//!    [`job::CollectionReport`]
//! 5. **Resume Support**: Cursor committed after every page
//!
//! # Error Handling
//!
//! Every engine failure is an [`EngineError`] whose [`EngineError::kind`]
//! tells the operator what happened:
//! - quota exhaustion is never an error, the engine waits
//! - transient transport failures are retried a bounded number of times
//! - fatal transport failures skip the current photo, or abort the run when
//!   the page query itself fails
//! - a remote total below the target is a warning
//! - configuration errors abort before any request is sent
//!
//! # Related Modules
//!
//! - [`crate::fetcher`] - Transport and iNaturalist client
//! - [`crate::output`] - Sinks
//! - [`crate::resume`] - Cursor persistence

pub mod config;
pub mod executor;
pub mod job;
pub mod progress;
pub mod quota;

pub use config::{EngineConfig, QuotaConfig, RetryPolicy};
pub use executor::{CollectionObserver, FetchEngine};
pub use job::{CollectionJob, CollectionReport, Phase, RunReport};
pub use progress::RunProgress;
pub use quota::{QuotaError, QuotaKind, QuotaTracker, WindowSpec};

use crate::fetcher::{FetcherError, PaginationError, TransportError};
use crate::output::OutputError;
use crate::resume::ResumeError;
use crate::Cursor;

/// Failure categories surfaced to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A quota window is full; the engine waits for it to reset
    QuotaExhausted,
    /// Retryable transport failure that outlasted the retry budget
    TransportTransient,
    /// Non-retryable transport failure
    TransportFatal,
    /// The service has fewer records than requested
    RemoteDataMissing,
    /// Settings or inputs the run cannot start with
    Configuration,
    /// Page violated cursor ordering
    Pagination,
    /// Sink could not persist data
    Sink,
    /// Resume state could not be read or written
    Resume,
    /// Stop requested
    Cancelled,
}

impl ErrorKind {
    /// Stable label for logs and JSON output
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::QuotaExhausted => "quota_exhausted",
            ErrorKind::TransportTransient => "transport_transient",
            ErrorKind::TransportFatal => "transport_fatal",
            ErrorKind::RemoteDataMissing => "remote_data_missing",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Pagination => "pagination",
            ErrorKind::Sink => "sink",
            ErrorKind::Resume => "resume",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid configuration or job
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Quota misconfiguration (request larger than a window)
    #[error("quota error: {0}")]
    Quota(#[source] QuotaError),

    /// Page query failed for good
    #[error("page query for {collection} failed at cursor {cursor}: {source}")]
    Query {
        /// Collection key
        collection: String,
        /// Cursor of the failed query
        cursor: Cursor,
        /// Underlying failure
        #[source]
        source: FetcherError,
    },

    /// Page broke the cursor invariants
    #[error("pagination error: {0}")]
    Pagination(#[from] PaginationError),

    /// Sink failure
    #[error("output error: {0}")]
    Output(#[from] OutputError),

    /// Resume state failure
    #[error("resume error: {0}")]
    Resume(#[from] ResumeError),

    /// Stop requested; the cursor was persisted
    #[error("cancelled while processing {collection} at cursor {cursor}")]
    Cancelled {
        /// Collection key
        collection: String,
        /// Last committed cursor
        cursor: Cursor,
    },
}

impl EngineError {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Configuration(_) | EngineError::Quota(_) => ErrorKind::Configuration,
            EngineError::Query { source, .. } => match source {
                FetcherError::Transport(TransportError::Exhausted { .. }) => {
                    ErrorKind::TransportTransient
                }
                FetcherError::Transport(TransportError::Cancelled) => ErrorKind::Cancelled,
                _ => ErrorKind::TransportFatal,
            },
            EngineError::Pagination(_) => ErrorKind::Pagination,
            EngineError::Output(_) => ErrorKind::Sink,
            EngineError::Resume(_) => ErrorKind::Resume,
            EngineError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Whether the run stopped because of a stop request
    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}
