//! Record and media sinks
//!
//! The engine hands every processed observation and every downloaded photo to
//! a [`RecordSink`]. Delivery is at-least-once across restarts: the cursor is
//! committed only after the sink has flushed, so an interrupted page may be
//! written again on the next run.

use crate::{Record, SizeVariant};

pub mod csv;
pub mod files;
pub mod path;

pub use self::csv::MetadataCsvWriter;
pub use files::{FileSink, FileSinkProvider};
pub use path::ResultsLayout;

/// Output writer errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// CSV write error
    #[error("CSV error: {0}")]
    CsvError(String),

    /// Buffer flush error
    #[error("flush error: {0}")]
    FlushError(String),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Destination for one collection's observations and photos
pub trait RecordSink: Send {
    /// Persist an observation's metadata.
    ///
    /// Called after the observation's photos, once per observation.
    fn write_record(&mut self, collection_key: &str, record: &Record) -> OutputResult<()>;

    /// Persist one photo of an observation.
    ///
    /// A photo may be delivered again after an interrupted run, so writes
    /// replace rather than append. `index` is the photo's position in
    /// [`Record::media_refs`].
    fn write_media(
        &mut self,
        collection_key: &str,
        record: &Record,
        index: usize,
        variant: SizeVariant,
        bytes: &[u8],
    ) -> OutputResult<()>;

    /// Make everything written so far durable
    fn flush(&mut self) -> OutputResult<()>;
}

/// Opens a sink per collection for multi-collection runs
pub trait SinkProvider {
    /// Sink for `collection_key`
    fn open_sink(&mut self, collection_key: &str) -> OutputResult<Box<dyn RecordSink>>;
}

impl<S: RecordSink + ?Sized> RecordSink for Box<S> {
    fn write_record(&mut self, collection_key: &str, record: &Record) -> OutputResult<()> {
        (**self).write_record(collection_key, record)
    }

    fn write_media(
        &mut self,
        collection_key: &str,
        record: &Record,
        index: usize,
        variant: SizeVariant,
        bytes: &[u8],
    ) -> OutputResult<()> {
        (**self).write_media(collection_key, record, index, variant, bytes)
    }

    fn flush(&mut self) -> OutputResult<()> {
        (**self).flush()
    }
}
