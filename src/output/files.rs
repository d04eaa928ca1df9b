//! Filesystem sink: metadata CSV plus one JPEG per photo

use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::csv::MetadataCsvWriter;
use super::path::ResultsLayout;
use super::{OutputError, OutputResult, RecordSink, SinkProvider};
use crate::{Record, SizeVariant};

/// Writes one species into the results directory
pub struct FileSink {
    layout: ResultsLayout,
    images_dir: PathBuf,
    metadata: MetadataCsvWriter,
    media_written: u64,
}

impl FileSink {
    /// Prepare `<results>/<Species>_metadata.csv` and `<results>/<Species>_images/`
    pub fn create(results_dir: impl AsRef<Path>, collection_key: &str) -> OutputResult<Self> {
        let layout = ResultsLayout::new(results_dir.as_ref());
        let images_dir = layout.images_dir(collection_key);

        std::fs::create_dir_all(&images_dir).map_err(|e| {
            OutputError::IoError(format!(
                "Failed to create image directory {}: {}",
                images_dir.display(),
                e
            ))
        })?;

        let metadata = MetadataCsvWriter::open(layout.metadata_csv(collection_key))?;
        info!(
            collection = collection_key,
            images_dir = %images_dir.display(),
            "File sink ready"
        );

        Ok(Self {
            layout,
            images_dir,
            metadata,
            media_written: 0,
        })
    }

    /// Directory photos are written to
    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    /// Photos written by this sink
    pub fn media_written(&self) -> u64 {
        self.media_written
    }
}

impl RecordSink for FileSink {
    fn write_record(&mut self, _collection_key: &str, record: &Record) -> OutputResult<()> {
        self.metadata.write(record)
    }

    fn write_media(
        &mut self,
        collection_key: &str,
        record: &Record,
        index: usize,
        variant: SizeVariant,
        bytes: &[u8],
    ) -> OutputResult<()> {
        let target = self
            .images_dir
            .join(ResultsLayout::image_file_name(collection_key, record, index));

        // Temp file in the same directory, then rename: no half-written JPEGs
        let mut temp = tempfile::NamedTempFile::new_in(&self.images_dir)
            .map_err(|e| OutputError::IoError(format!("Failed to create temp file: {}", e)))?;
        temp.write_all(bytes)
            .map_err(|e| OutputError::IoError(format!("Failed to write image: {}", e)))?;
        temp.persist(&target)
            .map_err(|e| OutputError::IoError(format!("Failed to persist image: {}", e)))?;

        self.media_written += 1;
        debug!(
            path = %target.display(),
            %variant,
            bytes = bytes.len(),
            "Image written"
        );
        Ok(())
    }

    fn flush(&mut self) -> OutputResult<()> {
        self.metadata.flush()
    }
}

impl std::fmt::Debug for FileSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSink")
            .field("results_dir", &self.layout.results_dir())
            .field("images_dir", &self.images_dir)
            .field("rows_written", &self.metadata.rows_written())
            .field("media_written", &self.media_written)
            .finish()
    }
}

/// Opens a [`FileSink`] per species under one results directory
#[derive(Debug, Clone)]
pub struct FileSinkProvider {
    results_dir: PathBuf,
}

impl FileSinkProvider {
    /// Provider rooted at `results_dir`
    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_dir: results_dir.into(),
        }
    }
}

impl SinkProvider for FileSinkProvider {
    fn open_sink(&mut self, collection_key: &str) -> OutputResult<Box<dyn RecordSink>> {
        Ok(Box::new(FileSink::create(&self.results_dir, collection_key)?))
    }
}
