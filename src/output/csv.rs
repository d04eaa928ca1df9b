//! Observation metadata CSV writer

use crate::Record;
use csv::{Writer, WriterBuilder};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::BufWriter;
use std::path::Path;
use tracing::{debug, info, warn};

use super::path::MISSING_VALUE;
use super::{OutputError, OutputResult};

const DEFAULT_BUFFER_SIZE: usize = 8192; // 8KB buffer

/// Column names, in file order
pub const METADATA_HEADERS: [&str; 8] = [
    "species_name",
    "observation_id",
    "observation_license",
    "observer_login",
    "observation_quality",
    "observation_date",
    "observation_latitude",
    "observation_longitude",
];

/// CSV row for one observation
#[derive(Debug, Serialize)]
struct MetadataRow {
    species_name: String,
    observation_id: u64,
    observation_license: String,
    observer_login: String,
    observation_quality: String,
    observation_date: String,
    observation_latitude: String,
    observation_longitude: String,
}

impl From<&Record> for MetadataRow {
    fn from(record: &Record) -> Self {
        let text = |value: &Option<String>| value.clone().unwrap_or_else(|| MISSING_VALUE.to_string());
        let coord = |value: Option<f64>| {
            value
                .map(|v| v.to_string())
                .unwrap_or_else(|| MISSING_VALUE.to_string())
        };

        Self {
            species_name: text(&record.taxon_name),
            observation_id: record.id,
            observation_license: text(&record.license_code),
            observer_login: text(&record.observer_login),
            observation_quality: text(&record.quality_grade),
            observation_date: text(&record.observed_on),
            observation_latitude: coord(record.latitude),
            observation_longitude: coord(record.longitude),
        }
    }
}

/// Append-only metadata CSV.
///
/// A new (or empty) file gets the header row; an existing file is appended
/// to with a warning, so repeated runs accumulate into one file.
pub struct MetadataCsvWriter {
    writer: Writer<BufWriter<File>>,
    rows_written: u64,
}

impl MetadataCsvWriter {
    /// Open `path` for appending, writing the header if the file is new
    pub fn open<P: AsRef<Path>>(path: P) -> OutputResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| OutputError::IoError(format!("Failed to create directory: {}", e)))?;
        }

        let existing_len = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| OutputError::IoError(format!("Failed to open file: {}", e)))?;

        let buf_writer = BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, file);
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .from_writer(buf_writer);

        if existing_len > 0 {
            warn!(
                path = %path.display(),
                "Metadata file already exists, data will be appended to the existing file"
            );
        } else {
            info!(path = %path.display(), "Creating metadata CSV");
            writer
                .write_record(METADATA_HEADERS)
                .map_err(|e| OutputError::CsvError(format!("Failed to write header: {}", e)))?;
            writer
                .flush()
                .map_err(|e| OutputError::FlushError(format!("Failed to flush: {}", e)))?;
        }

        Ok(Self {
            writer,
            rows_written: 0,
        })
    }

    /// Append one observation
    pub fn write(&mut self, record: &Record) -> OutputResult<()> {
        self.writer
            .serialize(MetadataRow::from(record))
            .map_err(|e| OutputError::CsvError(format!("Failed to write observation: {}", e)))?;

        self.rows_written += 1;
        debug!(observation_id = record.id, "Metadata row written");
        Ok(())
    }

    /// Flush buffered rows to disk
    pub fn flush(&mut self) -> OutputResult<()> {
        self.writer
            .flush()
            .map_err(|e| OutputError::FlushError(format!("Failed to flush: {}", e)))
    }

    /// Rows appended by this writer
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }
}
