//! Species list loading
//!
//! The collection list is a CSV file with a `name` and a `start_id` column,
//! one species per row. Duplicate names keep their first row.

use crate::downloader::CollectionJob;
use crate::Cursor;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

/// Default species list file name
pub const DEFAULT_SPECIES_FILE: &str = "species.csv";

/// Species list errors
#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    /// The species file does not exist
    #[error("species file not found: {0}")]
    NotFound(String),

    /// The file exists but could not be read
    #[error("failed to read species file: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed CSV or missing columns
    #[error("invalid species file at line {line}: {message}")]
    Parse {
        /// 1-based line in the file
        line: u64,
        /// Parser message
        message: String,
    },

    /// No usable rows
    #[error("species file {0} lists no species")]
    Empty(String),
}

/// One species to download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSpec {
    /// Taxon name as sent to the API
    pub name: String,
    /// Observations with an ID at or below this one are skipped
    pub start_id: Cursor,
}

impl CollectionSpec {
    /// Species starting above `start_id`
    pub fn new(name: impl Into<String>, start_id: u64) -> Self {
        Self {
            name: name.into(),
            start_id: Cursor(start_id),
        }
    }

    /// Engine job for this species
    pub fn into_job(self) -> CollectionJob {
        CollectionJob::new(self.name, self.start_id)
    }
}

#[derive(Debug, Deserialize)]
struct SpeciesRow {
    name: String,
    #[serde(default)]
    start_id: Option<String>,
}

/// Load the species list at `path`
pub fn load_collections(path: impl AsRef<Path>) -> Result<Vec<CollectionSpec>, CollectionError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(CollectionError::NotFound(path.display().to_string()));
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| parse_error(&e))?;

    let mut seen = HashSet::new();
    let mut species = Vec::new();

    let headers = reader.headers().map_err(|e| parse_error(&e))?.clone();

    for record in reader.records() {
        let record = record.map_err(|e| parse_error(&e))?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let row: SpeciesRow = record
            .deserialize(Some(&headers))
            .map_err(|e| parse_error(&e))?;
        if row.name.is_empty() {
            continue;
        }

        let start_id = Cursor::from_str(row.start_id.as_deref().unwrap_or(""))
            .map_err(|message| CollectionError::Parse { line, message })?;

        if !seen.insert(row.name.clone()) {
            warn!(species = %row.name, "Duplicate species in list, keeping the first entry");
            continue;
        }

        species.push(CollectionSpec {
            name: row.name,
            start_id,
        });
    }

    if species.is_empty() {
        return Err(CollectionError::Empty(path.display().to_string()));
    }

    debug!(count = species.len(), path = %path.display(), "Loaded species list");
    Ok(species)
}

fn parse_error(err: &csv::Error) -> CollectionError {
    if let csv::ErrorKind::Io(io) = err.kind() {
        return CollectionError::Io(std::io::Error::new(io.kind(), io.to_string()));
    }
    CollectionError::Parse {
        line: err.position().map(|p| p.line()).unwrap_or(0),
        message: err.to_string(),
    }
}
