//! Results directory layout
//!
//! One metadata CSV and one image directory per species, side by side:
//!
//! ```text
//! results/
//!   Danaus_plexippus_metadata.csv
//!   Danaus_plexippus_images/
//!     Danaus-plexippus_alice_cc-by_123456_0.jpeg
//! ```

use crate::Record;
use std::path::{Path, PathBuf};

/// Placeholder for missing values in file names and CSV cells
pub const MISSING_VALUE: &str = "none";

/// Paths under a results directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultsLayout {
    results_dir: PathBuf,
}

impl ResultsLayout {
    /// Layout rooted at `results_dir`
    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_dir: results_dir.into(),
        }
    }

    /// Root directory
    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    /// `<results>/<Species_name>_metadata.csv`
    pub fn metadata_csv(&self, collection_key: &str) -> PathBuf {
        self.results_dir
            .join(format!("{}_metadata.csv", collection_stem(collection_key)))
    }

    /// `<results>/<Species_name>_images`
    pub fn images_dir(&self, collection_key: &str) -> PathBuf {
        self.results_dir
            .join(format!("{}_images", collection_stem(collection_key)))
    }

    /// `<images>/<Genus-species>_<observer>_<license>_<id>_<index>.jpeg`
    ///
    /// The taxon name comes from the observation itself, falling back to the
    /// collection key when the service omitted it.
    pub fn image_file_name(collection_key: &str, record: &Record, index: usize) -> String {
        let taxon = record.taxon_name.as_deref().unwrap_or(collection_key);
        format!(
            "{}_{}_{}_{}_{}.jpeg",
            sanitize_component(&taxon.replace(' ', "-")),
            sanitize_component(record.observer_login.as_deref().unwrap_or(MISSING_VALUE)),
            sanitize_component(record.license_code.as_deref().unwrap_or(MISSING_VALUE)),
            record.id,
            index
        )
    }

    /// Full path of an image file
    pub fn image_path(&self, collection_key: &str, record: &Record, index: usize) -> PathBuf {
        self.images_dir(collection_key)
            .join(Self::image_file_name(collection_key, record, index))
    }
}

/// Species name with spaces replaced by underscores
pub fn collection_stem(collection_key: &str) -> String {
    sanitize_component(&collection_key.trim().replace(' ', "_"))
}

// Observer logins and licence codes are remote data; keep them inside one
// path component.
fn sanitize_component(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect()
}
