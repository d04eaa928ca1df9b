//! # iNaturalist Downloader Library
//!
//! A quota-aware library for downloading observation metadata and photos from
//! the iNaturalist API. Designed for building image datasets per species
//! without tripping the service's request and media download limits.
//!
//! ## Features
//!
//! - **Quota Tracking**: Several independently resetting quota windows
//!   (queries per day, media bytes per hour, media bytes per day)
//! - **Cursor Pagination**: `id_above` watermarks so no observation is skipped
//!   or fetched twice, even across interrupted runs
//! - **Resilient Transport**: Bounded retry with exponential backoff on
//!   transient HTTP failures
//! - **Resume Capability**: Per-species cursors persisted atomically
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use inat_downloader::collections::CollectionSpec;
//! use inat_downloader::downloader::{EngineConfig, FetchEngine, QuotaTracker};
//! use inat_downloader::fetcher::inat::InatClient;
//! use inat_downloader::output::FileSink;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::default().with_target_count(50);
//! let quota = Arc::new(QuotaTracker::new(config.quota.window_specs()));
//! let client = Arc::new(InatClient::new(config.retry.clone()));
//! let engine = FetchEngine::new(client, quota, config);
//!
//! let species = CollectionSpec::new("Danaus plexippus", 0);
//! let mut sink = FileSink::create("./results", &species.name)?;
//! let report = engine.run_collection(species.into_job(), &mut sink, None).await?;
//! println!("{} observations", report.progress.records);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`downloader`] - Quota tracker, engine configuration and the fetch engine
//! - [`fetcher`] - Resilient HTTP transport, iNaturalist client and cursor walker
//! - [`output`] - Metadata CSV and media file sinks
//! - [`resume`] - Cursor persistence between runs
//! - [`collections`] - Species list loading
//! - [`shutdown`] - Cooperative cancellation

#![warn(missing_docs)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// CLI command implementations
pub mod cli;

/// Species list loading
pub mod collections;

/// Quota tracking and fetch orchestration
pub mod downloader;

/// Remote access: transport, API client, pagination
pub mod fetcher;

/// Metrics collection
pub mod metrics;

/// Metadata and media sinks
pub mod output;

/// Resume capability for collection cursors
pub mod resume;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

/// Watermark for cursor pagination: the ID of the last fully processed record.
///
/// Remote queries always ask for records strictly above the cursor, so a
/// persisted cursor can be replayed without re-fetching anything at or below it.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Cursor(pub u64);

impl Cursor {
    /// Cursor placed before every record.
    pub const START: Cursor = Cursor(0);

    /// Raw identifier value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Cursor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(Cursor::START);
        }
        trimmed
            .parse::<u64>()
            .map(Cursor)
            .map_err(|e| format!("Invalid cursor '{s}': {e}"))
    }
}

/// Photo size variant served by the iNaturalist media host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeVariant {
    /// 75px thumbnail, the variant embedded in API responses
    Square,
    /// 240px
    Small,
    /// 500px
    Medium,
    /// 1024px
    Large,
    /// Uploaded resolution
    Original,
}

impl SizeVariant {
    /// Path segment used in media URLs
    pub fn as_str(&self) -> &'static str {
        match self {
            SizeVariant::Square => "square",
            SizeVariant::Small => "small",
            SizeVariant::Medium => "medium",
            SizeVariant::Large => "large",
            SizeVariant::Original => "original",
        }
    }
}

impl std::fmt::Display for SizeVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SizeVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "square" => Ok(SizeVariant::Square),
            "small" => Ok(SizeVariant::Small),
            "medium" => Ok(SizeVariant::Medium),
            "large" => Ok(SizeVariant::Large),
            "original" => Ok(SizeVariant::Original),
            _ => Err(format!(
                "Invalid image size: {s}. Valid options: small, medium, large, original"
            )),
        }
    }
}

/// Observation quality grade filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityGrade {
    /// Community-verified observations only
    Research,
    /// No quality constraint
    Any,
}

impl QualityGrade {
    /// Query parameter value
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityGrade::Research => "research",
            QualityGrade::Any => "any",
        }
    }
}

impl std::fmt::Display for QualityGrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for QualityGrade {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "research" => Ok(QualityGrade::Research),
            "any" => Ok(QualityGrade::Any),
            _ => Err(format!(
                "Invalid quality grade: {s}. Valid options: research, any"
            )),
        }
    }
}

/// Reference to a single photo attached to an observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    /// URL as returned by the API
    pub source_url: String,
    /// Variant the URL currently points at
    pub size_variant: SizeVariant,
}

impl MediaRef {
    /// Create a media reference
    pub fn new(source_url: impl Into<String>, size_variant: SizeVariant) -> Self {
        Self {
            source_url: source_url.into(),
            size_variant,
        }
    }

    /// Point the reference at another size variant.
    ///
    /// The last `/<variant>` path segment of the URL is substituted; URLs
    /// without that segment are returned unchanged.
    pub fn with_variant(&self, target: SizeVariant) -> MediaRef {
        let needle = format!("/{}", self.size_variant.as_str());
        let source_url = match self.source_url.rfind(&needle) {
            Some(pos) => format!(
                "{}/{}{}",
                &self.source_url[..pos],
                target.as_str(),
                &self.source_url[pos + needle.len()..]
            ),
            None => self.source_url.clone(),
        };
        MediaRef {
            source_url,
            size_variant: target,
        }
    }
}

/// A single observation returned by a page query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Observation ID (cursor source)
    pub id: u64,
    /// Scientific name of the identified taxon
    pub taxon_name: Option<String>,
    /// Observation licence code (e.g. "cc-by")
    pub license_code: Option<String>,
    /// Observer login name
    pub observer_login: Option<String>,
    /// Quality grade reported by the service
    pub quality_grade: Option<String>,
    /// Observation date (YYYY-MM-DD)
    pub observed_on: Option<String>,
    /// Latitude in decimal degrees
    pub latitude: Option<f64>,
    /// Longitude in decimal degrees
    pub longitude: Option<f64>,
    /// Attached photos in display order
    pub media_refs: Vec<MediaRef>,
}

impl Record {
    /// Cursor pointing at this record
    pub fn cursor(&self) -> Cursor {
        Cursor(self.id)
    }

    /// Validate record integrity
    pub fn validate(&self) -> Result<(), String> {
        if self.id == 0 {
            return Err("Observation ID must be positive".to_string());
        }

        if let Some(lat) = self.latitude {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(format!("Latitude out of range: {lat}"));
            }
        }

        if let Some(lon) = self.longitude {
            if !(-180.0..=180.0).contains(&lon) {
                return Err(format!("Longitude out of range: {lon}"));
            }
        }

        Ok(())
    }
}
