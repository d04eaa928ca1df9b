//! iNaturalist response parser
//!
//! Stateless conversion of `/v1/observations` JSON into [`Record`]s. Optional
//! observation fields that are absent, null or empty become `None`; only the
//! observation ID and the page's `total_results` are mandatory.

use crate::fetcher::{FetcherError, FetcherResult, PageResponse};
use crate::{MediaRef, Record, SizeVariant};
use serde_json::Value;

/// Stateless parser for iNaturalist API responses
pub struct InatParser;

impl InatParser {
    /// Parse an observation search response
    ///
    /// # Format
    /// `{"total_results": n, "page": 1, "per_page": k, "results": [observation, ...]}`
    ///
    /// # Errors
    /// Returns `FetcherError::InvalidResponse` if `total_results` or `results`
    /// is missing, and `FetcherError::ParseError` for an observation without a
    /// numeric ID.
    pub fn parse_observations_page(body: &Value) -> FetcherResult<PageResponse> {
        let total_results = body
            .get("total_results")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                FetcherError::InvalidResponse("missing or invalid total_results".to_string())
            })?;

        let results = body
            .get("results")
            .and_then(Value::as_array)
            .ok_or_else(|| FetcherError::InvalidResponse("missing results array".to_string()))?;

        let records = results
            .iter()
            .map(Self::parse_observation)
            .collect::<FetcherResult<Vec<_>>>()?;

        Ok(PageResponse {
            total_results,
            records,
        })
    }

    /// Parse a single observation object
    pub fn parse_observation(observation: &Value) -> FetcherResult<Record> {
        let id = observation
            .get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| FetcherError::ParseError("Invalid or missing observation id".to_string()))?;

        // geojson coordinates are [longitude, latitude]
        let coordinates = observation
            .pointer("/geojson/coordinates")
            .and_then(Value::as_array);
        let longitude = coordinates.and_then(|c| c.first()).and_then(Value::as_f64);
        let latitude = coordinates.and_then(|c| c.get(1)).and_then(Value::as_f64);

        let media_refs = observation
            .get("photos")
            .and_then(Value::as_array)
            .map(|photos| {
                photos
                    .iter()
                    .filter_map(|photo| non_empty_str(photo.get("url")))
                    .map(|url| MediaRef::new(url, SizeVariant::Square))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Record {
            id,
            taxon_name: non_empty_str(observation.pointer("/taxon/name")),
            license_code: non_empty_str(observation.get("license_code")),
            observer_login: non_empty_str(observation.pointer("/user/login")),
            quality_grade: non_empty_str(observation.get("quality_grade")),
            observed_on: non_empty_str(observation.get("observed_on")),
            latitude,
            longitude,
            media_refs,
        })
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
