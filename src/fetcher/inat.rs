//! iNaturalist observation fetcher

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tracing::debug;

use super::http::HttpTransport;
use super::inat_config::InatApiConfig;
use super::inat_parser::InatParser;
use super::shared_resources::global_http_client;
use super::{FetcherResult, PageRequest, PageResponse, RemoteCollection};
use crate::downloader::config::RetryPolicy;
use crate::shutdown::SharedShutdown;
use crate::MediaRef;

/// Client for the public iNaturalist observation search and photo CDN
pub struct InatClient {
    transport: HttpTransport,
    config: InatApiConfig,
}

impl InatClient {
    /// Create a client against the public API using the shared HTTP client
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            transport: HttpTransport::new(global_http_client(), policy),
            config: InatApiConfig::default(),
        }
    }

    /// Point the client at another host (for testing)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config = InatApiConfig::with_base_url(base_url);
        self
    }

    /// Let a stop request interrupt retry backoff
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.transport = self.transport.with_shutdown(shutdown);
        self
    }

    /// Endpoint configuration in use
    pub fn config(&self) -> &InatApiConfig {
        &self.config
    }

    /// Query string for a page request.
    ///
    /// Always the first page of an ID-ascending search above the cursor; the
    /// cursor, not the page number, moves the window.
    pub fn build_params(request: &PageRequest) -> Vec<(&'static str, String)> {
        vec![
            ("taxon_name", request.collection_key.clone()),
            ("quality_grade", request.filters.quality.as_str().to_string()),
            ("has[]", "photos".to_string()),
            ("license", request.filters.license.clone()),
            ("photo_license", request.filters.license.clone()),
            ("page", "1".to_string()),
            ("per_page", request.page_size.to_string()),
            ("order_by", "id".to_string()),
            ("order", "asc".to_string()),
            ("id_above", request.cursor.value().to_string()),
        ]
    }
}

#[async_trait]
impl RemoteCollection for InatClient {
    async fn query_page(&self, request: &PageRequest) -> FetcherResult<PageResponse> {
        let url = self.config.observations_url();
        let params = Self::build_params(request);
        let subject = format!("{} page query", request.collection_key);

        debug!(
            collection = %request.collection_key,
            cursor = %request.cursor,
            per_page = request.page_size,
            "Querying observations"
        );

        let body: Value = self.transport.get_json(&url, &params, &subject).await?;
        let page = InatParser::parse_observations_page(&body)?;

        debug!(
            collection = %request.collection_key,
            total_results = page.total_results,
            received = page.records.len(),
            "Observation page received"
        );
        Ok(page)
    }

    async fn fetch_media(&self, media: &MediaRef) -> FetcherResult<Bytes> {
        let bytes = self
            .transport
            .get_bytes(&media.source_url, "photo download")
            .await?;
        Ok(bytes)
    }
}
