//! iNaturalist API endpoints
//!
//! Kept separate from the client so tests can point it at a mock server.

/// Public API host
pub const INAT_API_BASE_URL: &str = "https://api.inaturalist.org";

/// Observation search endpoint
pub const OBSERVATIONS_ENDPOINT: &str = "/v1/observations";

/// Endpoint configuration for an [`crate::fetcher::inat::InatClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InatApiConfig {
    /// Base URL without trailing slash
    pub base_url: String,
    /// Observation search path
    pub observations_endpoint: &'static str,
}

impl InatApiConfig {
    /// Configuration for a different host (mock servers, mirrors)
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    /// Full observation search URL
    pub fn observations_url(&self) -> String {
        format!("{}{}", self.base_url, self.observations_endpoint)
    }
}

impl Default for InatApiConfig {
    fn default() -> Self {
        Self {
            base_url: INAT_API_BASE_URL.to_string(),
            observations_endpoint: OBSERVATIONS_ENDPOINT,
        }
    }
}
