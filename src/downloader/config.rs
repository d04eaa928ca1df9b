//! Download configuration constants and engine settings

use crate::downloader::quota::{QuotaKind, WindowSpec};
use crate::{QualityGrade, SizeVariant};
use std::time::Duration;

/// Maximum number of attempts per HTTP request (initial attempt included).
pub const MAX_ATTEMPTS: u32 = 5;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1000;

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Largest `per_page` the observations endpoint accepts.
pub const SERVER_MAX_PAGE_SIZE: u32 = 200;

/// Default number of observations fetched per species.
pub const DEFAULT_TARGET_COUNT: u64 = 200;

/// Pause between two page queries, independent of quota state.
pub const INTER_PAGE_DELAY_MS: u64 = 1200;

/// Daily query budget. The service allows 10 000; the rest is safety margin.
pub const MAX_QUERIES_PER_DAY: u64 = 9_500;

/// Hourly media budget in bytes (service limit: 5 GB).
pub const MAX_MEDIA_BYTES_PER_HOUR: u64 = 4_000_000_000;

/// Daily media budget in bytes (service limit: 24 GB).
pub const MAX_MEDIA_BYTES_PER_DAY: u64 = 22_000_000_000;

const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Calculate exponential backoff delay: `base * 2^retry_count`, capped at `max`.
pub fn calculate_backoff(base: Duration, max: Duration, retry_count: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(retry_count)).min(max)
}

/// Bounded retry configuration for the HTTP transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request, initial attempt included
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for each further retry
    pub backoff_base: Duration,
    /// Upper bound for a single backoff delay
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Create a policy with the default backoff schedule
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Override the base delay
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn backoff_for(&self, failed_attempt: u32) -> Duration {
        calculate_backoff(
            self.backoff_base,
            self.max_backoff,
            failed_attempt.saturating_sub(1),
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            backoff_base: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(MAX_BACKOFF_MS),
        }
    }
}

/// Capacities of the three service quota windows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaConfig {
    /// Page queries allowed per day
    pub requests_per_day: u64,
    /// Media bytes allowed per hour
    pub media_bytes_per_hour: u64,
    /// Media bytes allowed per day
    pub media_bytes_per_day: u64,
}

impl QuotaConfig {
    /// Window definitions handed to [`crate::downloader::QuotaTracker::new`].
    pub fn window_specs(&self) -> Vec<WindowSpec> {
        vec![
            WindowSpec::new(QuotaKind::QueriesPerDay, self.requests_per_day, DAY),
            WindowSpec::new(QuotaKind::MediaBytesPerHour, self.media_bytes_per_hour, HOUR),
            WindowSpec::new(QuotaKind::MediaBytesPerDay, self.media_bytes_per_day, DAY),
        ]
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            requests_per_day: MAX_QUERIES_PER_DAY,
            media_bytes_per_hour: MAX_MEDIA_BYTES_PER_HOUR,
            media_bytes_per_day: MAX_MEDIA_BYTES_PER_DAY,
        }
    }
}

/// Everything the fetch engine needs to walk a collection
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Observations to fetch per species
    pub target_count: u64,
    /// Page size upper bound (never above [`SERVER_MAX_PAGE_SIZE`])
    pub page_size_max: u32,
    /// Quality grade filter
    pub quality: QualityGrade,
    /// Photo size to download
    pub size_variant: SizeVariant,
    /// Licence filter applied to observations and photos ("any" disables it)
    pub license: String,
    /// Quota window capacities
    pub quota: QuotaConfig,
    /// Transport retry policy
    pub retry: RetryPolicy,
    /// Fixed pause after every page query
    pub inter_page_delay: Duration,
}

impl EngineConfig {
    /// Set the per-species target
    pub fn with_target_count(mut self, target_count: u64) -> Self {
        self.target_count = target_count;
        self
    }

    /// Set the page size upper bound
    pub fn with_page_size_max(mut self, page_size_max: u32) -> Self {
        self.page_size_max = page_size_max;
        self
    }

    /// Set the quality filter
    pub fn with_quality(mut self, quality: QualityGrade) -> Self {
        self.quality = quality;
        self
    }

    /// Set the downloaded photo size
    pub fn with_size_variant(mut self, size_variant: SizeVariant) -> Self {
        self.size_variant = size_variant;
        self
    }

    /// Set the licence filter
    pub fn with_license(mut self, license: impl Into<String>) -> Self {
        self.license = license.into();
        self
    }

    /// Set quota capacities
    pub fn with_quota(mut self, quota: QuotaConfig) -> Self {
        self.quota = quota;
        self
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the inter-page delay
    pub fn with_inter_page_delay(mut self, delay: Duration) -> Self {
        self.inter_page_delay = delay;
        self
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), String> {
        if self.page_size_max == 0 || self.page_size_max > SERVER_MAX_PAGE_SIZE {
            return Err(format!(
                "page size must be between 1 and {SERVER_MAX_PAGE_SIZE}, got {}",
                self.page_size_max
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err("max attempts must be at least 1".to_string());
        }
        if self.quota.requests_per_day == 0 {
            return Err("daily query quota must be positive".to_string());
        }
        if self.license.trim().is_empty() {
            return Err("license filter cannot be empty (use \"any\")".to_string());
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target_count: DEFAULT_TARGET_COUNT,
            page_size_max: SERVER_MAX_PAGE_SIZE,
            quality: QualityGrade::Research,
            size_variant: SizeVariant::Medium,
            license: "any".to_string(),
            quota: QuotaConfig::default(),
            retry: RetryPolicy::default(),
            inter_page_delay: Duration::from_millis(INTER_PAGE_DELAY_MS),
        }
    }
}
