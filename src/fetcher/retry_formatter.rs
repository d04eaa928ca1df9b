//! Failure classification and log wording for the HTTP transport.
//!
//! [`extract_error_type`] decides whether a failed request belongs to the
//! transient allow-list; [`RetryContext`] renders the per-attempt lines and
//! the summary printed once attempts run out.

use reqwest::{Error as ReqwestError, StatusCode};
use std::time::Duration;

/// Why a request failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryErrorType {
    /// Request or connect timeout
    NetworkTimeout,
    /// Could not connect (refused, DNS)
    NetworkOffline,
    /// HTTP 429
    RateLimit,
    /// HTTP 5xx
    ServerError(u16),
    /// HTTP 400
    InvalidRequest,
    /// HTTP 401 or 403
    AuthFailed(u16),
    /// Any other 4xx
    ClientError(u16),
    /// Transport failure without a better match
    NetworkGeneric,
}

impl RetryErrorType {
    /// Reason text used in log lines and `TransportError::Exhausted`
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "network timeout",
            Self::NetworkOffline => "connection failed",
            Self::RateLimit => "rate limit exceeded",
            Self::ServerError(500) => "internal server error",
            Self::ServerError(502) => "bad gateway",
            Self::ServerError(503) => "service unavailable",
            Self::ServerError(504) => "gateway timeout",
            Self::ServerError(_) => "server error",
            Self::InvalidRequest => "invalid request",
            Self::AuthFailed(_) => "authentication failed",
            Self::ClientError(404) => "resource not found",
            Self::ClientError(410) => "resource gone",
            Self::ClientError(_) => "client error",
            Self::NetworkGeneric => "network error",
        }
    }

    /// Short label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "timeout",
            Self::NetworkOffline => "offline",
            Self::RateLimit => "rate_limit",
            Self::ServerError(_) => "server_error",
            Self::InvalidRequest => "invalid_request",
            Self::AuthFailed(_) => "auth_failed",
            Self::ClientError(_) => "client_error",
            Self::NetworkGeneric => "network",
        }
    }

    /// What the operator can do about it
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NetworkTimeout | Self::NetworkOffline | Self::NetworkGeneric => {
                "Check that api.inaturalist.org is reachable from this machine"
            }
            Self::RateLimit => "Lower --queries-per-day or wait before restarting",
            Self::ServerError(_) => "iNaturalist may be experiencing issues, try again later",
            Self::InvalidRequest => "Check species names, quality grade and licence arguments",
            Self::AuthFailed(_) => "The resource is not publicly readable",
            Self::ClientError(_) => "The observation or photo may have been removed",
        }
    }

    /// 429, 500, 502, 503, 504 and connection-level failures
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkTimeout | Self::NetworkOffline | Self::NetworkGeneric | Self::RateLimit => {
                true
            }
            Self::ServerError(code) => matches!(code, 500 | 502 | 503 | 504),
            Self::InvalidRequest | Self::AuthFailed(_) | Self::ClientError(_) => false,
        }
    }
}

/// One failed attempt, as seen by the retry loop
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Attempt that just failed (1-based)
    pub attempt: u32,
    /// Attempt budget
    pub max_attempts: u32,
    /// Classified failure
    pub error_type: RetryErrorType,
    /// Pause before the next attempt
    pub backoff_duration: Duration,
    /// What was being fetched (e.g. "Danaus plexippus page query")
    pub subject: String,
    /// Raw error text
    pub error_message: String,
    /// Request URL
    pub endpoint: String,
}

impl RetryContext {
    /// Context without backoff
    pub fn new(
        attempt: u32,
        max_attempts: u32,
        error_type: RetryErrorType,
        subject: impl Into<String>,
        error_message: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            attempt,
            max_attempts,
            error_type,
            backoff_duration: Duration::ZERO,
            subject: subject.into(),
            error_message: error_message.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Attach the backoff that precedes the next attempt
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff_duration = backoff;
        self
    }

    fn subject_or_unknown(&self) -> &str {
        if self.subject.is_empty() {
            "request"
        } else {
            &self.subject
        }
    }

    /// `<subject>: <reason>, attempt n/m in 2.0s`
    pub fn format_retry(&self) -> String {
        format!(
            "{}: {}, attempt {}/{} in {:.1}s",
            self.subject_or_unknown(),
            self.error_type.description(),
            self.attempt + 1,
            self.max_attempts,
            self.backoff_duration.as_secs_f64()
        )
    }

    /// Logged when a retried request finally succeeds
    pub fn format_success(&self) -> String {
        format!(
            "{}: succeeded on attempt {}/{}",
            self.subject_or_unknown(),
            self.attempt,
            self.max_attempts
        )
    }

    /// Multi-line summary logged when the request is abandoned
    pub fn format_failure(&self) -> String {
        let mut out = format!(
            "{} abandoned after {} attempt(s): {}\n  url: {}\n  hints:",
            self.subject_or_unknown(),
            self.attempt,
            self.error_message,
            self.endpoint
        );
        for hint in self.format_suggestions() {
            out.push_str("\n    - ");
            out.push_str(&hint);
        }
        out
    }

    /// Hints for the failure summary
    pub fn format_suggestions(&self) -> Vec<String> {
        let mut hints = vec![self.error_type.suggestion().to_string()];
        if self.error_type.is_retryable() {
            hints.push(format!(
                "Raise --max-retries (currently {})",
                self.max_attempts
            ));
        }
        hints
    }
}

/// Classify a failure from its status, or from the reqwest error when no
/// response arrived
pub fn extract_error_type(
    status: Option<StatusCode>,
    err: Option<&ReqwestError>,
) -> RetryErrorType {
    match (status.map(|s| s.as_u16()), err) {
        (Some(400), _) => RetryErrorType::InvalidRequest,
        (Some(code @ (401 | 403)), _) => RetryErrorType::AuthFailed(code),
        (Some(429), _) => RetryErrorType::RateLimit,
        (Some(code @ 500..=599), _) => RetryErrorType::ServerError(code),
        (Some(code @ 400..=499), _) => RetryErrorType::ClientError(code),
        (_, Some(e)) if e.is_timeout() => RetryErrorType::NetworkTimeout,
        (_, Some(e)) if e.is_connect() => RetryErrorType::NetworkOffline,
        _ => RetryErrorType::NetworkGeneric,
    }
}
