//! Resilient HTTP transport
//!
//! Every request gets a bounded number of attempts. Only the transient
//! allow-list (429, 500, 502, 503, 504, connection failures and timeouts) is
//! retried, with exponential backoff between attempts. Anything else surfaces
//! on the first occurrence. Backoff sleeps end early on a stop request.

use bytes::Bytes;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::downloader::config::RetryPolicy;
use crate::fetcher::retry_formatter::{extract_error_type, RetryContext, RetryErrorType};
use crate::shutdown::{sleep_unless_shutdown, SharedShutdown};

const MAX_ERROR_BODY_CHARS: usize = 512;

/// Transport failures after the retry policy has been applied
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Transient failure that persisted through every attempt
    #[error("{reason} persisted after {attempts} attempts ({url}): {message}")]
    Exhausted {
        attempts: u32,
        reason: String,
        url: String,
        message: String,
    },

    /// Non-retryable HTTP status
    #[error("HTTP {status} from {url}: {body}")]
    Fatal {
        status: u16,
        url: String,
        body: String,
    },

    /// Request could not be built or sent for a non-transient reason
    #[error("invalid request to {url}: {message}")]
    Request { url: String, message: String },

    /// Body arrived but did not decode
    #[error("failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    /// Stop requested while waiting to retry
    #[error("request cancelled by shutdown")]
    Cancelled,
}

impl TransportError {
    /// Whether the failure was on the transient allow-list
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Exhausted { .. })
    }

    /// HTTP status of a fatal response, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Fatal { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Outcome of one attempt
enum Attempt<T> {
    Done(T),
    Retry {
        error_type: RetryErrorType,
        message: String,
    },
}

/// HTTP transport with bounded retries
#[derive(Clone)]
pub struct HttpTransport {
    client: Arc<Client>,
    policy: RetryPolicy,
    shutdown: Option<SharedShutdown>,
}

impl HttpTransport {
    /// Create a transport over a (usually shared) client
    pub fn new(client: Arc<Client>, policy: RetryPolicy) -> Self {
        Self {
            client,
            policy,
            shutdown: None,
        }
    }

    /// Interrupt backoff sleeps when shutdown is requested
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Retry policy in effect
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// GET a JSON document
    pub async fn get_json<T>(
        &self,
        url: &str,
        params: &[(&str, String)],
        subject: &str,
    ) -> Result<T, TransportError>
    where
        T: DeserializeOwned,
    {
        self.request_with_retry(url, params, subject, |resp: Response| resp.json::<T>())
            .await
    }

    /// GET a binary body (photos)
    pub async fn get_bytes(&self, url: &str, subject: &str) -> Result<Bytes, TransportError> {
        self.request_with_retry(url, &[], subject, |resp: Response| resp.bytes())
            .await
    }

    async fn request_with_retry<T, F, Fut>(
        &self,
        url: &str,
        params: &[(&str, String)],
        subject: &str,
        read_body: F,
    ) -> Result<T, TransportError>
    where
        F: Fn(Response) -> Fut,
        Fut: Future<Output = reqwest::Result<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            debug!(url, attempt, max_attempts, "Sending GET request");

            let (error_type, message) = match self.attempt(url, params, &read_body).await? {
                Attempt::Done(value) => {
                    if attempt > 1 {
                        let ctx = RetryContext::new(
                            attempt,
                            max_attempts,
                            RetryErrorType::NetworkGeneric,
                            subject,
                            "",
                            url,
                        );
                        info!("{}", ctx.format_success());
                    }
                    return Ok(value);
                }
                Attempt::Retry {
                    error_type,
                    message,
                } => (error_type, message),
            };

            let ctx = RetryContext::new(attempt, max_attempts, error_type, subject, &message, url);

            if attempt >= max_attempts {
                error!("{}", ctx.format_failure());
                return Err(TransportError::Exhausted {
                    attempts: attempt,
                    reason: error_type.description().to_string(),
                    url: url.to_string(),
                    message,
                });
            }

            let backoff = self.policy.backoff_for(attempt);
            let ctx = ctx.with_backoff(backoff);
            warn!(error = %message, "{}", ctx.format_retry());
            crate::metrics::record_retry(error_type.label(), backoff);

            if !sleep_unless_shutdown(self.shutdown.as_ref(), backoff).await {
                debug!(url, "Retry backoff interrupted by shutdown");
                return Err(TransportError::Cancelled);
            }
            attempt += 1;
        }
    }

    async fn attempt<T, F, Fut>(
        &self,
        url: &str,
        params: &[(&str, String)],
        read_body: &F,
    ) -> Result<Attempt<T>, TransportError>
    where
        F: Fn(Response) -> Fut,
        Fut: Future<Output = reqwest::Result<T>>,
    {
        let response = match self.client.get(url).query(params).send().await {
            Ok(resp) => resp,
            Err(e) if e.is_builder() => {
                return Err(TransportError::Request {
                    url: url.to_string(),
                    message: e.to_string(),
                });
            }
            Err(e) => {
                return Ok(Attempt::Retry {
                    error_type: extract_error_type(None, Some(&e)),
                    message: e.to_string(),
                });
            }
        };

        let status = response.status();
        if !status.is_success() {
            let error_type = extract_error_type(Some(status), None);
            if error_type.is_retryable() {
                return Ok(Attempt::Retry {
                    error_type,
                    message: format!("HTTP {status}"),
                });
            }

            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TransportError::Fatal {
                status: status.as_u16(),
                url: url.to_string(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        match read_body(response).await {
            Ok(value) => Ok(Attempt::Done(value)),
            Err(e) if e.is_decode() => Err(TransportError::Decode {
                url: url.to_string(),
                message: e.to_string(),
            }),
            // Body interrupted mid-transfer
            Err(e) => Ok(Attempt::Retry {
                error_type: extract_error_type(None, Some(&e)),
                message: e.to_string(),
            }),
        }
    }
}
