//! Compose file fetching.
//!
//! Conditional HTTP GET with ETag support, a response size cap, and bounded
//! retry with exponential backoff. The URL is checked against the metadata
//! endpoint guard at construction time.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;

use crate::config::{validate_compose_url, ConfigError};

const DEFAULT_MAX_BYTES: u64 = 5 << 20;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Retrieves the declared compose file.
#[async_trait]
pub trait ComposeFetch: Send + Sync {
    /// Fetches the compose body, passing `previous_etag` as a conditional
    /// request when non-empty.
    async fn fetch(
        &self,
        cancel: &CancellationToken,
        previous_etag: &str,
    ) -> Result<FetchResult, FetchError>;
}

/// Fetched compose bytes and response metadata.
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    /// Response body; empty when `not_modified`.
    pub body: Vec<u8>,
    /// `ETag` response header, when present.
    pub etag: String,
    /// `Last-Modified` response header, when present.
    pub last_modified: String,
    /// True when the server answered 304 Not Modified.
    pub not_modified: bool,
}

/// Fetch failures, split into retryable and terminal kinds so callers can
/// classify without string matching.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Network-level failure; retryable.
    #[error("fetch compose: {0}")]
    Transport(#[from] reqwest::Error),

    /// Server-side (5xx) failure; retryable.
    #[error("server error: {status}")]
    ServerError {
        /// The 5xx status returned.
        status: StatusCode,
    },

    /// Any other non-2xx, non-304 status; terminal.
    #[error("unexpected status: {status}")]
    UnexpectedStatus {
        /// The offending status.
        status: StatusCode,
    },

    /// The response body was empty; terminal.
    #[error("compose body is empty")]
    EmptyBody,

    /// The response body exceeded the size cap; terminal.
    #[error("compose body exceeds {limit} bytes")]
    TooLarge {
        /// Configured cap in bytes.
        limit: u64,
    },

    /// All retry attempts failed.
    #[error("fetch failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Total attempts made.
        attempts: u32,
        /// The last retryable failure.
        #[source]
        source: Box<FetchError>,
    },

    /// The fetch was cancelled by shutdown.
    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether the failure is transient and worth retrying.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::ServerError { .. })
    }

    /// The HTTP status attached to the failure, when there is one.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::ServerError { status } | Self::UnexpectedStatus { status } => Some(*status),
            Self::Transport(err) => err.status(),
            Self::RetriesExhausted { source, .. } => source.status(),
            _ => None,
        }
    }
}

/// HTTP compose fetcher with conditional requests and bounded retry.
pub struct HttpFetcher {
    url: String,
    client: reqwest::Client,
    max_bytes: u64,
    max_retries: u32,
    retry_delay: Duration,
}

impl HttpFetcher {
    /// Builds a fetcher for `url` with the given request timeout.
    ///
    /// `max_bytes` of 0 selects the 5 MiB default.
    ///
    /// # Errors
    ///
    /// Rejects empty or blocked URLs and a zero timeout.
    pub fn new(url: &str, timeout: Duration, max_bytes: u64) -> Result<Self, ConfigError> {
        if url.trim().is_empty() {
            return Err(ConfigError::InvalidUrl {
                name: "compose url".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if timeout.is_zero() {
            return Err(ConfigError::NonPositiveDuration("compose timeout"));
        }
        validate_compose_url(url, "compose url")?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ConfigError::InvalidUrl {
                name: "compose url".to_string(),
                reason: err.to_string(),
            })?;

        Ok(Self {
            url: url.to_string(),
            client,
            max_bytes: if max_bytes == 0 {
                DEFAULT_MAX_BYTES
            } else {
                max_bytes
            },
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    /// Overrides the maximum retry count. 0 disables retries.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Overrides the initial retry delay (doubling per attempt).
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let mut delay = self.retry_delay;
        for _ in 1..attempt {
            delay = delay.saturating_mul(2);
            if delay > MAX_RETRY_DELAY {
                return MAX_RETRY_DELAY;
            }
        }
        delay.min(MAX_RETRY_DELAY)
    }

    async fn fetch_once(&self, previous_etag: &str) -> Result<FetchResult, FetchError> {
        let mut request = self.client.get(&self.url);
        if !previous_etag.is_empty() {
            request = request.header(reqwest::header::IF_NONE_MATCH, previous_etag);
        }

        let response = request.send().await?;
        let status = response.status();
        let etag = header_string(&response, reqwest::header::ETAG);
        let last_modified = header_string(&response, reqwest::header::LAST_MODIFIED);

        if status == StatusCode::NOT_MODIFIED {
            return Ok(FetchResult {
                body: Vec::new(),
                etag,
                last_modified,
                not_modified: true,
            });
        }
        if status.is_server_error() {
            return Err(FetchError::ServerError { status });
        }
        if !status.is_success() {
            return Err(FetchError::UnexpectedStatus { status });
        }

        let body = self.read_limited(response).await?;
        if body.is_empty() {
            return Err(FetchError::EmptyBody);
        }

        Ok(FetchResult {
            body,
            etag,
            last_modified,
            not_modified: false,
        })
    }

    async fn read_limited(&self, mut response: reqwest::Response) -> Result<Vec<u8>, FetchError> {
        if let Some(length) = response.content_length() {
            if length > self.max_bytes {
                return Err(FetchError::TooLarge {
                    limit: self.max_bytes,
                });
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            body.extend_from_slice(&chunk);
            if body.len() as u64 > self.max_bytes {
                return Err(FetchError::TooLarge {
                    limit: self.max_bytes,
                });
            }
        }
        Ok(body)
    }
}

fn header_string(response: &reqwest::Response, name: reqwest::header::HeaderName) -> String {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl ComposeFetch for HttpFetcher {
    async fn fetch(
        &self,
        cancel: &CancellationToken,
        previous_etag: &str,
    ) -> Result<FetchResult, FetchError> {
        let mut last_err: Option<FetchError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff(attempt);
                tokio::select! {
                    () = cancel.cancelled() => return Err(FetchError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
            }
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            match self.fetch_once(previous_etag).await {
                Ok(result) => return Ok(result),
                Err(err) if err.is_retryable() => last_err = Some(err),
                Err(err) => return Err(err),
            }
        }

        Err(FetchError::RetriesExhausted {
            attempts: self.max_retries + 1,
            source: Box::new(last_err.unwrap_or(FetchError::EmptyBody)),
        })
    }
}
