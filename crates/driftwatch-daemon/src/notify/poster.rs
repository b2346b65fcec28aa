//! Shared HTTP delivery for notification sinks.
//!
//! One poster per sink, providing a per-stack token-bucket rate limit,
//! bounded exponential retry, and `Retry-After` handling.

use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use chrono::Utc;
use governor::{DefaultKeyedRateLimiter, Quota};
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;

use super::NotifyError;

const HTTP_ERROR_BODY_LIMIT: usize = 1024;

/// Delivery timing knobs; overridable in tests.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TimingConfig {
    /// Per-request timeout.
    pub timeout: Duration,
    /// One token per this interval, per stack.
    pub rate_interval: Duration,
    /// Token bucket burst size.
    pub rate_burst: u32,
    /// Initial retry backoff.
    pub backoff_initial: Duration,
    /// Retry backoff cap.
    pub backoff_max: Duration,
    /// Total time budget for retries of one payload.
    pub backoff_max_elapsed: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            rate_interval: Duration::from_secs(1),
            rate_burst: 1,
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(10),
            backoff_max_elapsed: Duration::from_secs(30),
        }
    }
}

/// Posts JSON payloads to a webhook URL with retry and rate limiting.
#[derive(Debug)]
pub(crate) struct HttpPoster {
    service: &'static str,
    url: String,
    content_type: &'static str,
    client: reqwest::Client,
    timing: TimingConfig,
    limiters: DefaultKeyedRateLimiter<String>,
}

impl HttpPoster {
    pub(crate) fn new(
        service: &'static str,
        url: String,
        content_type: &'static str,
        timing: TimingConfig,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timing.timeout)
            .build()
            .unwrap_or_default();

        let period = if timing.rate_interval.is_zero() {
            Duration::from_millis(1)
        } else {
            timing.rate_interval
        };
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(timing.rate_burst.max(1)).unwrap_or(NonZeroU32::MIN));

        Self {
            service,
            url,
            content_type,
            client,
            timing,
            limiters: DefaultKeyedRateLimiter::keyed(quota),
        }
    }

    /// Blocks until the stack's token bucket releases a token.
    pub(crate) async fn wait_for_rate_limit(
        &self,
        cancel: &CancellationToken,
        stack: &str,
    ) -> Result<(), NotifyError> {
        let key = stack.to_string();
        tokio::select! {
            () = cancel.cancelled() => Err(NotifyError::Cancelled),
            () = self.limiters.until_key_ready(&key) => Ok(()),
        }
    }

    /// Posts a payload, retrying transient failures with exponential
    /// backoff and honoring `Retry-After` on 429 responses.
    pub(crate) async fn post_with_retry(
        &self,
        cancel: &CancellationToken,
        payload: &[u8],
    ) -> Result<(), NotifyError> {
        let started = Instant::now();
        let mut delay = self.timing.backoff_initial;

        loop {
            let err = match self.post_once(payload).await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };

            let wait = match &err {
                NotifyError::RetryAfter { wait, .. } => *wait,
                _ if err.is_retryable() => {
                    let wait = delay;
                    delay = (delay * 2).min(self.timing.backoff_max);
                    wait
                }
                _ => return Err(err),
            };

            if started.elapsed() + wait > self.timing.backoff_max_elapsed {
                return Err(err);
            }
            tokio::select! {
                () = cancel.cancelled() => return Err(NotifyError::Cancelled),
                () = tokio::time::sleep(wait) => {}
            }
        }
    }

    pub(crate) async fn post_once(&self, payload: &[u8]) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, self.content_type)
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|source| NotifyError::Request {
                service: self.service,
                source,
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_retry_after);
            return match retry_after {
                Some(wait) => Err(NotifyError::RetryAfter {
                    service: self.service,
                    status,
                    wait,
                }),
                None => Err(NotifyError::RateLimited {
                    service: self.service,
                    status,
                }),
            };
        }

        if status.is_server_error() {
            return Err(NotifyError::ServerError {
                service: self.service,
                status,
            });
        }

        let body = response.text().await.unwrap_or_default();
        let mut body = body.trim().to_string();
        body.truncate(HTTP_ERROR_BODY_LIMIT);
        Err(NotifyError::Terminal {
            service: self.service,
            status,
            body,
        })
    }
}

/// Parses a `Retry-After` value: integer seconds or an HTTP-date. Returns
/// `None` for anything non-positive or unparseable.
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(seconds) = value.parse::<i64>() {
        if seconds <= 0 {
            return None;
        }
        return u64::try_from(seconds).ok().map(Duration::from_secs);
    }
    let when = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    (when.with_timezone(&Utc) - Utc::now()).to_std().ok()
}
