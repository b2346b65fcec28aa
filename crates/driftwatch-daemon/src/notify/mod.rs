//! Notification pipeline.
//!
//! Transition alerts fan out to zero or more sinks (Slack, generic
//! webhook). Each sink shares the same delivery machinery: a per-stack
//! token-bucket rate limit and a bounded retry policy. Delivery failures
//! are soft; they are logged by the caller and never fail the cycle.

use async_trait::async_trait;
use driftwatch_core::transition::ServiceTransition;
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::info;

mod poster;
mod slack;
mod webhook;

pub(crate) use poster::TimingConfig;
pub use slack::{new_slack_notifier, SlackNotifier};
pub use webhook::{WebhookNotifier, DEFAULT_WEBHOOK_TEMPLATE};

/// Notification failures.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Network-level delivery failure; retryable.
    #[error("{service} request failed: {source}")]
    Request {
        /// Sink name.
        service: &'static str,
        /// Underlying error.
        source: reqwest::Error,
    },

    /// 429 without a usable `Retry-After`; retryable via backoff.
    #[error("{service} rate limited: {status}")]
    RateLimited {
        /// Sink name.
        service: &'static str,
        /// The 429 status.
        status: StatusCode,
    },

    /// 429 with a usable `Retry-After`; wait exactly that long.
    #[error("{service} rate limited; retry after {wait:?}")]
    RetryAfter {
        /// Sink name.
        service: &'static str,
        /// The 429 status.
        status: StatusCode,
        /// Server-mandated wait.
        wait: std::time::Duration,
    },

    /// 5xx from the sink; retryable.
    #[error("{service} server error: {status}")]
    ServerError {
        /// Sink name.
        service: &'static str,
        /// The 5xx status.
        status: StatusCode,
    },

    /// Terminal response; carries up to 1 KiB of the body.
    #[error("{service} request failed: {status} ({body})")]
    Terminal {
        /// Sink name.
        service: &'static str,
        /// The offending status.
        status: StatusCode,
        /// Truncated response body.
        body: String,
    },

    /// Payload could not be serialized.
    #[error("marshal {service} payload: {source}")]
    Payload {
        /// Sink name.
        service: &'static str,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// Webhook template failed to parse; fatal at startup.
    #[error("parse webhook template: {0}")]
    Template(String),

    /// Delivery interrupted by shutdown.
    #[error("notification cancelled")]
    Cancelled,
}

impl NotifyError {
    /// Whether the failure is transient and worth retrying.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Request { .. } | Self::RateLimited { .. } | Self::ServerError { .. }
        )
    }
}

/// Delivers transition alerts to external systems.
#[async_trait]
pub trait Notify: Send + Sync {
    /// Delivers one batch of transitions for one stack.
    async fn notify(
        &self,
        cancel: &CancellationToken,
        stack: &str,
        transitions: &[ServiceTransition],
    ) -> Result<(), NotifyError>;
}

/// Fans out notifications to multiple sinks. Every sink is attempted; the
/// first error is reported.
pub struct MultiNotifier {
    sinks: Vec<Box<dyn Notify>>,
}

impl MultiNotifier {
    /// Creates a notifier dispatching to all provided sinks.
    #[must_use]
    pub fn new(sinks: Vec<Box<dyn Notify>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl Notify for MultiNotifier {
    async fn notify(
        &self,
        cancel: &CancellationToken,
        stack: &str,
        transitions: &[ServiceTransition],
    ) -> Result<(), NotifyError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(err) = sink.notify(cancel, stack, transitions).await {
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Drops notifications; stands in for an unconfigured sink.
pub struct NoopNotifier;

impl NoopNotifier {
    /// Creates a noop notifier, logging `reason` once.
    #[must_use]
    pub fn new(reason: &str) -> Self {
        if !reason.is_empty() {
            info!("{reason}");
        }
        Self
    }
}

#[async_trait]
impl Notify for NoopNotifier {
    async fn notify(
        &self,
        _cancel: &CancellationToken,
        _stack: &str,
        _transitions: &[ServiceTransition],
    ) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Logs transitions instead of delivering them.
pub struct DryRunNotifier {
    _inner: Box<dyn Notify>,
}

impl DryRunNotifier {
    /// Wraps `inner`, suppressing all delivery.
    #[must_use]
    pub fn new(inner: Box<dyn Notify>) -> Self {
        Self { _inner: inner }
    }
}

#[async_trait]
impl Notify for DryRunNotifier {
    async fn notify(
        &self,
        _cancel: &CancellationToken,
        stack: &str,
        transitions: &[ServiceTransition],
    ) -> Result<(), NotifyError> {
        for change in transitions {
            info!(
                stack,
                service = %change.name,
                previous_status = change
                    .previous_status
                    .map_or("", |status| status.as_str()),
                current_status = %change.current_status,
                reasons = ?change.reasons,
                "[DRY-RUN] Would notify"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use driftwatch_core::health::ServiceStatus;

    use super::*;

    struct RecordingSink {
        calls: Arc<AtomicU32>,
        fail: bool,
    }

    #[async_trait]
    impl Notify for RecordingSink {
        async fn notify(
            &self,
            _cancel: &CancellationToken,
            _stack: &str,
            _transitions: &[ServiceTransition],
        ) -> Result<(), NotifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(NotifyError::Cancelled)
            } else {
                Ok(())
            }
        }
    }

    fn transition(name: &str) -> ServiceTransition {
        ServiceTransition {
            name: name.to_string(),
            previous_status: None,
            current_status: ServiceStatus::Failed,
            reasons: vec!["missing service".to_string()],
            drift: Vec::new(),
            replica_change: None,
            image_change: None,
        }
    }

    #[tokio::test]
    async fn multi_notifier_attempts_all_sinks_and_keeps_first_error() {
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));
        let multi = MultiNotifier::new(vec![
            Box::new(RecordingSink {
                calls: Arc::clone(&first),
                fail: true,
            }),
            Box::new(RecordingSink {
                calls: Arc::clone(&second),
                fail: false,
            }),
        ]);

        let err = multi
            .notify(&CancellationToken::new(), "edge", &[transition("api")])
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Cancelled));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dry_run_never_reaches_the_inner_sink() {
        let calls = Arc::new(AtomicU32::new(0));
        let dry_run = DryRunNotifier::new(Box::new(RecordingSink {
            calls: Arc::clone(&calls),
            fail: false,
        }));

        dry_run
            .notify(&CancellationToken::new(), "edge", &[transition("api")])
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn noop_notifier_accepts_everything() {
        NoopNotifier::new("test sink disabled")
            .notify(&CancellationToken::new(), "edge", &[transition("api")])
            .await
            .unwrap();
    }
}
