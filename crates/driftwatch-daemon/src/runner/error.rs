//! Runner error taxonomy.

/// A categorized runtime failure that should not stop the poll loop.
///
/// The `op` label identifies the cycle step that failed and is stable for
/// log filtering: `compose fetch`, `compose fingerprint`, `compose parse`,
/// `swarm actual state`, `state load`, `state save`, `state evaluation`.
#[derive(Debug, thiserror::Error)]
#[error("{op}: {source}")]
pub struct RuntimeError {
    /// The cycle step that failed.
    pub op: &'static str,
    /// The underlying failure.
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl RuntimeError {
    pub(crate) fn wrap(
        op: &'static str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            op,
            source: Box::new(source),
        }
    }
}

/// Outcome of a single cycle.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    /// A categorized runtime failure; the loop continues.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// The cycle was interrupted by shutdown.
    #[error("cycle cancelled")]
    Cancelled,
}

/// Fatal runner misconfiguration.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The poll interval was zero.
    #[error("poll interval must be greater than zero")]
    InvalidInterval,
}
