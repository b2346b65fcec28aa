//! Cycle tracking for the health endpoints.

use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Latest cycle timing details, served by `/healthz` and `/readyz`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    /// Completion time of the last successful cycle.
    pub last_cycle_time: Option<DateTime<Utc>>,
    /// Duration of that cycle in milliseconds.
    pub cycle_duration_ms: u64,
    /// Number of stacks evaluated per cycle.
    pub stacks_evaluated: usize,
}

#[derive(Debug, Default)]
struct Inner {
    last_cycle: Option<DateTime<Utc>>,
    cycle_duration: Duration,
    stacks_evaluated: usize,
    ready: bool,
}

/// Records cycle timing; shared by all runners and the HTTP handlers.
#[derive(Debug, Default)]
pub struct CycleTracker {
    inner: RwLock<Inner>,
}

impl CycleTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a completed cycle and marks the process ready.
    pub fn record_cycle(&self, duration: Duration, stacks_evaluated: usize) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.last_cycle = Some(Utc::now());
        inner.cycle_duration = duration;
        inner.stacks_evaluated = stacks_evaluated;
        inner.ready = true;
    }

    /// Current tracker snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let inner = self
            .inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Snapshot {
            last_cycle_time: inner.last_cycle,
            cycle_duration_ms: u64::try_from(inner.cycle_duration.as_millis()).unwrap_or(u64::MAX),
            stacks_evaluated: inner.stacks_evaluated,
        }
    }

    /// Whether at least one successful cycle has completed.
    #[must_use]
    pub fn ready(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .ready
    }

    /// Whether the last cycle completed within twice the poll interval.
    #[must_use]
    pub fn healthy(&self, now: DateTime<Utc>, poll_interval: Duration) -> bool {
        if poll_interval.is_zero() {
            return false;
        }
        let inner = self
            .inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(last_cycle) = inner.last_cycle else {
            return false;
        };
        let Ok(age) = (now - last_cycle).to_std() else {
            // A last-cycle timestamp in the future counts as fresh.
            return true;
        };
        age <= poll_interval * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unready_and_unhealthy() {
        let tracker = CycleTracker::new();
        assert!(!tracker.ready());
        assert!(!tracker.healthy(Utc::now(), Duration::from_secs(30)));
        assert!(tracker.snapshot().last_cycle_time.is_none());
    }

    #[test]
    fn record_cycle_marks_ready_and_healthy() {
        let tracker = CycleTracker::new();
        tracker.record_cycle(Duration::from_millis(120), 3);

        assert!(tracker.ready());
        assert!(tracker.healthy(Utc::now(), Duration::from_secs(30)));

        let snapshot = tracker.snapshot();
        assert!(snapshot.last_cycle_time.is_some());
        assert_eq!(snapshot.cycle_duration_ms, 120);
        assert_eq!(snapshot.stacks_evaluated, 3);
    }

    #[test]
    fn staleness_beyond_twice_interval_is_unhealthy() {
        let tracker = CycleTracker::new();
        tracker.record_cycle(Duration::from_millis(50), 1);

        let poll = Duration::from_secs(30);
        let future = Utc::now() + chrono::Duration::seconds(61);
        assert!(!tracker.healthy(future, poll));

        let still_fresh = Utc::now() + chrono::Duration::seconds(59);
        assert!(tracker.healthy(still_fresh, poll));
    }

    #[test]
    fn zero_interval_is_never_healthy() {
        let tracker = CycleTracker::new();
        tracker.record_cycle(Duration::from_millis(50), 1);
        assert!(!tracker.healthy(Utc::now(), Duration::ZERO));
    }
}
