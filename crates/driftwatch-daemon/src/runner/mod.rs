//! Per-stack poll loop.
//!
//! One runner drives the fetch → parse → observe → evaluate → persist →
//! notify cycle for a single stack, once at startup and then on every
//! tick. Runtime failures are categorized, logged, and never stop the
//! loop; only cancellation ends it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use driftwatch_core::compose::{fingerprint, parse_desired_state, DesiredState};
use driftwatch_core::health::{evaluate_stack_health, ServiceStatus, StackHealth};
use driftwatch_core::snapshot::StackSnapshot;
use driftwatch_core::swarm::ActualState;
use driftwatch_core::transition::{stabilize_transitions, ServiceTransition};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::fetch::{ComposeFetch, FetchError};
use crate::healthcheck::CycleTracker;
use crate::metrics::Metrics;
use crate::notify::Notify;
use crate::state::StateStore;
use crate::swarm::SwarmApi;

mod error;

pub use error::{CycleError, RunnerError, RuntimeError};

/// Builder for [`Runner`].
pub struct RunnerBuilder {
    poll_interval: Duration,
    stack_name: String,
    fetcher: Option<Box<dyn ComposeFetch>>,
    swarm: Option<Arc<dyn SwarmApi>>,
    state_store: Option<Arc<dyn StateStore>>,
    state_lock: Option<Arc<tokio::sync::Mutex<()>>>,
    notifier: Option<Arc<dyn Notify>>,
    cycle_tracker: Option<Arc<CycleTracker>>,
    metrics: Option<Metrics>,
    alert_stabilization_cycles: u32,
    stacks_evaluated: usize,
}

impl RunnerBuilder {
    /// Scopes the runner to a stack name; empty means unscoped.
    #[must_use]
    pub fn stack_name(mut self, name: impl Into<String>) -> Self {
        self.stack_name = name.into();
        self
    }

    /// Sets the compose fetcher.
    #[must_use]
    pub fn fetcher(mut self, fetcher: Box<dyn ComposeFetch>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Sets the shared Swarm client.
    #[must_use]
    pub fn swarm(mut self, swarm: Arc<dyn SwarmApi>) -> Self {
        self.swarm = Some(swarm);
        self
    }

    /// Enables state persistence; `lock` serializes the load-modify-save
    /// window across runners.
    #[must_use]
    pub fn state_store(
        mut self,
        store: Arc<dyn StateStore>,
        lock: Arc<tokio::sync::Mutex<()>>,
    ) -> Self {
        self.state_store = Some(store);
        self.state_lock = Some(lock);
        self
    }

    /// Enables transition notifications.
    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn Notify>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Shares a cycle tracker for the health endpoints.
    #[must_use]
    pub fn cycle_tracker(mut self, tracker: Arc<CycleTracker>) -> Self {
        self.cycle_tracker = Some(tracker);
        self
    }

    /// Attaches metrics collectors.
    #[must_use]
    pub fn metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Sets how many consecutive cycles a status must hold before alerting.
    #[must_use]
    pub fn alert_stabilization_cycles(mut self, cycles: u32) -> Self {
        self.alert_stabilization_cycles = cycles.max(1);
        self
    }

    /// Sets the total number of stacks evaluated per cycle, for the
    /// health endpoint snapshot.
    #[must_use]
    pub fn stacks_evaluated(mut self, count: usize) -> Self {
        self.stacks_evaluated = count.max(1);
        self
    }

    /// Builds the runner.
    #[must_use]
    pub fn build(self) -> Runner {
        Runner {
            poll_interval: self.poll_interval,
            stack_name: self.stack_name,
            fetcher: self.fetcher,
            swarm: self.swarm,
            state_store: self.state_store,
            state_lock: self
                .state_lock
                .unwrap_or_else(|| Arc::new(tokio::sync::Mutex::new(()))),
            notifier: self.notifier,
            cycle_tracker: self.cycle_tracker,
            metrics: self.metrics,
            alert_stabilization_cycles: self.alert_stabilization_cycles,
            stacks_evaluated: self.stacks_evaluated,
            compose_etag: String::new(),
            compose_hash: String::new(),
            last_desired: None,
            last_actual: None,
        }
    }
}

/// Drives the fetch-compare-notify cycle for one stack.
pub struct Runner {
    poll_interval: Duration,
    stack_name: String,
    fetcher: Option<Box<dyn ComposeFetch>>,
    swarm: Option<Arc<dyn SwarmApi>>,
    state_store: Option<Arc<dyn StateStore>>,
    state_lock: Arc<tokio::sync::Mutex<()>>,
    notifier: Option<Arc<dyn Notify>>,
    cycle_tracker: Option<Arc<CycleTracker>>,
    metrics: Option<Metrics>,
    alert_stabilization_cycles: u32,
    stacks_evaluated: usize,

    compose_etag: String,
    compose_hash: String,
    last_desired: Option<DesiredState>,
    last_actual: Option<ActualState>,
}

impl Runner {
    /// Starts a builder with the given poll interval.
    #[must_use]
    pub fn builder(poll_interval: Duration) -> RunnerBuilder {
        RunnerBuilder {
            poll_interval,
            stack_name: String::new(),
            fetcher: None,
            swarm: None,
            state_store: None,
            state_lock: None,
            notifier: None,
            cycle_tracker: None,
            metrics: None,
            alert_stabilization_cycles: 1,
            stacks_evaluated: 1,
        }
    }

    /// The stack key used for state, metrics and notifications:
    /// the configured stack name, or `default` when unscoped.
    #[must_use]
    pub fn stack_key(&self) -> &str {
        if self.stack_name.is_empty() {
            "default"
        } else {
            &self.stack_name
        }
    }

    /// Runs the poll loop until cancellation: one immediate cycle, then
    /// one per tick. Per-cycle failures are logged and the loop continues.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::InvalidInterval`] for a zero poll interval;
    /// cancellation is a clean `Ok` exit.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<(), RunnerError> {
        if self.poll_interval.is_zero() {
            return Err(RunnerError::InvalidInterval);
        }

        if let Err(err) = self.run_once(cancel).await {
            log_cycle_error(&err, "initial run cycle failed");
        }

        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.poll_interval,
            self.poll_interval,
        );
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!(stack = self.stack_key(), "runner stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.run_once(cancel).await {
                        log_cycle_error(&err, "run cycle failed");
                    }
                }
            }
        }
    }

    /// Executes a single cycle, recording timing on success.
    ///
    /// # Errors
    ///
    /// Returns the categorized cycle failure; the caller decides whether
    /// to continue.
    pub async fn run_once(&mut self, cancel: &CancellationToken) -> Result<(), CycleError> {
        let started = Instant::now();
        self.cycle(cancel).await?;

        let duration = started.elapsed();
        if let Some(tracker) = &self.cycle_tracker {
            tracker.record_cycle(duration, self.stacks_evaluated);
        }
        if let Some(metrics) = &self.metrics {
            metrics.observe_cycle_duration(duration);
            metrics.set_last_successful_cycle(Utc::now());
        }
        Ok(())
    }

    async fn cycle(&mut self, cancel: &CancellationToken) -> Result<(), CycleError> {
        if cancel.is_cancelled() {
            return Err(CycleError::Cancelled);
        }

        self.refresh_desired_state(cancel).await?;

        let Some(swarm) = self.swarm.clone() else {
            return Ok(());
        };
        if cancel.is_cancelled() {
            return Err(CycleError::Cancelled);
        }

        if self.last_desired.is_none() {
            warn!(
                stack = self.stack_key(),
                "desired state not yet available, collecting actual state only"
            );
        }

        let actual = match swarm.actual_state(&self.stack_name).await {
            Ok(actual) => actual,
            Err(err) => {
                if let Some(metrics) = &self.metrics {
                    metrics.inc_docker_api_errors();
                }
                return Err(RuntimeError::wrap("swarm actual state", err).into());
            }
        };

        let service_count = actual.services.len();
        let running_replicas: u64 = actual
            .services
            .values()
            .map(|service| service.running_replicas)
            .sum();
        info!(
            stack = self.stack_key(),
            services = service_count,
            running_replicas,
            "collected actual state"
        );
        self.last_actual = Some(actual);

        if self.state_store.is_some() && self.last_desired.is_some() {
            self.evaluate_and_persist(cancel).await?;
        }

        Ok(())
    }

    async fn refresh_desired_state(&mut self, cancel: &CancellationToken) -> Result<(), CycleError> {
        let Some(fetcher) = &self.fetcher else {
            return Ok(());
        };

        let result = match fetcher.fetch(cancel, &self.compose_etag).await {
            Ok(result) => result,
            Err(FetchError::Cancelled) => return Err(CycleError::Cancelled),
            Err(err) => return Err(RuntimeError::wrap("compose fetch", err).into()),
        };

        if !result.etag.is_empty() {
            self.compose_etag = result.etag.clone();
        }
        if result.not_modified {
            debug!(stack = self.stack_key(), "compose unchanged");
            return Ok(());
        }

        let digest = fingerprint(&result.body)
            .map_err(|err| RuntimeError::wrap("compose fingerprint", err))?;
        if digest == self.compose_hash {
            debug!(stack = self.stack_key(), "compose fingerprint unchanged");
            return Ok(());
        }
        self.compose_hash = digest;

        info!(
            stack = self.stack_key(),
            bytes = result.body.len(),
            etag = %result.etag,
            last_modified = %result.last_modified,
            fingerprint = %self.compose_hash,
            "compose fetched"
        );

        let desired = parse_desired_state(&result.body)
            .map_err(|err| RuntimeError::wrap("compose parse", err))?;
        info!(
            stack = self.stack_key(),
            services = desired.services.len(),
            "parsed desired state"
        );
        self.last_desired = Some(desired);

        Ok(())
    }

    async fn evaluate_and_persist(&mut self, cancel: &CancellationToken) -> Result<(), CycleError> {
        let Some(store) = self.state_store.clone() else {
            return Ok(());
        };
        let Some(desired) = &self.last_desired else {
            return Ok(());
        };

        let stack_scoped = !self.stack_name.is_empty();
        let empty = ActualState::default();
        let actual = self.last_actual.as_ref().unwrap_or(&empty);
        let health = evaluate_stack_health(desired, actual, stack_scoped);

        for service in actual.services.values() {
            if service.update_state.is_empty() {
                continue;
            }
            info!(
                stack = self.stack_key(),
                service = %service.name,
                update_state = %service.update_state,
                "service update status"
            );
        }

        let transitions = {
            // The lock covers the whole load-modify-save window so that
            // concurrent stacks never clobber each other's snapshots.
            let _guard = self.state_lock.lock().await;

            let mut state = store
                .load()
                .await
                .map_err(|err| RuntimeError::wrap("state load", err))?;
            let prev = state.stacks.get(self.stack_key()).cloned();

            let (updated, transitions) = stabilize_transitions(
                prev.as_ref(),
                &health,
                self.alert_stabilization_cycles,
            );
            state.stacks.insert(
                self.stack_key().to_string(),
                StackSnapshot {
                    desired_fingerprint: self.compose_hash.clone(),
                    services: updated,
                    evaluated_at: Utc::now(),
                },
            );

            store
                .save(&state)
                .await
                .map_err(|err| RuntimeError::wrap("state save", err))?;
            transitions
        };

        self.log_cycle_summary(&health, &transitions);
        self.record_metrics(&health, &transitions);
        for change in &transitions {
            self.log_transition(change);
        }

        if let Some(notifier) = &self.notifier {
            if !transitions.is_empty() {
                if let Err(err) = notifier.notify(cancel, self.stack_key(), &transitions).await {
                    error!(
                        stack = self.stack_key(),
                        error = %err,
                        "failed to send notifications"
                    );
                }
            }
        }

        Ok(())
    }

    fn log_cycle_summary(&self, health: &StackHealth, transitions: &[ServiceTransition]) {
        let (ok, degraded, failed) = count_statuses(health);
        info!(
            stack = self.stack_key(),
            fingerprint = %self.compose_hash,
            services_evaluated = health.services.len(),
            services_ok = ok,
            services_degraded = degraded,
            services_failed = failed,
            transitions = transitions.len(),
            "health evaluation summary"
        );
    }

    fn record_metrics(&self, health: &StackHealth, transitions: &[ServiceTransition]) {
        let Some(metrics) = &self.metrics else {
            return;
        };

        let (ok, degraded, failed) = count_statuses(health);
        let stack = self.stack_key();
        metrics.set_services_total(stack, "ok", ok);
        metrics.set_services_total(stack, "degraded", degraded);
        metrics.set_services_total(stack, "failed", failed);

        for change in transitions {
            let severity = change.current_status.as_str().to_lowercase();
            metrics.inc_alerts_total(stack, &severity);
        }
    }

    fn log_transition(&self, change: &ServiceTransition) {
        // A macro invocation per level: tracing levels are static.
        macro_rules! emit {
            ($level:ident) => {
                tracing::$level!(
                    stack = self.stack_key(),
                    service = %change.name,
                    previous_status = change
                        .previous_status
                        .map_or("", |status| status.as_str()),
                    current_status = %change.current_status,
                    reasons = ?change.reasons,
                    desired_replicas = change.replica_change.as_ref().map(|c| c.current_desired),
                    running_replicas = change.replica_change.as_ref().map(|c| c.current_running),
                    desired_delta = change.replica_change.as_ref().map(|c| c.desired_delta),
                    running_delta = change.replica_change.as_ref().map(|c| c.running_delta),
                    desired_image = change.image_change.as_ref().map(|c| c.current_desired.as_str()),
                    actual_image = change.image_change.as_ref().map(|c| c.current_actual.as_str()),
                    drift = ?change.drift,
                    "service transition detected"
                )
            };
        }
        match change.current_status {
            ServiceStatus::Failed => emit!(error),
            ServiceStatus::Degraded => emit!(warn),
            ServiceStatus::Ok => emit!(info),
        }
    }
}

fn count_statuses(health: &StackHealth) -> (usize, usize, usize) {
    let mut ok = 0;
    let mut degraded = 0;
    let mut failed = 0;
    for service in health.services.values() {
        match service.status {
            ServiceStatus::Ok => ok += 1,
            ServiceStatus::Degraded => degraded += 1,
            ServiceStatus::Failed => failed += 1,
        }
    }
    (ok, degraded, failed)
}

fn log_cycle_error(err: &CycleError, message: &str) {
    match err {
        CycleError::Runtime(runtime) => {
            error!(error = %runtime, runtime_error = true, op = runtime.op, "{message}");
        }
        CycleError::Cancelled => {
            debug!("cycle interrupted by shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use driftwatch_core::compose::DeployMode;
    use driftwatch_core::health::ServiceStatus;
    use driftwatch_core::swarm::ActualService;

    use super::*;
    use crate::fetch::FetchResult;
    use crate::state::FileStore;
    use crate::swarm::SwarmError;

    struct StaticFetcher {
        body: &'static [u8],
        etag: &'static str,
        calls: StdMutex<u32>,
    }

    #[async_trait]
    impl ComposeFetch for StaticFetcher {
        async fn fetch(
            &self,
            _cancel: &CancellationToken,
            previous_etag: &str,
        ) -> Result<FetchResult, FetchError> {
            *self.calls.lock().unwrap() += 1;
            if !previous_etag.is_empty() && previous_etag == self.etag {
                return Ok(FetchResult {
                    body: Vec::new(),
                    etag: self.etag.to_string(),
                    last_modified: String::new(),
                    not_modified: true,
                });
            }
            Ok(FetchResult {
                body: self.body.to_vec(),
                etag: self.etag.to_string(),
                last_modified: String::new(),
                not_modified: false,
            })
        }
    }

    struct StaticSwarm {
        state: StdMutex<ActualState>,
        fail: bool,
    }

    impl StaticSwarm {
        fn new(state: ActualState) -> Self {
            Self {
                state: StdMutex::new(state),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl SwarmApi for StaticSwarm {
        async fn ping(&self) -> Result<(), SwarmError> {
            Ok(())
        }

        async fn actual_state(&self, _stack_name: &str) -> Result<ActualState, SwarmError> {
            if self.fail {
                return Err(SwarmError::Build("daemon unreachable".to_string()));
            }
            Ok(self.state.lock().unwrap().clone())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        batches: StdMutex<Vec<(String, Vec<ServiceTransition>)>>,
    }

    #[async_trait]
    impl Notify for RecordingNotifier {
        async fn notify(
            &self,
            _cancel: &CancellationToken,
            stack: &str,
            transitions: &[ServiceTransition],
        ) -> Result<(), crate::notify::NotifyError> {
            self.batches
                .lock()
                .unwrap()
                .push((stack.to_string(), transitions.to_vec()));
            Ok(())
        }
    }

    const COMPOSE: &[u8] = br"
services:
  api:
    image: app:v1
    deploy:
      replicas: 2
";

    fn running_api() -> ActualState {
        ActualState {
            services: BTreeMap::from([(
                "api".to_string(),
                ActualService {
                    name: "api".to_string(),
                    image: "app:v1".to_string(),
                    mode: DeployMode::Replicated,
                    desired_replicas: 2,
                    running_replicas: 2,
                    configs: Vec::new(),
                    secrets: Vec::new(),
                    update_state: String::new(),
                },
            )]),
        }
    }

    fn runner(
        dir: &tempfile::TempDir,
        fetcher: StaticFetcher,
        swarm: StaticSwarm,
        notifier: Arc<RecordingNotifier>,
    ) -> Runner {
        Runner::builder(Duration::from_secs(30))
            .stack_name("edge")
            .fetcher(Box::new(fetcher))
            .swarm(Arc::new(swarm))
            .state_store(
                Arc::new(FileStore::new(dir.path().join("state.json"))),
                Arc::new(tokio::sync::Mutex::new(())),
            )
            .notifier(notifier)
            .alert_stabilization_cycles(2)
            .build()
    }

    fn fetcher() -> StaticFetcher {
        StaticFetcher {
            body: COMPOSE,
            etag: "\"v1\"",
            calls: StdMutex::new(0),
        }
    }

    #[tokio::test]
    async fn first_cycle_with_missing_service_notifies_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let mut runner = runner(
            &dir,
            fetcher(),
            StaticSwarm::new(ActualState::default()),
            Arc::clone(&notifier),
        );

        runner.run_once(&CancellationToken::new()).await.unwrap();

        let batches = notifier.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        let (stack, transitions) = &batches[0];
        assert_eq!(stack, "edge");
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].name, "api");
        assert_eq!(transitions[0].previous_status, None);
        assert_eq!(transitions[0].current_status, ServiceStatus::Failed);
        assert_eq!(transitions[0].reasons, vec!["missing service"]);
    }

    #[tokio::test]
    async fn healthy_cycles_produce_no_notifications() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let mut runner = runner(
            &dir,
            fetcher(),
            StaticSwarm::new(running_api()),
            Arc::clone(&notifier),
        );

        let cancel = CancellationToken::new();
        runner.run_once(&cancel).await.unwrap();
        runner.run_once(&cancel).await.unwrap();
        assert!(notifier.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unchanged_compose_is_fetched_but_not_reparsed() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let fetcher = fetcher();
        let mut runner = runner(
            &dir,
            fetcher,
            StaticSwarm::new(running_api()),
            Arc::clone(&notifier),
        );

        let cancel = CancellationToken::new();
        runner.run_once(&cancel).await.unwrap();
        assert!(runner.last_desired.is_some());
        let hash = runner.compose_hash.clone();

        // Second cycle: the fetcher answers 304, the parsed state and
        // fingerprint are retained.
        runner.run_once(&cancel).await.unwrap();
        assert_eq!(runner.compose_hash, hash);
        assert!(runner.last_desired.is_some());
    }

    #[tokio::test]
    async fn swarm_failure_is_a_categorized_runtime_error() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let mut swarm = StaticSwarm::new(ActualState::default());
        swarm.fail = true;
        let metrics = Metrics::new().unwrap();
        let mut runner = Runner::builder(Duration::from_secs(30))
            .stack_name("edge")
            .fetcher(Box::new(fetcher()))
            .swarm(Arc::new(swarm))
            .state_store(
                Arc::new(FileStore::new(dir.path().join("state.json"))),
                Arc::new(tokio::sync::Mutex::new(())),
            )
            .notifier(notifier)
            .metrics(metrics.clone())
            .build();

        let err = runner.run_once(&CancellationToken::new()).await.unwrap_err();
        match err {
            CycleError::Runtime(runtime) => assert_eq!(runtime.op, "swarm actual state"),
            CycleError::Cancelled => panic!("unexpected cancellation"),
        }
        let text = metrics.encode_text().unwrap();
        assert!(text.contains("driftwatch_docker_api_errors_total 1"));
    }

    #[tokio::test]
    async fn update_in_progress_suppresses_alerting() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let mut state = running_api();
        {
            let api = state.services.get_mut("api").unwrap();
            api.running_replicas = 1;
            api.desired_replicas = 2;
            api.update_state = "updating".to_string();
        }
        let mut runner = runner(&dir, fetcher(), StaticSwarm::new(state), Arc::clone(&notifier));

        runner.run_once(&CancellationToken::new()).await.unwrap();
        assert!(notifier.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn zero_poll_interval_is_rejected() {
        let mut runner = Runner::builder(Duration::ZERO).build();
        assert!(matches!(
            runner.run(&CancellationToken::new()).await,
            Err(RunnerError::InvalidInterval)
        ));
    }

    #[tokio::test]
    async fn run_exits_cleanly_on_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let mut runner = runner(
            &dir,
            fetcher(),
            StaticSwarm::new(running_api()),
            Arc::clone(&notifier),
        );

        let cancel = CancellationToken::new();
        let child = cancel.clone();
        let handle = tokio::spawn(async move { runner.run(&child).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cycle_records_tracker_and_metrics_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let tracker = Arc::new(CycleTracker::new());
        let metrics = Metrics::new().unwrap();
        let mut runner = Runner::builder(Duration::from_secs(30))
            .stack_name("edge")
            .fetcher(Box::new(fetcher()))
            .swarm(Arc::new(StaticSwarm::new(running_api())))
            .state_store(
                Arc::new(FileStore::new(dir.path().join("state.json"))),
                Arc::new(tokio::sync::Mutex::new(())),
            )
            .notifier(notifier)
            .cycle_tracker(Arc::clone(&tracker))
            .metrics(metrics.clone())
            .stacks_evaluated(3)
            .build();

        runner.run_once(&CancellationToken::new()).await.unwrap();

        assert!(tracker.ready());
        assert_eq!(tracker.snapshot().stacks_evaluated, 3);
        let text = metrics.encode_text().unwrap();
        assert!(text.contains("driftwatch_cycle_duration_seconds_count 1"));
        assert!(text.contains("driftwatch_services_total{stack=\"edge\",status=\"ok\"} 1"));
    }
}
