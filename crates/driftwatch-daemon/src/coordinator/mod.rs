//! Multi-stack coordination.
//!
//! Spawns one runner per stack mapping, shares the Swarm client, state
//! store, notifier and metrics between them, fans out a single
//! cancellation, and waits for every runner to exit.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::StackMapping;
use crate::fetch::HttpFetcher;
use crate::healthcheck::CycleTracker;
use crate::metrics::Metrics;
use crate::notify::Notify;
use crate::runner::Runner;
use crate::state::StateStore;
use crate::swarm::SwarmApi;

const STATE_IDLE: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_DONE: u8 = 2;

/// Builder for [`Coordinator`].
pub struct CoordinatorBuilder {
    poll_interval: Duration,
    compose_timeout: Duration,
    mappings: Vec<StackMapping>,
    swarm: Arc<dyn SwarmApi>,
    state_store: Option<Arc<dyn StateStore>>,
    state_lock: Arc<tokio::sync::Mutex<()>>,
    notifier: Option<Arc<dyn Notify>>,
    cycle_tracker: Option<Arc<CycleTracker>>,
    metrics: Option<Metrics>,
    alert_stabilization_cycles: u32,
}

impl CoordinatorBuilder {
    /// Sets the shared state store and its cross-runner lock.
    #[must_use]
    pub fn state_store(
        mut self,
        store: Arc<dyn StateStore>,
        lock: Arc<tokio::sync::Mutex<()>>,
    ) -> Self {
        self.state_store = Some(store);
        self.state_lock = lock;
        self
    }

    /// Enables transition notifications for every runner.
    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn Notify>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Shares a cycle tracker with all runners.
    #[must_use]
    pub fn cycle_tracker(mut self, tracker: Arc<CycleTracker>) -> Self {
        self.cycle_tracker = Some(tracker);
        self
    }

    /// Shares metrics collectors with all runners.
    #[must_use]
    pub fn metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Applies alert stabilization to all runners.
    #[must_use]
    pub fn alert_stabilization_cycles(mut self, cycles: u32) -> Self {
        self.alert_stabilization_cycles = cycles.max(1);
        self
    }

    /// Builds the coordinator.
    #[must_use]
    pub fn build(self) -> Coordinator {
        Coordinator {
            poll_interval: self.poll_interval,
            compose_timeout: self.compose_timeout,
            mappings: self.mappings,
            swarm: self.swarm,
            state_store: self.state_store,
            state_lock: self.state_lock,
            notifier: self.notifier,
            cycle_tracker: self.cycle_tracker,
            metrics: self.metrics,
            alert_stabilization_cycles: self.alert_stabilization_cycles,
            stop_token: CancellationToken::new(),
            lifecycle: tokio::sync::watch::channel(STATE_IDLE).0,
        }
    }
}

/// Supervises one [`Runner`] per stack mapping.
pub struct Coordinator {
    poll_interval: Duration,
    compose_timeout: Duration,
    mappings: Vec<StackMapping>,
    swarm: Arc<dyn SwarmApi>,
    state_store: Option<Arc<dyn StateStore>>,
    state_lock: Arc<tokio::sync::Mutex<()>>,
    notifier: Option<Arc<dyn Notify>>,
    cycle_tracker: Option<Arc<CycleTracker>>,
    metrics: Option<Metrics>,
    alert_stabilization_cycles: u32,
    stop_token: CancellationToken,
    lifecycle: tokio::sync::watch::Sender<u8>,
}

impl Coordinator {
    /// Starts a builder over the given mappings and shared Swarm client.
    #[must_use]
    pub fn builder(
        poll_interval: Duration,
        compose_timeout: Duration,
        mappings: Vec<StackMapping>,
        swarm: Arc<dyn SwarmApi>,
    ) -> CoordinatorBuilder {
        CoordinatorBuilder {
            poll_interval,
            compose_timeout,
            mappings,
            swarm,
            state_store: None,
            state_lock: Arc::new(tokio::sync::Mutex::new(())),
            notifier: None,
            cycle_tracker: None,
            metrics: None,
            alert_stabilization_cycles: 1,
        }
    }

    /// Runs all stack runners in parallel until `cancel` (or [`Self::stop`])
    /// fires, then waits for them to exit. Never fails: per-runner errors
    /// are recorded against their stack and logged before returning.
    pub async fn run(&self, cancel: &CancellationToken) {
        let run_token = cancel.child_token();
        let errors: Arc<StdMutex<BTreeMap<String, String>>> =
            Arc::new(StdMutex::new(BTreeMap::new()));

        self.lifecycle.send_replace(STATE_RUNNING);
        info!(stacks = self.mappings.len(), "starting coordinator");

        let mut runners = JoinSet::new();
        for mapping in &self.mappings {
            self.spawn_runner(&mut runners, mapping, &run_token, &errors);
        }

        let stop_token = self.stop_token.clone();
        let linked = run_token.clone();
        let stop_watch = tokio::spawn(async move {
            stop_token.cancelled().await;
            linked.cancel();
        });

        while runners.join_next().await.is_some() {}
        stop_watch.abort();
        info!("all runners stopped");

        let errors = errors.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for (stack, err) in errors.iter() {
            error!(stack = %stack, error = %err, "runner error");
        }

        self.lifecycle.send_replace(STATE_DONE);
    }

    /// Cancels all runners and waits for [`Self::run`] to finish.
    /// Idempotent; returns immediately when the coordinator never ran.
    pub async fn stop(&self) {
        self.stop_token.cancel();
        let mut lifecycle = self.lifecycle.subscribe();
        loop {
            let state = *lifecycle.borrow_and_update();
            if state != STATE_RUNNING {
                return;
            }
            if lifecycle.changed().await.is_err() {
                return;
            }
        }
    }

    fn spawn_runner(
        &self,
        runners: &mut JoinSet<()>,
        mapping: &StackMapping,
        run_token: &CancellationToken,
        errors: &Arc<StdMutex<BTreeMap<String, String>>>,
    ) {
        let stack = mapping.name.clone();
        let timeout = mapping.timeout.unwrap_or(self.compose_timeout);

        // Initialization failures are recorded against this stack only;
        // sibling runners still start.
        let fetcher = match HttpFetcher::new(&mapping.compose_url, timeout, 0) {
            Ok(fetcher) => fetcher,
            Err(err) => {
                error!(stack = %stack, error = %err, "failed to initialize compose fetcher");
                record_error(errors, &stack, &err.to_string());
                return;
            }
        };

        let mut builder = Runner::builder(self.poll_interval)
            .stack_name(&stack)
            .fetcher(Box::new(fetcher))
            .swarm(Arc::clone(&self.swarm))
            .alert_stabilization_cycles(self.alert_stabilization_cycles)
            .stacks_evaluated(self.mappings.len().max(1));
        if let Some(store) = &self.state_store {
            builder = builder.state_store(Arc::clone(store), Arc::clone(&self.state_lock));
        }
        if let Some(notifier) = &self.notifier {
            builder = builder.notifier(Arc::clone(notifier));
        }
        if let Some(tracker) = &self.cycle_tracker {
            builder = builder.cycle_tracker(Arc::clone(tracker));
        }
        if let Some(metrics) = &self.metrics {
            builder = builder.metrics(metrics.clone());
        }
        let mut runner = builder.build();

        let token = run_token.clone();
        let errors = Arc::clone(errors);
        runners.spawn(async move {
            info!(stack = %stack, "runner started");
            match runner.run(&token).await {
                Ok(()) => info!(stack = %stack, "runner exited cleanly"),
                Err(err) => {
                    error!(stack = %stack, error = %err, "runner exited with error");
                    record_error(&errors, &stack, &err.to_string());
                }
            }
        });
    }
}

fn record_error(errors: &Arc<StdMutex<BTreeMap<String, String>>>, stack: &str, message: &str) {
    errors
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .insert(stack.to_string(), message.to_string());
}
