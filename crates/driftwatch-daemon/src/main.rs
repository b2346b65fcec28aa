//! driftwatch - drift sentinel for Docker Swarm.
//!
//! Loads configuration from the environment, wires the shared
//! collaborators, and runs either a single stack runner or the multi-stack
//! coordinator until SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use driftwatch_daemon::config::{self, Config};
use driftwatch_daemon::coordinator::Coordinator;
use driftwatch_daemon::fetch::HttpFetcher;
use driftwatch_daemon::healthcheck::CycleTracker;
use driftwatch_daemon::metrics::Metrics;
use driftwatch_daemon::notify::{
    new_slack_notifier, DryRunNotifier, MultiNotifier, Notify, WebhookNotifier,
};
use driftwatch_daemon::runner::Runner;
use driftwatch_daemon::server;
use driftwatch_daemon::state::FileStore;
use driftwatch_daemon::swarm::{DockerClient, SwarmApi};

/// driftwatch - read-only drift sentinel for Docker Swarm.
#[derive(Parser, Debug)]
#[command(name = "driftwatch")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a .env file read for missing environment variables
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    /// Override LOG_LEVEL
    #[arg(long)]
    log_level: Option<String>,

    /// Log notifications instead of delivering them (overrides DRY_RUN)
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut cfg =
        Config::load_with_env_file(&args.env_file).context("failed to load config")?;
    if let Some(level) = &args.log_level {
        cfg.log_level.clone_from(level);
    }
    cfg.dry_run |= args.dry_run;

    init_logging(&cfg.log_level);
    log_config_summary(&cfg);
    info!("driftwatch starting");

    let cancel = CancellationToken::new();
    install_signal_handler(cancel.clone());

    let swarm: Arc<dyn SwarmApi> = Arc::new(
        DockerClient::new(&cfg.docker_proxy_url, cfg.docker_api_timeout, &cfg.docker_tls)
            .context("failed to initialize docker client")?,
    );
    swarm.ping().await.context("docker api unreachable")?;

    let state_store = Arc::new(FileStore::new(cfg.state_path.clone()));
    let state_lock = Arc::new(tokio::sync::Mutex::new(()));

    let tracker = Arc::new(CycleTracker::new());
    let metrics = if cfg.metrics_port == 0 {
        None
    } else {
        Some(Metrics::new().context("failed to initialize metrics")?)
    };

    let server_task = tokio::spawn(server::start(
        cancel.clone(),
        cfg.poll_interval,
        Arc::clone(&tracker),
        metrics.clone(),
        cfg.health_port,
        cfg.metrics_port,
    ));

    let notifier = build_notifier(&cfg).context("failed to initialize webhook notifier")?;

    if let Some(mapping_path) = &cfg.mapping_file {
        let mappings =
            config::load_mapping_file(mapping_path).context("failed to load mapping file")?;
        info!(
            stacks = mappings.len(),
            mapping_file = %mapping_path.display(),
            "multi-stack mode"
        );

        let mut builder = Coordinator::builder(
            cfg.poll_interval,
            cfg.compose_timeout,
            mappings,
            Arc::clone(&swarm),
        )
        .state_store(state_store, state_lock)
        .notifier(notifier)
        .cycle_tracker(Arc::clone(&tracker))
        .alert_stabilization_cycles(cfg.alert_stabilization_cycles);
        if let Some(metrics) = metrics.clone() {
            builder = builder.metrics(metrics);
        }
        builder.build().run(&cancel).await;
    } else {
        let compose_url = cfg
            .compose_url
            .as_deref()
            .context("COMPOSE_URL is required in single-stack mode")?;
        info!(
            compose_url,
            stack_name = %cfg.stack_name,
            "single-stack mode"
        );

        let fetcher = HttpFetcher::new(compose_url, cfg.compose_timeout, 0)
            .context("failed to initialize compose fetcher")?;
        let mut builder = Runner::builder(cfg.poll_interval)
            .stack_name(&cfg.stack_name)
            .fetcher(Box::new(fetcher))
            .swarm(Arc::clone(&swarm))
            .state_store(state_store, state_lock)
            .notifier(notifier)
            .cycle_tracker(Arc::clone(&tracker))
            .alert_stabilization_cycles(cfg.alert_stabilization_cycles);
        if let Some(metrics) = metrics.clone() {
            builder = builder.metrics(metrics);
        }
        builder
            .build()
            .run(&cancel)
            .await
            .context("runner exited with error")?;
    }

    let _ = server_task.await;
    info!("driftwatch stopped");
    Ok(())
}

/// Initializes tracing from the configured level. Unrecognized levels
/// default to `info` with a warning; `fatal`/`panic` map to `error`.
fn init_logging(level: &str) {
    let normalized = level.trim().to_ascii_lowercase();
    let (directive, recognized) = match normalized.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => (normalized.clone(), true),
        "warning" => ("warn".to_string(), true),
        "fatal" | "panic" => ("error".to_string(), true),
        "" => ("info".to_string(), true),
        _ => ("info".to_string(), false),
    };

    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if !recognized {
        warn!(provided = level, using = "info", "unrecognized log level, defaulting to info");
    }
}

fn log_config_summary(cfg: &Config) {
    info!(
        compose_url = cfg.compose_url.as_deref().unwrap_or(""),
        compose_timeout = %humantime::format_duration(cfg.compose_timeout),
        mapping_file = cfg
            .mapping_file
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_default(),
        docker_proxy_url = %cfg.docker_proxy_url,
        docker_api_timeout = %humantime::format_duration(cfg.docker_api_timeout),
        stack_name = %cfg.stack_name,
        docker_tls_enabled = cfg.docker_tls.enabled,
        poll_interval = %humantime::format_duration(cfg.poll_interval),
        alert_stabilization_cycles = cfg.alert_stabilization_cycles,
        log_level = %cfg.log_level,
        state_path = %cfg.state_path.display(),
        slack_webhook = config::secret_status(&cfg.slack_webhook_url),
        webhook_url = config::secret_status(&cfg.webhook_url),
        health_port = cfg.health_port,
        metrics_port = cfg.metrics_port,
        dry_run = cfg.dry_run,
        "config loaded"
    );
}

fn build_notifier(cfg: &Config) -> Result<Arc<dyn Notify>, anyhow::Error> {
    let mut sinks: Vec<Box<dyn Notify>> = vec![new_slack_notifier(&cfg.slack_webhook_url)];
    if let Some(webhook) = WebhookNotifier::new(&cfg.webhook_url, &cfg.webhook_template)? {
        sinks.push(Box::new(webhook));
    }

    let notifier: Box<dyn Notify> = Box::new(MultiNotifier::new(sinks));
    if cfg.dry_run {
        return Ok(Arc::new(DryRunNotifier::new(notifier)));
    }
    Ok(Arc::from(notifier))
}

fn install_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let Ok(mut sigterm) = signal(SignalKind::terminate()) else {
            warn!("failed to register SIGTERM handler");
            return;
        };
        let Ok(mut sigint) = signal(SignalKind::interrupt()) else {
            warn!("failed to register SIGINT handler");
            return;
        };
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("received SIGINT, shutting down"),
        }
        cancel.cancel();
    });
}
