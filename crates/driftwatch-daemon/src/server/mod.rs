//! Health and metrics HTTP servers.
//!
//! Serves `/healthz`, `/readyz` and `/metrics` as configured. Both ports
//! are optional; when they coincide a single server carries all routes.
//! Servers drain with a bounded grace period after cancellation.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::healthcheck::CycleTracker;
use crate::metrics::Metrics;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Server startup failures; fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// A listener could not be bound.
    #[error("bind {label} server on port {port}: {source}")]
    Bind {
        /// Which server failed.
        label: &'static str,
        /// Requested port.
        port: u16,
        /// Underlying error.
        source: std::io::Error,
    },
}

#[derive(Clone)]
struct AppState {
    tracker: Arc<CycleTracker>,
    poll_interval: Duration,
    metrics: Option<Metrics>,
}

/// Starts the configured HTTP servers and serves until cancellation.
///
/// A port of 0 disables the corresponding server; equal ports produce one
/// server with all routes. Returns once every server has shut down.
///
/// # Errors
///
/// Returns [`ServerError`] when a listener cannot be bound.
pub async fn start(
    cancel: CancellationToken,
    poll_interval: Duration,
    tracker: Arc<CycleTracker>,
    metrics: Option<Metrics>,
    health_port: u16,
    metrics_port: u16,
) -> Result<(), ServerError> {
    let state = AppState {
        tracker,
        poll_interval,
        metrics,
    };

    let mut servers = Vec::new();
    if health_port != 0 && health_port == metrics_port {
        let app = health_routes(metrics_routes(Router::new(), &state), &state);
        servers.push(("health/metrics", health_port, app));
    } else {
        if health_port != 0 {
            servers.push(("health", health_port, health_routes(Router::new(), &state)));
        }
        if metrics_port != 0 {
            servers.push(("metrics", metrics_port, metrics_routes(Router::new(), &state)));
        }
    }

    let mut handles = Vec::new();
    for (label, port, app) in servers {
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|source| ServerError::Bind {
                label,
                port,
                source,
            })?;
        info!(server = label, port, "http server starting");
        handles.push(tokio::spawn(serve_until_cancelled(
            label,
            listener,
            app,
            cancel.clone(),
        )));
    }

    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

async fn serve_until_cancelled(
    label: &'static str,
    listener: tokio::net::TcpListener,
    app: Router,
    cancel: CancellationToken,
) {
    let shutdown = cancel.clone();
    let server = async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    };

    let deadline = async {
        cancel.cancelled().await;
        tokio::time::sleep(SHUTDOWN_GRACE).await;
    };

    tokio::select! {
        result = server => {
            if let Err(err) = result {
                error!(server = label, error = %err, "http server failed");
            } else {
                info!(server = label, "http server stopped");
            }
        }
        () = deadline => {
            warn!(server = label, "http server shutdown grace period expired");
        }
    }
}

fn health_routes(router: Router, state: &AppState) -> Router {
    router
        .route("/healthz", get(healthz).with_state(state.clone()))
        .route("/readyz", get(readyz).with_state(state.clone()))
}

fn metrics_routes(router: Router, state: &AppState) -> Router {
    router.route("/metrics", get(metrics_handler).with_state(state.clone()))
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.tracker.snapshot();
    let status = if state.tracker.healthy(Utc::now(), state.poll_interval) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(snapshot))
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.tracker.snapshot();
    let status = if state.tracker.ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(snapshot))
}

async fn metrics_handler(State(state): State<AppState>) -> axum::response::Response {
    let Some(metrics) = &state.metrics else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match metrics.encode_text() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}
