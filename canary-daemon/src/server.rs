//! HTTP surface -- `/metrics` scrape trigger and `/health`.
//!
//! Every scrape of `/metrics` renders the current exposition first and then
//! asks the orchestrator to start a run. The response never waits for the
//! run; its results show up in the next scrape.
//!
//! ```text
//! GET /metrics ──render()──▶ 200 text/plain
//!        └──────try_run()──▶ Started | AlreadyRunning
//! GET /health  ─────────────▶ 200 {"status":"ok","run_in_progress":bool}
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tokio::net::TcpListener;

use canary_engine::{Orchestrator, Platform, Transport, TriggerOutcome};

const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// What the HTTP layer needs from the orchestrator.
pub trait RunTrigger: Send + Sync + 'static {
    /// Starts a run in the background unless one is active.
    fn try_run(&self) -> TriggerOutcome;

    /// Whether a run currently holds the gate.
    fn is_running(&self) -> bool;
}

impl<P: Platform, T: Transport> RunTrigger for Arc<Orchestrator<P, T>> {
    fn try_run(&self) -> TriggerOutcome {
        Orchestrator::try_run(self)
    }

    fn is_running(&self) -> bool {
        self.gate().is_running()
    }
}

/// Source of the Prometheus exposition text.
pub trait Exposition: Send + Sync + 'static {
    fn render(&self) -> String;
}

impl Exposition for PrometheusHandle {
    fn render(&self) -> String {
        PrometheusHandle::render(self)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub exposition: Arc<dyn Exposition>,
    pub trigger: Arc<dyn RunTrigger>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    run_in_progress: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(scrape))
        .route("/health", get(health))
        .with_state(state)
}

async fn scrape(State(state): State<AppState>) -> impl IntoResponse {
    let body = state.exposition.render();
    match state.trigger.try_run() {
        TriggerOutcome::Started => tracing::debug!("scrape triggered a canary run"),
        TriggerOutcome::AlreadyRunning => {
            tracing::debug!("scrape during an active run, no new run started")
        }
    }
    ([(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)], body)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        run_in_progress: state.trigger.is_running(),
    })
}

/// Binds `addr` and serves until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {}: {}", addr, e))?;
    serve_on(listener, state, shutdown).await
}

/// Serves on an already bound listener.
pub async fn serve_on(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let local = listener.local_addr()?;
    if local.ip().is_unspecified() {
        tracing::warn!(
            listen_addr = %local,
            "metrics endpoint is exposed on all interfaces; restrict listen_addr in untrusted networks"
        );
    }
    tracing::info!(listen_addr = %local, "HTTP endpoint active");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server failed: {}", e))
}
