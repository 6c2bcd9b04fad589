#![cfg(feature = "web-api")]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use databack_core::job::{BackupStatus, ObjectKey};
use databack_core::store::SharedStore;
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::info;

use crate::driver::DriverState;
use crate::gate::Gate;
use crate::module::{Module, ModuleCtx};

#[derive(Clone)]
struct AppState {
    store: SharedStore,
    gate: Arc<Gate>,
    started: Instant,
}

#[derive(Serialize)]
struct Status {
    uptime_ms: u64,
    jobs: usize,
    live_drivers: usize,
}

/// Credentials are left out on purpose.
#[derive(Serialize)]
struct JobView {
    namespace: String,
    name: String,
    enabled: bool,
    start_time: String,
    period_min: i64,
    driver: Option<DriverState>,
    status: Option<BackupStatus>,
}

pub struct WebServer {
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(addr: SocketAddr) -> Self { Self { addr } }
}

impl Module for WebServer {
    fn name(&self) -> &'static str { "web" }

    fn spawn(self: Box<Self>, ctx: ModuleCtx) -> JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move {
            let app = router(ctx.store.clone(), ctx.gate.clone());

            let listener = tokio::net::TcpListener::bind(self.addr).await?;
            info!("web http listening on http://{}", self.addr);

            let mut shutdown = ctx.shutdown.clone();
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown.wait_for(|stop| *stop).await;
                })
                .await?;
            Ok(())
        })
    }
}

fn router(store: SharedStore, gate: Arc<Gate>) -> Router {
    let state = AppState { store, gate, started: Instant::now() };
    Router::new()
        .route("/status", get(status))
        .route("/jobs", get(jobs_list))
        .route("/jobs/:namespace/:name/reconcile", post(jobs_reconcile))
        .with_state(state)
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(Status {
        uptime_ms: state.started.elapsed().as_millis() as u64,
        jobs: state.gate.deps().registry.len(),
        live_drivers: state.gate.live_drivers(),
    })
}

async fn jobs_list(State(state): State<AppState>) -> impl IntoResponse {
    let drivers = state.gate.states().await;
    let mut out = Vec::new();
    for def in state.gate.deps().registry.snapshot() {
        let driver = drivers.iter().find(|(k, _)| k == &def.key).map(|(_, s)| *s);
        let status = state.store.get(&def.key).ok().flatten().map(|o| o.status);
        out.push(JobView {
            namespace: def.key.namespace.clone(),
            name: def.key.name.clone(),
            enabled: def.spec.enable,
            start_time: def.spec.start_time.clone(),
            period_min: def.spec.period,
            driver,
            status,
        });
    }
    Json(out)
}

async fn jobs_reconcile(Path((namespace, name)): Path<(String, String)>, State(state): State<AppState>) -> impl IntoResponse {
    let key = ObjectKey::new(namespace, name);
    match state.gate.reconcile(&key).await {
        Ok(decision) => Json(json!({ "job": key.to_string(), "decision": decision })).into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}
