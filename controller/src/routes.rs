//! Controller HTTP surface.
//!
//! Two producers feed it: the dynamics engine (`PUT /positions`,
//! `PUT /link`) and the node agents (`POST /api/node/*`). The read-side
//! endpoints are typed projections for dashboards; they never mutate.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::error;

use sim_api::{LinkUpdate, NodeInfo, NodeStatus, Snapshot};

use crate::events::EventLog;
use crate::reconciler::Reconciler;
use crate::registry::{self, Registry};
use crate::store::StateStore;

#[derive(Clone)]
pub struct AppState {
    /// Serialises snapshot ingestion: a second snapshot waits for the
    /// first to finish reconciling.
    pub reconciler: Arc<Mutex<Reconciler>>,
    pub store: StateStore,
    pub events: EventLog,
    pub registry: Registry,
    pub latest: Arc<RwLock<Option<Snapshot>>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/positions", put(put_positions).get(get_positions))
        .route("/link", put(put_link))
        .route("/api/node/register", post(register_node))
        .route("/api/node/status", post(node_status))
        .route("/api/nodes", get(get_nodes))
        .route("/api/events", get(get_events))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "satnet-controller",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Snapshot ingest. Returns 200 once the snapshot parsed; per-link
/// outcomes surface through events and link records, not the status code.
async fn put_positions(
    State(state): State<AppState>,
    Json(snapshot): Json<Snapshot>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    *state.latest.write().await = Some(snapshot.clone());

    let mut reconciler = state.reconciler.lock().await;
    match reconciler.apply_snapshot(&snapshot).await {
        Ok(()) => Ok(Json(json!({"status": "OK"}))),
        Err(e) => {
            error!("snapshot reconciliation store failure: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn get_positions(State(state): State<AppState>) -> Json<Snapshot> {
    let latest = state.latest.read().await;
    Json(latest.clone().unwrap_or(Snapshot {
        satellites: vec![],
        ground_stations: vec![],
        vessels: vec![],
        satellite_links: vec![],
        ground_uplinks: vec![],
    }))
}

async fn put_link(
    State(state): State<AppState>,
    Json(update): Json<LinkUpdate>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let mut reconciler = state.reconciler.lock().await;
    match reconciler
        .update_link_state(&update.node1_name, &update.node2_name, update.up, update.delay)
        .await
    {
        Ok(true) => Ok(Json(json!({"status": "OK"}))),
        Ok(false) => Err((
            StatusCode::BAD_REQUEST,
            "Failed to update link state".to_string(),
        )),
        Err(e) => {
            error!("link update store failure: {}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

async fn register_node(
    State(state): State<AppState>,
    Json(info): Json<NodeInfo>,
) -> Json<serde_json::Value> {
    registry::observe_registration(&state.registry, &info.name, info.kind, &info.host).await;
    state
        .events
        .log(&format!("Node registered: {} ({})", info.name, info.kind));
    Json(json!({"status": "OK"}))
}

async fn node_status(
    State(state): State<AppState>,
    Json(status): Json<NodeStatus>,
) -> Json<serde_json::Value> {
    let name = status.name.clone();
    let kind = status.kind;
    if registry::observe_status(&state.registry, status).await {
        state
            .events
            .log(&format!("Auto-registered node: {} ({})", name, kind));
    }
    Json(json!({"status": "OK"}))
}

#[derive(Serialize)]
struct NodeProjection {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    host: String,
    last_seen: i64,
    active: bool,
    loopback_ip: Option<String>,
}

async fn get_nodes(State(state): State<AppState>) -> Json<Vec<NodeProjection>> {
    let observed = state.registry.read().await;
    let mut out = Vec::with_capacity(observed.len());
    for (name, node) in observed.iter() {
        let loopback_ip = state
            .store
            .get_node(name)
            .ok()
            .flatten()
            .and_then(|r| r.loopback_ip);
        out.push(NodeProjection {
            name: name.clone(),
            kind: node.kind.to_string(),
            host: node.host.clone(),
            last_seen: node.last_seen,
            active: node.active,
            loopback_ip,
        });
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Json(out)
}

async fn get_events(State(state): State<AppState>) -> Json<Vec<(String, String)>> {
    Json(state.events.recent(50))
}
