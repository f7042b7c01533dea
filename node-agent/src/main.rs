//! Node agent.
//!
//! Runs inside every satellite, ground-station, and vessel sandbox. The
//! controller is the sole client of the HTTP surface; the agent's own
//! outbound traffic is registration and the periodic status document.

use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sim_api::{
    AgentResponse, ExecuteRequest, ExecuteResponse, FrrConfig, InterfaceConfig, LinkConfig,
    NodeInfo, NodeKind, NodeStatus, PositionUpdate, UplinkConfig,
};

mod monitor;
mod netops;
mod state;

use state::{AgentState, SharedState};

const AGENT_PORT: u16 = 5000;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "satnet_node_agent=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let name = std::env::var("NODE_NAME").unwrap_or_else(|_| hostname());
    let kind = match std::env::var("NODE_TYPE").as_deref() {
        Ok("ground_station") => NodeKind::GroundStation,
        Ok("vessel") => NodeKind::Vessel,
        _ => NodeKind::Satellite,
    };
    let controller_url =
        std::env::var("CONTROLLER_URL").unwrap_or_else(|_| "http://controller:8000".to_string());
    let frr_dir = std::env::var("FRR_DIR").unwrap_or_else(|_| "/etc/frr".to_string());
    let link_supernet =
        std::env::var("BASE_SUBNET").unwrap_or_else(|_| "10.15.0.0/16".to_string());

    let mut agent = AgentState::new(name.clone(), kind, frr_dir.into(), link_supernet);
    agent.dry_run = std::env::var("AGENT_DRY_RUN").map(|v| v == "1").unwrap_or(false);
    let state = agent.shared();

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;

    register_with_controller(&client, &controller_url, &name, kind).await;

    tokio::spawn(monitor::run(
        state.clone(),
        controller_url.clone(),
        client.clone(),
    ));

    let app = Router::new()
        .route("/config/interface", post(config_interface))
        .route("/config/link", post(config_link))
        .route("/config/uplink", post(config_uplink))
        .route("/config/frr", post(config_frr))
        .route("/config/position", post(config_position))
        .route("/execute", post(execute))
        .route("/shutdown", post(shutdown))
        .route("/status", get(status))
        .with_state(state);

    let addr = format!("0.0.0.0:{}", AGENT_PORT);
    info!("Node agent {} ({}) listening on {}", name, kind, addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn hostname() -> String {
    std::fs::read_to_string("/etc/hostname")
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "node".to_string())
}

/// Registration with bounded retries; the controller may come up after us.
async fn register_with_controller(
    client: &reqwest::Client,
    controller_url: &str,
    name: &str,
    kind: NodeKind,
) {
    let info = NodeInfo {
        name: name.to_string(),
        kind,
        host: hostname(),
    };
    let url = format!("{}/api/node/register", controller_url);

    for attempt in 1..=5 {
        match client.post(&url).json(&info).send().await {
            Ok(_) => {
                info!("registered with controller as {}", name);
                return;
            }
            Err(e) => {
                warn!("controller not available ({}), attempt {}/5", e, attempt);
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
    warn!("registration gave up; relying on status auto-registration");
}

// ---- Handlers ----

async fn config_interface(
    State(state): State<SharedState>,
    Json(cfg): Json<InterfaceConfig>,
) -> Json<AgentResponse> {
    Json(state.lock().await.apply_interface(cfg).await)
}

async fn config_link(
    State(state): State<SharedState>,
    Json(cfg): Json<LinkConfig>,
) -> Json<AgentResponse> {
    Json(state.lock().await.apply_link(cfg).await)
}

async fn config_uplink(
    State(state): State<SharedState>,
    Json(cfg): Json<UplinkConfig>,
) -> Json<AgentResponse> {
    Json(state.lock().await.apply_uplink(cfg).await)
}

async fn config_frr(
    State(state): State<SharedState>,
    Json(cfg): Json<FrrConfig>,
) -> Json<AgentResponse> {
    Json(state.lock().await.apply_frr(cfg).await)
}

async fn config_position(
    State(state): State<SharedState>,
    Json(update): Json<PositionUpdate>,
) -> Json<AgentResponse> {
    Json(state.lock().await.apply_position(update))
}

async fn execute(
    State(state): State<SharedState>,
    Json(req): Json<ExecuteRequest>,
) -> Json<ExecuteResponse> {
    // Diagnostics do not touch node state; only the dry-run flag matters.
    let dry_run = state.lock().await.dry_run;
    if dry_run {
        return Json(ExecuteResponse {
            success: true,
            output: String::new(),
            error: String::new(),
            return_code: 0,
        });
    }

    match netops::execute_diagnostic(&req.command).await {
        Ok((success, output, error, return_code)) => Json(ExecuteResponse {
            success,
            output,
            error,
            return_code,
        }),
        Err(e) => Json(ExecuteResponse {
            success: false,
            output: String::new(),
            error: e.to_string(),
            return_code: -1,
        }),
    }
}

async fn shutdown(State(state): State<SharedState>) -> Json<AgentResponse> {
    let mut guard = state.lock().await;
    guard.status.running = false;
    info!("shutdown requested");
    Json(AgentResponse::ok())
}

async fn status(State(state): State<SharedState>) -> Json<NodeStatus> {
    Json(state.lock().await.status.clone())
}
