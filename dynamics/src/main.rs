//! Dynamics engine service.
//!
//! Advances the orbital/mobility simulation one fixed time-slice at a
//! time, evaluates the feasible topology, and pushes the resulting
//! snapshot to the controller. The loop tracks wall-clock: each tick is
//! computed for `now + slice` and the loop sleeps until that instant, so
//! the emulated constellation moves in real time.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use net_topology::{parse_network_config, NetworkConfig};
use sim_api::Snapshot;

mod evaluator;
mod mobility;

use evaluator::DynamicsEngine;

/// Simulated seconds per tick.
const TIME_SLICE_SECS: i64 = 10;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "satnet_dynamics=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_file =
        std::env::var("CONFIG_FILE").unwrap_or_else(|_| "configs/small.net".to_string());
    let controller_url =
        std::env::var("CONTROLLER_URL").unwrap_or_else(|_| "http://controller:8000".to_string());

    let config = load_config(&config_file)?;
    let min_elevation = std::env::var("MIN_ELEVATION")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(config.min_elevation_deg);

    info!(
        "Loaded network configuration: {} rings, {} routers per ring, {} grounds, {} vessels",
        config.rings,
        config.routers,
        config.ground_table.len(),
        config.vessel_table.len(),
    );

    let graph = config
        .build_graph(Utc::now().naive_utc())
        .context("building topology graph")?;
    info!(
        "Topology: {} satellites, {} edges ({} inter-ring)",
        graph.satellites().count(),
        graph.edge_count(),
        graph.edges().filter(|e| e.inter_ring).count(),
    );

    let engine = DynamicsEngine::new(graph, min_elevation);
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;

    run_simulation(engine, client, &controller_url).await;
    Ok(())
}

fn load_config(path: &str) -> Result<NetworkConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path))?;
    Ok(parse_network_config(&raw)?)
}

/// The tick loop. Strictly sequential: a tick never overlaps the next, and
/// a failed snapshot POST is dropped — the next snapshot is complete, so
/// the controller converges without replay.
async fn run_simulation(mut engine: DynamicsEngine, client: reqwest::Client, controller_url: &str) {
    let slice = ChronoDuration::seconds(TIME_SLICE_SECS);
    let mut current_time = Utc::now();

    loop {
        let future_time = current_time + slice;
        info!("Simulating positions for {}", future_time);

        let snapshot = engine.tick(future_time);
        post_snapshot(&client, controller_url, &snapshot).await;

        if !sleep_until(future_time).await {
            info!("Simulation stopped");
            return;
        }
        current_time = future_time;
    }
}

async fn post_snapshot(client: &reqwest::Client, controller_url: &str, snapshot: &Snapshot) {
    let url = format!("{}/positions", controller_url);
    match client.put(&url).json(snapshot).send().await {
        Ok(response) => {
            info!("Sent position update to controller: {}", response.status());
        }
        Err(e) => {
            error!("Failed to send update to controller: {}", e);
        }
    }
}

/// Sleep until the wall-clock deadline; warns and returns immediately when
/// the tick computation overran. Returns false on shutdown signal.
async fn sleep_until(deadline: DateTime<Utc>) -> bool {
    let remaining = deadline.signed_duration_since(Utc::now());
    match remaining.to_std() {
        Ok(wait) => {
            tokio::select! {
                _ = tokio::time::sleep(wait) => true,
                _ = tokio::signal::ctrl_c() => false,
            }
        }
        Err(_) => {
            warn!(
                "Tick overran its slice by {} ms; skipping sleep",
                -remaining.num_milliseconds()
            );
            true
        }
    }
}
