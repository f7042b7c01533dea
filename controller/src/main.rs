//! Topology controller service.
//!
//! Loads the network description, annotates the topology with addresses
//! and routing configuration, provisions the fleet, and then reconciles
//! every dynamics snapshot against the persisted link state.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{Mutex, RwLock};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use net_topology::addressing::{DEFAULT_LINK_SUPERNET, DEFAULT_LOOPBACK_SUPERNET};
use net_topology::{annotate_graph, parse_network_config, AddressPools};

mod agent_rpc;
mod events;
mod reconciler;
mod registry;
mod routes;
mod store;

use agent_rpc::HttpAgentRpc;
use events::EventLog;
use reconciler::Reconciler;
use routes::AppState;
use store::StateStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "satnet_controller=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_file =
        std::env::var("CONFIG_FILE").unwrap_or_else(|_| "configs/small.net".to_string());
    let state_dir = std::env::var("STATE_DIR").unwrap_or_else(|_| "state".to_string());
    let port = std::env::var("CONTROLLER_PORT").unwrap_or_else(|_| "8000".to_string());

    let loopback_subnet = std::env::var("LOOPBACK_SUBNET")
        .unwrap_or_else(|_| DEFAULT_LOOPBACK_SUPERNET.to_string());
    let link_subnet =
        std::env::var("BASE_SUBNET").unwrap_or_else(|_| DEFAULT_LINK_SUPERNET.to_string());
    let pools = AddressPools::from_strs(&loopback_subnet, &link_subnet)
        .context("parsing LOOPBACK_SUBNET/BASE_SUBNET")?;

    let raw = std::fs::read_to_string(&config_file)
        .with_context(|| format!("reading config file {}", config_file))?;
    let config = parse_network_config(&raw)?;

    let mut graph = config
        .build_graph(chrono::Utc::now().naive_utc())
        .context("building topology graph")?;
    annotate_graph(&mut graph, &pools)?;

    info!(
        "Loaded network configuration: {} rings, {} routers per ring; {} nodes, {} edges",
        config.rings,
        config.routers,
        graph.nodes().count(),
        graph.edge_count(),
    );

    let store = StateStore::open(&state_dir).context("opening state store")?;
    let events = EventLog::new(store.clone());
    let rpc = Arc::new(HttpAgentRpc::new()?);

    let mut reconciler = Reconciler::new(graph, pools, store.clone(), rpc, events.clone())?;
    reconciler.provision().await?;

    let registry = registry::new_registry();
    tokio::spawn(registry::run_sweeper(
        registry.clone(),
        store.clone(),
        events.clone(),
    ));

    let state = AppState {
        reconciler: Arc::new(Mutex::new(reconciler)),
        store,
        events,
        registry,
        latest: Arc::new(RwLock::new(None)),
    };

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", port);
    info!("Topology controller listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
