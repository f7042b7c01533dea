//! Observed-node registry and liveness sweeper.
//!
//! Agents declare themselves via `register` and refresh via periodic
//! status documents. The sweeper marks nodes inactive once their
//! `last_seen` ages past the threshold and snapshots fleet statistics
//! into the store. Inactivity never tears links down — a node that went
//! quiet usually comes back, and the routing protocol handles the gap.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::RwLock;

use sim_api::{NodeKind, NodeStatus};

use crate::events::EventLog;
use crate::store::StateStore;

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);
pub const INACTIVE_AFTER_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub struct ObservedNode {
    pub kind: NodeKind,
    pub host: String,
    pub last_seen: i64,
    pub active: bool,
    pub status: Option<NodeStatus>,
}

pub type Registry = Arc<RwLock<HashMap<String, ObservedNode>>>;

pub fn new_registry() -> Registry {
    Arc::new(RwLock::new(HashMap::new()))
}

pub async fn observe_registration(registry: &Registry, name: &str, kind: NodeKind, host: &str) {
    let mut nodes = registry.write().await;
    nodes.insert(
        name.to_string(),
        ObservedNode {
            kind,
            host: host.to_string(),
            last_seen: Utc::now().timestamp(),
            active: true,
            status: None,
        },
    );
}

/// Status documents auto-register unknown nodes; a node the controller
/// never saw register may simply have beaten it to the network.
pub async fn observe_status(registry: &Registry, status: NodeStatus) -> bool {
    let mut nodes = registry.write().await;
    let newly_registered = !nodes.contains_key(&status.name);
    let entry = nodes
        .entry(status.name.clone())
        .or_insert_with(|| ObservedNode {
            kind: status.kind,
            host: "auto-registered".to_string(),
            last_seen: 0,
            active: true,
            status: None,
        });
    entry.last_seen = Utc::now().timestamp();
    entry.active = true;
    entry.status = Some(status);
    newly_registered
}

pub async fn run_sweeper(registry: Registry, store: StateStore, events: EventLog) {
    loop {
        tokio::time::sleep(SWEEP_INTERVAL).await;

        let now = Utc::now().timestamp();
        let mut newly_inactive = Vec::new();
        let mut counts = (0usize, 0usize, 0usize, 0usize); // total, sats, grounds, vessels
        let mut active = 0usize;

        {
            let mut nodes = registry.write().await;
            for (name, node) in nodes.iter_mut() {
                counts.0 += 1;
                match node.kind {
                    NodeKind::Satellite => counts.1 += 1,
                    NodeKind::GroundStation => counts.2 += 1,
                    NodeKind::Vessel => counts.3 += 1,
                }

                let alive = now - node.last_seen <= INACTIVE_AFTER_SECS;
                if !alive && node.active {
                    newly_inactive.push(name.clone());
                }
                node.active = alive;
                if alive {
                    active += 1;
                }
            }
        }

        if !newly_inactive.is_empty() {
            events.log(&format!(
                "Inactive nodes detected: {}",
                newly_inactive.join(", ")
            ));
        }

        let stats = json!({
            "timestamp": now,
            "total_nodes": counts.0,
            "active_nodes": active,
            "satellite_count": counts.1,
            "ground_station_count": counts.2,
            "vessel_count": counts.3,
        });
        if let Err(e) = store.append_stats(&stats) {
            tracing::error!("stats persistence failed: {}", e);
        }
    }
}
