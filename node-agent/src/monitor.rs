//! Background monitor.
//!
//! Every cycle: ping each configured neighbour to refresh per-link status,
//! check FRR daemon liveness, and push the full node document upstream.
//! The controller uses the document both as a liveness signal and as its
//! observed view of this node.

use std::time::Duration;

use tracing::{debug, warn};

use crate::state::SharedState;

const CYCLE: Duration = Duration::from_secs(10);
const FRR_SERVICES: [&str; 3] = ["zebra", "ospfd", "staticd"];

pub async fn run(state: SharedState, controller_url: String, client: reqwest::Client) {
    loop {
        let (running, dry_run, targets) = {
            let guard = state.lock().await;
            let targets: Vec<(String, String)> = guard
                .status
                .links
                .iter()
                .map(|(neighbor, link)| (neighbor.clone(), link.remote_ip.clone()))
                .collect();
            (guard.status.running, guard.dry_run, targets)
        };

        if !running {
            debug!("monitor stopping: agent shut down");
            return;
        }

        // Probe neighbours without holding the state lock.
        let mut results = Vec::with_capacity(targets.len());
        for (neighbor, remote_ip) in targets {
            let reachable = if dry_run {
                true
            } else {
                match crate::netops::ping(&remote_ip).await {
                    Ok(rtt) => {
                        debug!("ping {} ({}): {:.2} ms", neighbor, remote_ip, rtt);
                        true
                    }
                    Err(e) => {
                        debug!("ping {} failed: {}", neighbor, e);
                        false
                    }
                }
            };
            results.push((neighbor, reachable));
        }

        for service in FRR_SERVICES {
            if !dry_run && !crate::netops::frr_service_alive(service) {
                warn!("FRR service {} not running", service);
            }
        }

        let document = {
            let mut guard = state.lock().await;
            for (neighbor, reachable) in results {
                if let Some(link) = guard.status.links.get_mut(&neighbor) {
                    link.status = if reachable { "up" } else { "down" }.to_string();
                }
            }
            guard.status.clone()
        };

        let url = format!("{}/api/node/status", controller_url);
        if let Err(e) = client.post(&url).json(&document).send().await {
            warn!("status report failed: {}", e);
        }

        tokio::time::sleep(CYCLE).await;
    }
}
