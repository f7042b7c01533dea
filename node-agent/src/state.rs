//! Agent-side node state.
//!
//! One document mirrors everything the controller has programmed into this
//! node: interfaces, links, uplinks, position. The HTTP handlers and the
//! monitor share it behind a single async mutex. All mutations are
//! idempotent — replaying a configuration the node already carries is a
//! success no-op, which is what lets the controller treat reconciliation
//! as its rollback mechanism.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use sim_api::{
    AgentResponse, FrrConfig, InterfaceConfig, InterfaceState, LinkConfig, NeighborLinkState,
    NodeKind, NodePosition, NodeStatus, PositionUpdate, UplinkConfig, UplinkState,
};

use crate::netops;

pub type SharedState = Arc<Mutex<AgentState>>;

pub struct AgentState {
    pub status: NodeStatus,
    /// Skip privileged system calls (tests, unprivileged development).
    pub dry_run: bool,
    pub frr_dir: PathBuf,
    /// Satellite link supernet, used by the station forwarding policy.
    pub link_supernet: String,
}

impl AgentState {
    pub fn new(name: String, kind: NodeKind, frr_dir: PathBuf, link_supernet: String) -> Self {
        Self {
            status: NodeStatus {
                name,
                kind,
                interfaces: Default::default(),
                links: Default::default(),
                uplinks: kind.is_station().then(Vec::new),
                position: NodePosition::default(),
                running: true,
            },
            dry_run: false,
            frr_dir,
            link_supernet,
        }
    }

    pub fn shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    pub async fn apply_interface(&mut self, cfg: InterfaceConfig) -> AgentResponse {
        let existing = self.status.interfaces.get(&cfg.name).cloned();

        if let (Some(ip), Some(prefix_len)) = (cfg.ip.as_deref(), cfg.prefix_len) {
            let unchanged = existing
                .as_ref()
                .map(|e| e.ip == ip && e.prefix_len == prefix_len)
                .unwrap_or(false);

            if !unchanged {
                if !self.dry_run {
                    if let Err(e) = netops::ensure_interface(&cfg.name, ip, prefix_len).await {
                        warn!("interface {} configuration failed: {}", cfg.name, e);
                        return AgentResponse::fail(e.to_string());
                    }
                }
                info!("configured interface {} = {}/{}", cfg.name, ip, prefix_len);
            }

            self.status.interfaces.insert(
                cfg.name.clone(),
                InterfaceState {
                    ip: ip.to_string(),
                    prefix_len,
                    status: existing
                        .as_ref()
                        .map(|e| e.status.clone())
                        .unwrap_or_else(|| "up".to_string()),
                },
            );
        } else if existing.is_none() {
            return AgentResponse::fail(format!("unknown interface {}", cfg.name));
        }

        if let Some(requested) = cfg.status.as_deref() {
            let up = requested == "up";
            let entry = match self.status.interfaces.get_mut(&cfg.name) {
                Some(entry) => entry,
                None => return AgentResponse::fail(format!("unknown interface {}", cfg.name)),
            };

            if entry.status != requested {
                if !self.dry_run {
                    if let Err(e) = netops::set_interface_state(&cfg.name, up).await {
                        warn!("interface {} state change failed: {}", cfg.name, e);
                        return AgentResponse::fail(e.to_string());
                    }
                }
                entry.status = requested.to_string();
                info!("interface {} set {}", cfg.name, requested);
            }
        }

        AgentResponse::ok()
    }

    pub async fn apply_link(&mut self, cfg: LinkConfig) -> AgentResponse {
        let delay_ms = cfg.delay_ms.unwrap_or(0.0);
        let previous = self.status.links.get(&cfg.neighbor);
        let delay_changed = previous.map(|l| l.delay_ms != delay_ms).unwrap_or(true);

        if delay_ms > 0.0 && delay_changed && !self.dry_run {
            if let Err(e) = netops::apply_delay(&cfg.interface, delay_ms).await {
                warn!("delay shaping on {} failed: {}", cfg.interface, e);
                return AgentResponse::fail(e.to_string());
            }
        }

        self.status.links.insert(
            cfg.neighbor.clone(),
            NeighborLinkState {
                local_ip: cfg.local_ip,
                remote_ip: cfg.remote_ip,
                interface: cfg.interface,
                status: "up".to_string(),
                delay_ms,
            },
        );
        AgentResponse::ok()
    }

    pub async fn apply_uplink(&mut self, cfg: UplinkConfig) -> AgentResponse {
        let uplinks = match self.status.uplinks.as_mut() {
            Some(u) => u,
            None => return AgentResponse::fail("not a ground station or vessel"),
        };

        uplinks.retain(|u| u.satellite != cfg.satellite);
        uplinks.push(UplinkState {
            satellite: cfg.satellite.clone(),
            local_ip: cfg.local_ip.clone(),
            remote_ip: cfg.remote_ip.clone(),
            interface: cfg.interface.clone(),
            distance_km: cfg.distance_km,
            delay_ms: cfg.delay_ms,
            default: cfg.default,
        });

        if !self.dry_run {
            let peers: Vec<String> = self
                .status
                .uplinks
                .as_ref()
                .map(|u| u.iter().map(|l| l.remote_ip.clone()).collect())
                .unwrap_or_default();
            if let Err(e) = netops::enforce_station_isolation(&self.link_supernet, &peers).await {
                warn!("forwarding policy update failed: {}", e);
            }

            if cfg.default {
                if let Err(e) = netops::set_default_route(&cfg.remote_ip).await {
                    warn!("default route via {} failed: {}", cfg.remote_ip, e);
                    return AgentResponse::fail(e.to_string());
                }
            }

            if cfg.delay_ms > 0.0 {
                if let Err(e) = netops::apply_delay(&cfg.interface, cfg.delay_ms).await {
                    warn!("delay shaping on {} failed: {}", cfg.interface, e);
                    return AgentResponse::fail(e.to_string());
                }
            }
        }

        info!(
            "uplink to {} via {} (default={})",
            cfg.satellite, cfg.interface, cfg.default
        );
        AgentResponse::ok()
    }

    pub async fn apply_frr(&mut self, cfg: FrrConfig) -> AgentResponse {
        if let Err(e) = netops::write_config_files(&self.frr_dir, &cfg.files) {
            warn!("routing config write failed: {}", e);
            return AgentResponse::fail(e.to_string());
        }
        if !self.dry_run {
            if let Err(e) = netops::reload_frr().await {
                warn!("FRR reload failed: {}", e);
                return AgentResponse::fail(e.to_string());
            }
        }
        info!("replaced {} routing config file(s)", cfg.files.len());
        AgentResponse::ok()
    }

    pub fn apply_position(&mut self, update: PositionUpdate) -> AgentResponse {
        self.status.position = NodePosition {
            lat: update.lat,
            lon: update.lon,
            alt: match self.status.kind {
                NodeKind::Satellite => update.alt,
                _ => None,
            },
        };
        AgentResponse::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station() -> AgentState {
        let mut state = AgentState::new(
            "G_sdg".to_string(),
            NodeKind::GroundStation,
            std::env::temp_dir().join("satnet-frr-test"),
            "10.15.0.0/16".to_string(),
        );
        state.dry_run = true;
        state
    }

    fn satellite() -> AgentState {
        let mut state = AgentState::new(
            "R0_0".to_string(),
            NodeKind::Satellite,
            std::env::temp_dir().join("satnet-frr-test"),
            "10.15.0.0/16".to_string(),
        );
        state.dry_run = true;
        state
    }

    fn intf(name: &str, ip: &str) -> InterfaceConfig {
        InterfaceConfig {
            name: name.to_string(),
            ip: Some(ip.to_string()),
            prefix_len: Some(30),
            status: None,
        }
    }

    #[tokio::test]
    async fn interface_config_is_idempotent() {
        let mut s = satellite();
        assert!(s.apply_interface(intf("R0_0-eth1", "10.15.0.1")).await.success);
        assert!(s.apply_interface(intf("R0_0-eth1", "10.15.0.1")).await.success);
        assert_eq!(s.status.interfaces.len(), 1);
        assert_eq!(s.status.interfaces["R0_0-eth1"].ip, "10.15.0.1");
    }

    #[tokio::test]
    async fn interface_status_toggle() {
        let mut s = satellite();
        s.apply_interface(intf("R0_0-eth1", "10.15.0.1")).await;

        let down = InterfaceConfig {
            name: "R0_0-eth1".to_string(),
            ip: None,
            prefix_len: None,
            status: Some("down".to_string()),
        };
        assert!(s.apply_interface(down).await.success);
        assert_eq!(s.status.interfaces["R0_0-eth1"].status, "down");
    }

    #[tokio::test]
    async fn status_change_on_unknown_interface_fails() {
        let mut s = satellite();
        let r = s
            .apply_interface(InterfaceConfig {
                name: "ghost".to_string(),
                ip: None,
                prefix_len: None,
                status: Some("down".to_string()),
            })
            .await;
        assert!(!r.success);
    }

    #[tokio::test]
    async fn uplink_replaces_same_satellite() {
        let mut s = station();
        let mk = |delay: f64| UplinkConfig {
            satellite: "R0_0".to_string(),
            local_ip: "10.15.1.1".to_string(),
            remote_ip: "10.15.1.2".to_string(),
            interface: "G_sdg-eth1".to_string(),
            distance_km: 900.0,
            delay_ms: delay,
            default: true,
        };
        s.apply_uplink(mk(4.0)).await;
        s.apply_uplink(mk(4.2)).await;

        let uplinks = s.status.uplinks.as_ref().unwrap();
        assert_eq!(uplinks.len(), 1);
        assert_eq!(uplinks[0].delay_ms, 4.2);
    }

    #[tokio::test]
    async fn satellite_rejects_uplinks() {
        let mut s = satellite();
        let r = s
            .apply_uplink(UplinkConfig {
                satellite: "R0_1".to_string(),
                local_ip: "10.15.1.1".to_string(),
                remote_ip: "10.15.1.2".to_string(),
                interface: "R0_0-eth5".to_string(),
                distance_km: 0.0,
                delay_ms: 0.0,
                default: false,
            })
            .await;
        assert!(!r.success);
    }

    #[tokio::test]
    async fn position_altitude_only_for_satellites() {
        let mut sat = satellite();
        sat.apply_position(PositionUpdate {
            lat: 1.0,
            lon: 2.0,
            alt: Some(550.0),
        });
        assert_eq!(sat.status.position.alt, Some(550.0));

        let mut gs = station();
        gs.apply_position(PositionUpdate {
            lat: 1.0,
            lon: 2.0,
            alt: Some(550.0),
        });
        assert_eq!(gs.status.position.alt, None);
    }
}
