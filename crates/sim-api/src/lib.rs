//! Wire types for the topology control plane.
//!
//! Three parties speak these: the dynamics engine (producer of snapshots),
//! the controller (consumer of snapshots, client of node agents), and the
//! node agents (servers for the per-node configuration RPCs). Field names
//! are the JSON contract; do not rename without versioning the API.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Node variant tag as it appears on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Satellite,
    GroundStation,
    Vessel,
}

impl NodeKind {
    pub fn is_station(&self) -> bool {
        matches!(self, NodeKind::GroundStation | NodeKind::Vessel)
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeKind::Satellite => "satellite",
            NodeKind::GroundStation => "ground_station",
            NodeKind::Vessel => "vessel",
        };
        f.write_str(s)
    }
}

// ---- Snapshot (dynamics → controller) ----

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SatellitePosition {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    /// Altitude above the surface in km.
    pub height: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroundStationPosition {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VesselPosition {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

/// Desired state of one inter-satellite link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkState {
    pub node1_name: String,
    pub node2_name: String,
    pub up: bool,
    pub delay: f64,
}

/// One candidate uplink from a station to a satellite.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpLink {
    pub sat_node: String,
    /// Slant range in whole km.
    pub distance: i64,
    pub delay: f64,
}

/// All candidate uplinks for one ground station or vessel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpLinks {
    pub ground_node: String,
    pub uplinks: Vec<UpLink>,
}

/// The full desired topology for one tick. Always complete, never a diff;
/// a dropped snapshot costs nothing but latency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub satellites: Vec<SatellitePosition>,
    pub ground_stations: Vec<GroundStationPosition>,
    pub vessels: Vec<VesselPosition>,
    pub satellite_links: Vec<LinkState>,
    pub ground_uplinks: Vec<UpLinks>,
}

// ---- Controller API bodies ----

/// Manual link override (`PUT /link`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkUpdate {
    pub node1_name: String,
    pub node2_name: String,
    pub up: bool,
    pub delay: Option<f64>,
}

/// Agent registration (`POST /api/node/register`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InterfaceState {
    pub ip: String,
    pub prefix_len: u8,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighborLinkState {
    pub local_ip: String,
    pub remote_ip: String,
    pub interface: String,
    pub status: String,
    pub delay_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UplinkState {
    pub satellite: String,
    pub local_ip: String,
    pub remote_ip: String,
    pub interface: String,
    pub distance_km: f64,
    pub delay_ms: f64,
    pub default: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct NodePosition {
    pub lat: f64,
    pub lon: f64,
    pub alt: Option<f64>,
}

/// Full node state document (`POST /api/node/status`, `GET /status`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub interfaces: HashMap<String, InterfaceState>,
    pub links: HashMap<String, NeighborLinkState>,
    pub uplinks: Option<Vec<UplinkState>>,
    pub position: NodePosition,
    pub running: bool,
}

// ---- Agent RPC bodies (controller → agent) ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub name: String,
    pub ip: Option<String>,
    pub prefix_len: Option<u8>,
    /// "up" or "down"; omitted means leave administrative state alone.
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    pub neighbor: String,
    pub local_ip: String,
    pub remote_ip: String,
    pub interface: String,
    pub delay_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UplinkConfig {
    pub satellite: String,
    pub local_ip: String,
    pub remote_ip: String,
    pub interface: String,
    pub distance_km: f64,
    pub delay_ms: f64,
    pub default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrrConfig {
    /// filename → full file content; replaced atomically, then reloaded.
    pub files: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub lat: f64,
    pub lon: f64,
    pub alt: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub success: bool,
    pub output: String,
    pub error: String,
    pub return_code: i32,
}

/// Uniform agent reply. Every config endpoint is idempotent: re-applying
/// an already-applied configuration succeeds without side effects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_json_field_names() {
        let snap = Snapshot {
            satellites: vec![SatellitePosition {
                name: "R0_0".into(),
                lat: 1.5,
                lon: -3.25,
                height: 550.0,
            }],
            ground_stations: vec![GroundStationPosition {
                name: "G_sdg".into(),
                lat: 32.7,
                lon: -117.2,
            }],
            vessels: vec![],
            satellite_links: vec![LinkState {
                node1_name: "R0_0".into(),
                node2_name: "R0_1".into(),
                up: true,
                delay: 9.354,
            }],
            ground_uplinks: vec![UpLinks {
                ground_node: "G_sdg".into(),
                uplinks: vec![UpLink {
                    sat_node: "R0_0".into(),
                    distance: 1042,
                    delay: 4.476,
                }],
            }],
        };

        let v: serde_json::Value = serde_json::from_str(&serde_json::to_string(&snap).unwrap()).unwrap();
        assert_eq!(v["satellites"][0]["height"], 550.0);
        assert_eq!(v["satellite_links"][0]["node1_name"], "R0_0");
        assert_eq!(v["ground_uplinks"][0]["uplinks"][0]["sat_node"], "R0_0");

        let back: Snapshot = serde_json::from_value(v).unwrap();
        assert_eq!(back, snap);
    }

    #[test]
    fn node_kind_wire_tags() {
        assert_eq!(
            serde_json::to_string(&NodeKind::GroundStation).unwrap(),
            "\"ground_station\""
        );
        let k: NodeKind = serde_json::from_str("\"vessel\"").unwrap();
        assert_eq!(k, NodeKind::Vessel);
    }

    #[test]
    fn node_info_type_field() {
        let info = NodeInfo {
            name: "G_sdg".into(),
            kind: NodeKind::GroundStation,
            host: "g_sdg".into(),
        };
        let v: serde_json::Value = serde_json::from_str(&serde_json::to_string(&info).unwrap()).unwrap();
        assert_eq!(v["type"], "ground_station");
    }
}
