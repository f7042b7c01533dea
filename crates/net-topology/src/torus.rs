//! R×N torus constructor.
//!
//! Satellites are laid out in `rings` orbital planes of `ring_nodes`
//! satellites each, named `R{ring}_{slot}`. Every satellite links to its
//! intra-ring successor and to the same slot in the next ring; the latter
//! edges are tagged `inter_ring` and are the ones that drop near the
//! latitude turnaround. Ground stations and vessels join disconnected —
//! their connectivity is uplinks, discovered at runtime.

use chrono::NaiveDateTime;
use orbital_mechanics::OrbitSpec;

use crate::graph::{NetGraph, Node, NodeVariant};
use crate::Result;

/// Synthetic NORAD ids start here; one per satellite in layout order.
const NORAD_BASE: u32 = 70001;

#[allow(clippy::too_many_arguments)]
pub fn create_network(
    rings: u32,
    ring_nodes: u32,
    ground_stations: bool,
    ground_table: &[(String, f64, f64)],
    vessel_table: &[(String, Vec<(f64, f64)>)],
    inclination_deg: f64,
    altitude_km: f64,
    epoch: NaiveDateTime,
) -> Result<NetGraph> {
    let mut graph = NetGraph::new();
    graph.rings = rings;
    graph.ring_nodes = ring_nodes;
    graph.inclination_deg = inclination_deg;
    graph.altitude_km = altitude_km;

    // Planes spread evenly in right ascension, slots evenly in mean anomaly.
    let raan_spacing = 360.0 / rings as f64;
    let ma_spacing = 360.0 / ring_nodes as f64;

    for ring in 0..rings {
        for slot in 0..ring_nodes {
            let orbit = OrbitSpec {
                inclination_deg,
                altitude_km,
                right_ascension_deg: ring as f64 * raan_spacing,
                mean_anomaly_deg: slot as f64 * ma_spacing,
                epoch,
                norad_id: NORAD_BASE + ring * ring_nodes + slot,
            };
            graph.add_node(Node::new(
                sat_name(ring, slot),
                NodeVariant::Satellite { orbit, ring, slot },
            ))?;
        }
    }

    // Intra-ring: each satellite to its successor slot. A single-slot ring
    // has no intra-ring links (no self loops).
    if ring_nodes > 1 {
        for ring in 0..rings {
            for slot in 0..ring_nodes {
                graph.add_edge(
                    &sat_name(ring, slot),
                    &sat_name(ring, (slot + 1) % ring_nodes),
                    false,
                )?;
            }
        }
    }

    // Inter-ring: same slot, next ring. With two rings this yields a pair
    // of parallel links per slot, which the graph keeps distinct.
    if rings > 1 {
        for ring in 0..rings {
            for slot in 0..ring_nodes {
                graph.add_edge(
                    &sat_name(ring, slot),
                    &sat_name((ring + 1) % rings, slot),
                    true,
                )?;
            }
        }
    }

    if ground_stations {
        for (name, lat, lon) in ground_table {
            graph.add_node(Node::new(
                name.clone(),
                NodeVariant::Ground {
                    lat: *lat,
                    lon: *lon,
                },
            ))?;
        }
    }

    for (name, waypoints) in vessel_table {
        graph.add_node(Node::new(
            name.clone(),
            NodeVariant::Vessel {
                waypoints: waypoints.clone(),
            },
        ))?;
    }

    Ok(graph)
}

pub fn sat_name(ring: u32, slot: u32) -> String {
    format!("R{}_{}", ring, slot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn epoch() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn two_by_two_torus_shape() {
        let g = create_network(2, 2, false, &[], &[], 53.9, 550.0, epoch()).unwrap();

        assert_eq!(g.satellites().count(), 4);
        assert_eq!(g.edge_count(), 8);
        assert_eq!(g.edges().filter(|e| e.inter_ring).count(), 4);

        // Every satellite carries four incident edges in a torus.
        for sat in g.satellites() {
            assert_eq!(sat.neighbors.len(), 4, "degree of {}", sat.name);
        }
    }

    #[test]
    fn four_by_four_torus_shape() {
        let g = create_network(4, 4, false, &[], &[], 53.9, 550.0, epoch()).unwrap();
        assert_eq!(g.satellites().count(), 16);
        // 16 intra-ring + 16 inter-ring
        assert_eq!(g.edge_count(), 32);
        assert_eq!(g.edges().filter(|e| e.inter_ring).count(), 16);
    }

    #[test]
    fn orbital_elements_spread() {
        let g = create_network(4, 4, false, &[], &[], 53.9, 550.0, epoch()).unwrap();

        let orbit = |name: &str| match &g.node(name).unwrap().variant {
            NodeVariant::Satellite { orbit, .. } => *orbit,
            _ => unreachable!(),
        };

        assert_eq!(orbit("R0_0").right_ascension_deg, 0.0);
        assert_eq!(orbit("R1_0").right_ascension_deg, 90.0);
        assert_eq!(orbit("R3_0").right_ascension_deg, 270.0);
        assert_eq!(orbit("R0_1").mean_anomaly_deg, 90.0);
        assert_eq!(orbit("R0_3").mean_anomaly_deg, 270.0);
        assert_eq!(orbit("R2_2").norad_id, NORAD_BASE + 2 * 4 + 2);
    }

    #[test]
    fn stations_join_disconnected() {
        let grounds = vec![("G_sdg".to_string(), 32.7, -117.2)];
        let vessels = vec![("V_one".to_string(), vec![(10.0, 20.0), (12.0, 24.0)])];
        let g = create_network(2, 2, true, &grounds, &vessels, 53.9, 550.0, epoch()).unwrap();

        assert_eq!(g.ground_stations().count(), 1);
        assert_eq!(g.vessels().count(), 1);
        assert!(g.node("G_sdg").unwrap().neighbors.is_empty());
        assert!(g.node("V_one").unwrap().neighbors.is_empty());
    }

    #[test]
    fn ground_table_ignored_when_disabled() {
        let grounds = vec![("G_sdg".to_string(), 32.7, -117.2)];
        let g = create_network(2, 2, false, &grounds, &[], 53.9, 550.0, epoch()).unwrap();
        assert!(g.node("G_sdg").is_none());
    }
}
