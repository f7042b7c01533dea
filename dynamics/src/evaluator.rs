//! Visibility & link evaluation.
//!
//! Owns the per-tick kinematic state: propagated satellite positions,
//! vessel tracks, and the inter-plane capability flag per satellite. Each
//! tick produces a complete `Snapshot` — ISL up/down + delay for every
//! edge, and the candidate uplink set per ground station and vessel.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use net_topology::graph::{NetGraph, NodeVariant};
use orbital_mechanics::{
    link_delay_ms, look_angles, propagation, transforms, GeodeticPosition, OrbitSpec,
};
use sim_api::{
    GroundStationPosition, LinkState, SatellitePosition, Snapshot, UpLink, UpLinks,
    VesselPosition,
};

use crate::mobility::VesselTrack;

/// Margin below the inclination beyond which cross-plane links cannot be
/// maintained (degrees).
const INTER_PLANE_MARGIN_DEG: f64 = 2.0;

/// Coarse pre-filter half-width for uplink candidacy (degrees).
const NEARBY_DEG: f64 = 20.0;

#[derive(Debug, Clone)]
struct SatelliteTrack {
    name: String,
    orbit: OrbitSpec,
    lat: f64,
    lon: f64,
    height_km: f64,
    inter_plane_ok: bool,
    prev_inter_plane_ok: bool,
}

#[derive(Debug, Clone)]
struct GroundTrack {
    name: String,
    lat: f64,
    lon: f64,
}

pub struct DynamicsEngine {
    graph: NetGraph,
    min_elevation_deg: f64,
    satellites: Vec<SatelliteTrack>,
    grounds: Vec<GroundTrack>,
    vessels: Vec<VesselTrack>,
}

impl DynamicsEngine {
    pub fn new(graph: NetGraph, min_elevation_deg: f64) -> Self {
        let mut satellites = Vec::new();
        let mut grounds = Vec::new();
        let mut vessels = Vec::new();

        for node in graph.nodes() {
            match &node.variant {
                NodeVariant::Satellite { orbit, .. } => satellites.push(SatelliteTrack {
                    name: node.name.clone(),
                    orbit: *orbit,
                    lat: 0.0,
                    lon: 0.0,
                    height_km: orbit.altitude_km,
                    inter_plane_ok: true,
                    prev_inter_plane_ok: true,
                }),
                NodeVariant::Ground { lat, lon } => grounds.push(GroundTrack {
                    name: node.name.clone(),
                    lat: *lat,
                    lon: *lon,
                }),
                NodeVariant::Vessel { waypoints } => {
                    vessels.push(VesselTrack::new(&node.name, waypoints.clone()))
                }
            }
        }

        Self {
            graph,
            min_elevation_deg,
            satellites,
            grounds,
            vessels,
        }
    }

    /// Advance kinematics to `time` and derive the desired topology.
    pub fn tick(&mut self, time: DateTime<Utc>) -> Snapshot {
        self.propagate_to(time);
        for vessel in &mut self.vessels {
            vessel.update_position();
        }
        self.evaluate()
    }

    /// Propagate every satellite to `time`. A satellite whose propagation
    /// fails keeps its previous position for this tick.
    fn propagate_to(&mut self, time: DateTime<Utc>) {
        for sat in &mut self.satellites {
            match propagation::ground_track(&sat.orbit, time) {
                Ok(pos) => {
                    sat.lat = pos.latitude;
                    sat.lon = pos.longitude;
                    sat.height_km = pos.altitude_km;
                }
                Err(e) => warn!("propagation failed for {}: {}", sat.name, e),
            }
        }
    }

    /// Evaluate link and uplink state from the currently stored positions.
    fn evaluate(&mut self) -> Snapshot {
        self.update_inter_plane_flags();

        Snapshot {
            satellites: self
                .satellites
                .iter()
                .map(|s| SatellitePosition {
                    name: s.name.clone(),
                    lat: s.lat,
                    lon: s.lon,
                    height: s.height_km,
                })
                .collect(),
            ground_stations: self
                .grounds
                .iter()
                .map(|g| GroundStationPosition {
                    name: g.name.clone(),
                    lat: g.lat,
                    lon: g.lon,
                })
                .collect(),
            vessels: self
                .vessels
                .iter()
                .map(|v| VesselPosition {
                    name: v.name.clone(),
                    lat: v.lat,
                    lon: v.lon,
                })
                .collect(),
            satellite_links: self.evaluate_isls(),
            ground_uplinks: self.evaluate_uplinks(),
        }
    }

    /// A satellite can hold cross-plane links only while strictly below
    /// the latitude turnaround band.
    fn update_inter_plane_flags(&mut self) {
        let cutoff = self.graph.inclination_deg - INTER_PLANE_MARGIN_DEG;
        for sat in &mut self.satellites {
            sat.prev_inter_plane_ok = sat.inter_plane_ok;
            sat.inter_plane_ok = sat.lat.abs() < cutoff;
            if sat.inter_plane_ok != sat.prev_inter_plane_ok {
                info!(
                    "{} inter-plane links {} (lat {:.2}°)",
                    sat.name,
                    if sat.inter_plane_ok { "restored" } else { "suspended" },
                    sat.lat,
                );
            }
        }
    }

    fn evaluate_isls(&self) -> Vec<LinkState> {
        let mut links = Vec::with_capacity(self.graph.edge_count());

        for edge in self.graph.edges() {
            let sat1 = self.satellite(&edge.node1);
            let sat2 = self.satellite(&edge.node2);
            let (sat1, sat2) = match (sat1, sat2) {
                (Some(a), Some(b)) => (a, b),
                _ => continue,
            };

            let up = if edge.inter_ring {
                sat1.inter_plane_ok && sat2.inter_plane_ok
            } else {
                true
            };

            let distance_km = transforms::chord_distance_km(&sat1.position(), &sat2.position());
            let delay = link_delay_ms(distance_km);
            debug!(
                "ISL {} ↔ {}: up={} dist={:.0}km delay={}ms",
                edge.node1, edge.node2, up, distance_km, delay
            );

            links.push(LinkState {
                node1_name: edge.node1.clone(),
                node2_name: edge.node2.clone(),
                up,
                delay,
            });
        }

        links
    }

    fn evaluate_uplinks(&self) -> Vec<UpLinks> {
        let mut all = Vec::new();

        let stations = self
            .grounds
            .iter()
            .map(|g| (g.name.clone(), g.lat, g.lon))
            .chain(self.vessels.iter().map(|v| (v.name.clone(), v.lat, v.lon)));

        for (name, lat, lon) in stations {
            let observer = GeodeticPosition::surface(lat, lon);
            let mut candidates = Vec::new();

            for sat in &self.satellites {
                if !nearby(lat, lon, sat.lat, sat.lon) {
                    continue;
                }

                let angles = look_angles(&observer, &sat.position());
                if angles.elevation_deg > self.min_elevation_deg {
                    let delay = link_delay_ms(angles.range_km);
                    debug!(
                        "uplink candidate {} → {}: el={:.1}° range={:.0}km delay={}ms",
                        name, sat.name, angles.elevation_deg, angles.range_km, delay
                    );
                    candidates.push(UpLink {
                        sat_node: sat.name.clone(),
                        distance: angles.range_km as i64,
                        delay,
                    });
                }
            }

            if !candidates.is_empty() {
                all.push(UpLinks {
                    ground_node: name,
                    uplinks: candidates,
                });
            }
        }

        all
    }

    fn satellite(&self, name: &str) -> Option<&SatelliteTrack> {
        self.satellites.iter().find(|s| s.name == name)
    }

    /// Override a satellite's kinematic state (test hook and warm start).
    pub fn set_satellite_position(&mut self, name: &str, lat: f64, lon: f64, height_km: f64) {
        if let Some(sat) = self.satellites.iter_mut().find(|s| s.name == name) {
            sat.lat = lat;
            sat.lon = lon;
            sat.height_km = height_km;
        }
    }

    /// Evaluate without propagating (positions as currently stored).
    pub fn evaluate_current(&mut self) -> Snapshot {
        self.evaluate()
    }
}

impl SatelliteTrack {
    fn position(&self) -> GeodeticPosition {
        GeodeticPosition {
            latitude: self.lat,
            longitude: self.lon,
            altitude_km: self.height_km,
        }
    }
}

/// Cheap coarse filter: only stations within a ±20° lat/lon box of the
/// sub-satellite point are worth a topocentric solve.
fn nearby(gs_lat: f64, gs_lon: f64, sat_lat: f64, sat_lon: f64) -> bool {
    (sat_lat - gs_lat).abs() < NEARBY_DEG && (sat_lon - gs_lon).abs() < NEARBY_DEG
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use net_topology::create_network;

    const INCLINATION: f64 = 53.9;

    fn engine(grounds: &[(String, f64, f64)]) -> DynamicsEngine {
        engine_with(grounds, 15.0)
    }

    fn engine_with(grounds: &[(String, f64, f64)], min_elevation: f64) -> DynamicsEngine {
        let epoch = NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let graph = create_network(
            2,
            2,
            !grounds.is_empty(),
            grounds,
            &[],
            INCLINATION,
            550.0,
            epoch,
        )
        .unwrap();
        DynamicsEngine::new(graph, min_elevation)
    }

    fn spread_satellites(engine: &mut DynamicsEngine) {
        engine.set_satellite_position("R0_0", 0.0, 0.0, 550.0);
        engine.set_satellite_position("R0_1", 10.0, 20.0, 550.0);
        engine.set_satellite_position("R1_0", -10.0, 40.0, 550.0);
        engine.set_satellite_position("R1_1", 5.0, 60.0, 550.0);
    }

    #[test]
    fn all_links_up_at_low_latitude() {
        let mut e = engine(&[]);
        spread_satellites(&mut e);
        let snap = e.evaluate_current();

        assert_eq!(snap.satellite_links.len(), 8);
        assert!(snap.satellite_links.iter().all(|l| l.up));
        for link in &snap.satellite_links {
            assert!(link.delay > 1.0 && link.delay <= 50.0, "delay {}", link.delay);
        }
    }

    #[test]
    fn high_latitude_drops_inter_ring_only() {
        let mut e = engine(&[]);
        spread_satellites(&mut e);
        // inclination − 1.9°: inside the turnaround band
        e.set_satellite_position("R0_0", 52.0, 0.0, 550.0);
        let snap = e.evaluate_current();

        for link in &snap.satellite_links {
            let touches = link.node1_name == "R0_0" || link.node2_name == "R0_0";
            let edge = e
                .graph
                .edges_between(&link.node1_name, &link.node2_name)
                .into_iter()
                .next()
                .unwrap();
            if edge.inter_ring && touches {
                assert!(!link.up, "{} ↔ {} should be down", link.node1_name, link.node2_name);
            } else if !edge.inter_ring {
                assert!(link.up, "intra-ring must stay up");
            }
        }

        let down = snap.satellite_links.iter().filter(|l| !l.up).count();
        assert_eq!(down, 2, "exactly the two inter-ring edges on R0_0");
    }

    #[test]
    fn exact_cutoff_latitude_is_down() {
        let mut e = engine(&[]);
        spread_satellites(&mut e);
        // |lat| = inclination − 2° exactly: strict inequality → down
        e.set_satellite_position("R0_0", INCLINATION - 2.0, 0.0, 550.0);
        let snap = e.evaluate_current();
        let down = snap.satellite_links.iter().filter(|l| !l.up).count();
        assert_eq!(down, 2);

        // A hair below the cutoff: links are restored.
        e.set_satellite_position("R0_0", INCLINATION - 2.01, 0.0, 550.0);
        let snap = e.evaluate_current();
        assert!(snap.satellite_links.iter().all(|l| l.up));
    }

    #[test]
    fn delay_follows_distance_law() {
        let mut e = engine(&[]);
        spread_satellites(&mut e);
        let snap = e.evaluate_current();

        for link in &snap.satellite_links {
            let s1 = e.satellite(&link.node1_name).unwrap().position();
            let s2 = e.satellite(&link.node2_name).unwrap().position();
            let expected = transforms::chord_distance_km(&s1, &s2) / 299_792.458 * 1000.0 + 1.0;
            assert!((link.delay - expected).abs() < 1e-3);
            assert!(link.delay >= 1.0);
        }
    }

    #[test]
    fn uplink_requires_elevation_above_minimum() {
        let grounds = vec![("G_eq".to_string(), 0.0, 0.0)];
        let mut e = engine(&grounds);

        // One satellite overhead, one low on the horizon, two far away.
        e.set_satellite_position("R0_0", 2.0, 1.0, 550.0);
        e.set_satellite_position("R0_1", 15.0, 12.0, 550.0);
        e.set_satellite_position("R1_0", 40.0, 90.0, 550.0);
        e.set_satellite_position("R1_1", -40.0, -90.0, 550.0);

        let snap = e.evaluate_current();
        assert_eq!(snap.ground_uplinks.len(), 1);
        let uplinks = &snap.ground_uplinks[0];
        assert_eq!(uplinks.ground_node, "G_eq");
        assert_eq!(uplinks.uplinks.len(), 1);
        assert_eq!(uplinks.uplinks[0].sat_node, "R0_0");

        // Delay and distance both come from the same topocentric solve.
        let angles = look_angles(
            &GeodeticPosition::surface(0.0, 0.0),
            &GeodeticPosition {
                latitude: 2.0,
                longitude: 1.0,
                altitude_km: 550.0,
            },
        );
        assert_eq!(uplinks.uplinks[0].distance, angles.range_km as i64);
        assert!((uplinks.uplinks[0].delay - link_delay_ms(angles.range_km)).abs() < 1e-9);
    }

    #[test]
    fn elevation_exactly_at_minimum_is_not_a_candidate() {
        let grounds = vec![("G_eq".to_string(), 0.0, 0.0)];
        let sat_pos = GeodeticPosition {
            latitude: 8.0,
            longitude: 6.0,
            altitude_km: 550.0,
        };
        let elevation = look_angles(&GeodeticPosition::surface(0.0, 0.0), &sat_pos).elevation_deg;

        // Candidate threshold is strict: equality must be excluded.
        let mut e = engine_with(&grounds, elevation);
        e.set_satellite_position("R0_0", 8.0, 6.0, 550.0);
        e.set_satellite_position("R0_1", 40.0, 90.0, 550.0);
        e.set_satellite_position("R1_0", 40.0, -90.0, 550.0);
        e.set_satellite_position("R1_1", -40.0, 90.0, 550.0);

        let snap = e.evaluate_current();
        assert!(snap.ground_uplinks.is_empty());

        // Nudge the threshold down and the same geometry qualifies.
        let mut e = engine_with(&grounds, elevation - 0.001);
        e.set_satellite_position("R0_0", 8.0, 6.0, 550.0);
        e.set_satellite_position("R0_1", 40.0, 90.0, 550.0);
        e.set_satellite_position("R1_0", 40.0, -90.0, 550.0);
        e.set_satellite_position("R1_1", -40.0, 90.0, 550.0);
        let snap = e.evaluate_current();
        assert_eq!(snap.ground_uplinks.len(), 1);
    }

    #[test]
    fn coarse_filter_excludes_far_satellites() {
        let grounds = vec![("G_eq".to_string(), 0.0, 0.0)];
        let mut e = engine(&grounds);
        // High elevation impossible: all sats beyond the ±20° box.
        e.set_satellite_position("R0_0", 0.0, 25.0, 550.0);
        e.set_satellite_position("R0_1", 25.0, 0.0, 550.0);
        e.set_satellite_position("R1_0", 30.0, 30.0, 550.0);
        e.set_satellite_position("R1_1", -25.0, -25.0, 550.0);

        let snap = e.evaluate_current();
        assert!(snap.ground_uplinks.is_empty());
    }

    #[test]
    fn tick_produces_full_snapshot() {
        let grounds = vec![("G_eq".to_string(), 0.0, 0.0)];
        let mut e = engine(&grounds);
        let t = chrono::Utc::now();
        let snap = e.tick(t);

        assert_eq!(snap.satellites.len(), 4);
        assert_eq!(snap.ground_stations.len(), 1);
        assert_eq!(snap.satellite_links.len(), 8);
        for sat in &snap.satellites {
            assert!(sat.lat.abs() <= INCLINATION + 0.5);
            assert!(sat.height > 500.0 && sat.height < 600.0, "height {}", sat.height);
        }
    }
}
