//! INI network description.
//!
//! The same file drives both services: `[network]` sizes the torus,
//! `[constellation]` and `[physical]` carry the orbital/visibility
//! parameters, `[ground_stations]` and `[vessels]` list the non-orbital
//! nodes. Node names are case-preserving keys, so parsing goes through
//! rust-ini rather than anything that folds case.

use chrono::NaiveDateTime;
use ini::Ini;

use crate::graph::NetGraph;
use crate::torus::create_network;
use crate::{Result, TopologyError};

pub const DEFAULT_RINGS: u32 = 4;
pub const DEFAULT_ROUTERS: u32 = 4;
pub const DEFAULT_INCLINATION_DEG: f64 = 53.9;
pub const DEFAULT_ALTITUDE_KM: f64 = 550.0;
pub const DEFAULT_MIN_ELEVATION_DEG: f64 = 15.0;

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfig {
    pub rings: u32,
    pub routers: u32,
    pub ground_stations: bool,
    pub inclination_deg: f64,
    pub altitude_km: f64,
    pub min_elevation_deg: f64,
    /// (name, lat, lon), file order preserved.
    pub ground_table: Vec<(String, f64, f64)>,
    /// (name, waypoint polyline), file order preserved.
    pub vessel_table: Vec<(String, Vec<(f64, f64)>)>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            rings: DEFAULT_RINGS,
            routers: DEFAULT_ROUTERS,
            ground_stations: false,
            inclination_deg: DEFAULT_INCLINATION_DEG,
            altitude_km: DEFAULT_ALTITUDE_KM,
            min_elevation_deg: DEFAULT_MIN_ELEVATION_DEG,
            ground_table: Vec::new(),
            vessel_table: Vec::new(),
        }
    }
}

impl NetworkConfig {
    /// Materialize the topology this config describes.
    pub fn build_graph(&self, epoch: NaiveDateTime) -> Result<NetGraph> {
        create_network(
            self.rings,
            self.routers,
            self.ground_stations,
            &self.ground_table,
            &self.vessel_table,
            self.inclination_deg,
            self.altitude_km,
            epoch,
        )
    }
}

pub fn parse_network_config(input: &str) -> Result<NetworkConfig> {
    let ini = Ini::load_from_str(input)
        .map_err(|e| TopologyError::InvalidConfig(format!("INI parse: {}", e)))?;

    let mut cfg = NetworkConfig::default();

    if let Some(network) = ini.section(Some("network")) {
        if let Some(v) = network.get("rings") {
            cfg.rings = parse_num(v, "network.rings")?;
        }
        if let Some(v) = network.get("routers") {
            cfg.routers = parse_num(v, "network.routers")?;
        }
        if let Some(v) = network.get("ground_stations") {
            cfg.ground_stations = matches!(v.trim(), "true" | "yes" | "1");
        }
    }

    if let Some(constellation) = ini.section(Some("constellation")) {
        if let Some(v) = constellation.get("inclination") {
            cfg.inclination_deg = parse_num(v, "constellation.inclination")?;
        }
        if let Some(v) = constellation.get("altitude") {
            cfg.altitude_km = parse_num(v, "constellation.altitude")?;
        }
    }

    if let Some(physical) = ini.section(Some("physical")) {
        if let Some(v) = physical.get("min_elevation") {
            cfg.min_elevation_deg = parse_num(v, "physical.min_elevation")?;
        }
    }

    if let Some(grounds) = ini.section(Some("ground_stations")) {
        for (name, coords) in grounds.iter() {
            let (lat, lon) = parse_lat_lon(coords, name)?;
            cfg.ground_table.push((name.to_string(), lat, lon));
        }
    }

    if let Some(vessels) = ini.section(Some("vessels")) {
        for (name, polyline) in vessels.iter() {
            let mut waypoints = Vec::new();
            for leg in polyline.split(';') {
                let (lat, lon) = parse_lat_lon(leg, name)?;
                waypoints.push((lat, lon));
            }
            cfg.vessel_table.push((name.to_string(), waypoints));
        }
    }

    Ok(cfg)
}

pub fn render_network_config(cfg: &NetworkConfig) -> Result<String> {
    let mut ini = Ini::new();

    ini.set_to(Some("network"), "rings".to_string(), cfg.rings.to_string());
    ini.set_to(
        Some("network"),
        "routers".to_string(),
        cfg.routers.to_string(),
    );
    ini.set_to(
        Some("network"),
        "ground_stations".to_string(),
        cfg.ground_stations.to_string(),
    );

    ini.set_to(
        Some("constellation"),
        "inclination".to_string(),
        cfg.inclination_deg.to_string(),
    );
    ini.set_to(
        Some("constellation"),
        "altitude".to_string(),
        cfg.altitude_km.to_string(),
    );

    ini.set_to(
        Some("physical"),
        "min_elevation".to_string(),
        cfg.min_elevation_deg.to_string(),
    );

    for (name, lat, lon) in &cfg.ground_table {
        ini.set_to(
            Some("ground_stations"),
            name.clone(),
            format!("{},{}", lat, lon),
        );
    }

    for (name, waypoints) in &cfg.vessel_table {
        let polyline = waypoints
            .iter()
            .map(|(lat, lon)| format!("{},{}", lat, lon))
            .collect::<Vec<_>>()
            .join(";");
        ini.set_to(Some("vessels"), name.clone(), polyline);
    }

    let mut out = Vec::new();
    ini.write_to(&mut out)
        .map_err(|e| TopologyError::InvalidConfig(format!("INI render: {}", e)))?;
    String::from_utf8(out)
        .map_err(|e| TopologyError::InvalidConfig(format!("INI render: {}", e)))
}

fn parse_num<T: std::str::FromStr>(value: &str, field: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| TopologyError::InvalidConfig(format!("{} = {:?}", field, value)))
}

fn parse_lat_lon(value: &str, name: &str) -> Result<(f64, f64)> {
    let mut parts = value.split(',');
    let lat = parts
        .next()
        .map(str::trim)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| TopologyError::InvalidConfig(format!("{}: bad lat in {:?}", name, value)))?;
    let lon = parts
        .next()
        .map(str::trim)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| TopologyError::InvalidConfig(format!("{}: bad lon in {:?}", name, value)))?;
    if parts.next().is_some() {
        return Err(TopologyError::InvalidConfig(format!(
            "{}: trailing fields in {:?}",
            name, value
        )));
    }
    Ok((lat, lon))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SMALL_NET: &str = "\
[network]
rings = 2
routers = 2
ground_stations = true

[constellation]
inclination = 53.9
altitude = 550

[physical]
min_elevation = 15

[ground_stations]
G_sdg = 32.7,-117.2
G_NYC = 40.7,-74.0

[vessels]
V_pacific = 10.0,-150.0;20.0,-140.0;25.0,-130.0
";

    #[test]
    fn parses_all_sections() {
        let cfg = parse_network_config(SMALL_NET).unwrap();
        assert_eq!(cfg.rings, 2);
        assert_eq!(cfg.routers, 2);
        assert!(cfg.ground_stations);
        assert_eq!(cfg.inclination_deg, 53.9);
        assert_eq!(cfg.altitude_km, 550.0);
        assert_eq!(cfg.min_elevation_deg, 15.0);
        assert_eq!(cfg.ground_table.len(), 2);
        assert_eq!(cfg.vessel_table.len(), 1);
        assert_eq!(cfg.vessel_table[0].1.len(), 3);
    }

    #[test]
    fn names_preserve_case() {
        let cfg = parse_network_config(SMALL_NET).unwrap();
        assert_eq!(cfg.ground_table[1].0, "G_NYC");
    }

    #[test]
    fn missing_sections_take_defaults() {
        let cfg = parse_network_config("[network]\nrings = 3\nrouters = 5\n").unwrap();
        assert_eq!(cfg.rings, 3);
        assert_eq!(cfg.routers, 5);
        assert!(!cfg.ground_stations);
        assert_eq!(cfg.inclination_deg, DEFAULT_INCLINATION_DEG);
        assert_eq!(cfg.min_elevation_deg, DEFAULT_MIN_ELEVATION_DEG);
    }

    #[test]
    fn bad_coordinates_are_rejected() {
        let broken = "[ground_stations]\nG_x = 12.0\n";
        assert!(parse_network_config(broken).is_err());
    }

    #[test]
    fn round_trip_fixed_config() {
        let cfg = parse_network_config(SMALL_NET).unwrap();
        let rendered = render_network_config(&cfg).unwrap();
        let reparsed = parse_network_config(&rendered).unwrap();
        assert_eq!(cfg, reparsed);
    }

    fn arb_name(prefix: &'static str) -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z0-9]{0,6}".prop_map(move |s| format!("{}{}", prefix, s))
    }

    fn arb_coord() -> impl Strategy<Value = (f64, f64)> {
        (-85.0f64..85.0, -179.0f64..179.0)
    }

    proptest! {
        #[test]
        fn round_trip_any_config(
            rings in 1u32..8,
            routers in 1u32..8,
            use_grounds in any::<bool>(),
            incl in 40.0f64..90.0,
            alt in 300.0f64..1500.0,
            min_el in 5.0f64..30.0,
            grounds in proptest::collection::vec((arb_name("G_"), arb_coord()), 0..4),
            vessels in proptest::collection::vec(
                (arb_name("V_"), proptest::collection::vec(arb_coord(), 1..4)),
                0..3,
            ),
        ) {
            let mut seen = std::collections::HashSet::new();
            let cfg = NetworkConfig {
                rings,
                routers,
                ground_stations: use_grounds,
                inclination_deg: incl,
                altitude_km: alt,
                min_elevation_deg: min_el,
                ground_table: grounds
                    .into_iter()
                    .filter(|(n, _)| seen.insert(n.clone()))
                    .map(|(n, (lat, lon))| (n, lat, lon))
                    .collect(),
                vessel_table: vessels
                    .into_iter()
                    .filter(|(n, _)| seen.insert(n.clone()))
                    .collect(),
            };

            let reparsed = parse_network_config(&render_network_config(&cfg).unwrap()).unwrap();
            prop_assert_eq!(cfg, reparsed);
        }
    }
}
