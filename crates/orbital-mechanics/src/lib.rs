//! Orbital Kinematics Library
//!
//! SGP4 propagation of the emulated constellation's satellites from their
//! stored orbital elements, synthetic TLE generation, and the link-geometry
//! helpers (sub-satellite point, topocentric look angles, chord distance,
//! propagation delay) the dynamics engine derives link state from.

use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KinematicsError {
    #[error("Invalid TLE format: {0}")]
    InvalidTle(String),
    #[error("Propagation failed: {0}")]
    PropagationFailed(String),
}

pub type Result<T> = std::result::Result<T, KinematicsError>;

pub const EARTH_RADIUS_KM: f64 = 6378.137;
pub const MU_EARTH: f64 = 398600.4418;
pub const SPEED_OF_LIGHT_KM_S: f64 = 299_792.458;

/// Fixed per-hop processing term added to every propagation delay.
pub const PROCESSING_DELAY_MS: f64 = 1.0;

/// Orbital elements stored per satellite node. Angles in degrees, altitude
/// in km; mean motion is derived from the altitude (circular orbit).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct OrbitSpec {
    pub inclination_deg: f64,
    pub altitude_km: f64,
    pub right_ascension_deg: f64,
    pub mean_anomaly_deg: f64,
    pub epoch: NaiveDateTime,
    pub norad_id: u32,
}

impl OrbitSpec {
    /// Mean motion in orbits/day for a circular orbit at this altitude.
    pub fn mean_motion_orbits_day(&self) -> f64 {
        let semi_major = EARTH_RADIUS_KM + self.altitude_km;
        let n_rad_s = (MU_EARTH / semi_major.powi(3)).sqrt();
        n_rad_s * 86400.0 / (2.0 * std::f64::consts::PI)
    }

    /// Render the elements as a standard two-line element set (69 columns
    /// per line, valid checksums). The emulation treats these as the
    /// canonical ephemeris format, same as any real tracking feed carries.
    pub fn tle_lines(&self) -> (String, String) {
        let epoch_year = (self.epoch.year() % 100) as u8;
        let epoch_day = self.epoch.ordinal() as f64
            + self.epoch.hour() as f64 / 24.0
            + self.epoch.minute() as f64 / 1440.0
            + self.epoch.second() as f64 / 86400.0;

        let line1 = format!(
            "1 {:05}U 00000A   {:02}{:012.8}  .00000000  00000-0  00000-0 0    1",
            self.norad_id, epoch_year, epoch_day
        );
        let line1 = format!("{}{}", line1, tle_checksum(&line1));

        let ecc_int = (ECCENTRICITY * 10_000_000.0).round() as u64;
        let line2 = format!(
            "2 {:05} {:>8.4} {:>8.4} {:07} {:>8.4} {:>8.4} {:>11.8}{:05}",
            self.norad_id,
            self.inclination_deg,
            self.right_ascension_deg,
            ecc_int,
            0.0, // argument of perigee
            self.mean_anomaly_deg,
            self.mean_motion_orbits_day(),
            1u32,
        );
        let line2 = format!("{}{}", line2, tle_checksum(&line2));

        (line1, line2)
    }

    fn elements(&self) -> sgp4::Elements {
        sgp4::Elements {
            object_name: None,
            international_designator: None,
            norad_id: self.norad_id as u64,
            classification: sgp4::Classification::Unclassified,
            datetime: self.epoch,
            mean_motion_dot: 0.0,
            mean_motion_ddot: 0.0,
            drag_term: 0.0,
            element_set_number: 1,
            inclination: self.inclination_deg,
            right_ascension: self.right_ascension_deg,
            eccentricity: ECCENTRICITY,
            argument_of_perigee: 0.0,
            mean_anomaly: self.mean_anomaly_deg,
            mean_motion: self.mean_motion_orbits_day(),
            revolution_number: 1,
            ephemeris_type: 0,
        }
    }
}

/// Near-circular; exactly zero trips up some SGP4 implementations.
const ECCENTRICITY: f64 = 0.001;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StateVector {
    pub position_km: [f64; 3],
    pub velocity_km_s: [f64; 3],
    pub epoch: DateTime<Utc>,
}

/// Sub-satellite (or surface) point. Altitude is zero for ground nodes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeodeticPosition {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_km: f64,
}

impl GeodeticPosition {
    pub fn surface(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude_km: 0.0,
        }
    }
}

/// Look angles from an observer to a satellite.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LookAngles {
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
    pub range_km: f64,
}

pub mod propagation {
    use super::*;

    /// Propagate a satellite to `time` via SGP4. Pure function of
    /// (elements, time); constants are rebuilt per call.
    pub fn propagate(spec: &OrbitSpec, time: DateTime<Utc>) -> Result<StateVector> {
        let elements = spec.elements();
        let constants = sgp4::Constants::from_elements(&elements)
            .map_err(|e| KinematicsError::PropagationFailed(format!("{:?}", e)))?;

        let epoch_utc = DateTime::<Utc>::from_naive_utc_and_offset(elements.datetime, Utc);
        let minutes = time.signed_duration_since(epoch_utc).num_seconds() as f64 / 60.0;

        let prediction = constants
            .propagate(minutes)
            .map_err(|e| KinematicsError::PropagationFailed(format!("{:?}", e)))?;

        Ok(StateVector {
            position_km: prediction.position,
            velocity_km_s: prediction.velocity,
            epoch: time,
        })
    }

    /// Sub-satellite point at `time`: propagate, then rotate the TEME/ECI
    /// position by Greenwich sidereal angle for an Earth-fixed longitude.
    pub fn ground_track(spec: &OrbitSpec, time: DateTime<Utc>) -> Result<GeodeticPosition> {
        let sv = propagate(spec, time)?;
        Ok(transforms::eci_to_geodetic_at_time(
            sv.position_km[0],
            sv.position_km[1],
            sv.position_km[2],
            time,
        ))
    }
}

pub mod transforms {
    use super::*;

    /// Greenwich mean sidereal time, radians in [0, 2π).
    pub fn gmst_rad(time: DateTime<Utc>) -> f64 {
        // Days since J2000.0 (2000-01-01 12:00 UTC)
        const J2000_UNIX_MS: i64 = 946_728_000_000;
        let d = (time.timestamp_millis() - J2000_UNIX_MS) as f64 / 86_400_000.0;
        let gmst_deg = (280.46061837 + 360.98564736629 * d).rem_euclid(360.0);
        gmst_deg.to_radians()
    }

    /// ECI → geodetic with sidereal rotation applied, so the longitude is
    /// Earth-fixed. Spherical latitude is sufficient for visibility work.
    pub fn eci_to_geodetic_at_time(x: f64, y: f64, z: f64, time: DateTime<Utc>) -> GeodeticPosition {
        let r_xy = (x * x + y * y).sqrt();
        let latitude = z.atan2(r_xy).to_degrees();
        let mut longitude = (y.atan2(x) - gmst_rad(time)).to_degrees();
        longitude = (longitude + 540.0).rem_euclid(360.0) - 180.0;
        let altitude_km = (x * x + y * y + z * z).sqrt() - EARTH_RADIUS_KM;

        GeodeticPosition {
            latitude,
            longitude,
            altitude_km,
        }
    }

    /// Geodetic → Earth-centred Cartesian (spherical Earth).
    pub fn geodetic_to_ecef(pos: &GeodeticPosition) -> [f64; 3] {
        let lat = pos.latitude.to_radians();
        let lon = pos.longitude.to_radians();
        let r = EARTH_RADIUS_KM + pos.altitude_km;

        [
            r * lat.cos() * lon.cos(),
            r * lat.cos() * lon.sin(),
            r * lat.sin(),
        ]
    }

    /// Straight-line (chord) distance between two positions in km.
    pub fn chord_distance_km(a: &GeodeticPosition, b: &GeodeticPosition) -> f64 {
        let pa = geodetic_to_ecef(a);
        let pb = geodetic_to_ecef(b);
        let dx = pb[0] - pa[0];
        let dy = pb[1] - pa[1];
        let dz = pb[2] - pa[2];
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Look angles (azimuth/elevation/slant range) from an observer to a
/// satellite, both given as geodetic positions. ENU rotation of the ECEF
/// range vector; azimuth clockwise from North.
pub fn look_angles(observer: &GeodeticPosition, satellite: &GeodeticPosition) -> LookAngles {
    let obs = transforms::geodetic_to_ecef(observer);
    let sat = transforms::geodetic_to_ecef(satellite);

    let dx = sat[0] - obs[0];
    let dy = sat[1] - obs[1];
    let dz = sat[2] - obs[2];
    let range_km = (dx * dx + dy * dy + dz * dz).sqrt();

    let lat = observer.latitude.to_radians();
    let lon = observer.longitude.to_radians();
    let (sin_lat, cos_lat) = (lat.sin(), lat.cos());
    let (sin_lon, cos_lon) = (lon.sin(), lon.cos());

    let east = -sin_lon * dx + cos_lon * dy;
    let north = -sin_lat * cos_lon * dx - sin_lat * sin_lon * dy + cos_lat * dz;
    let up = cos_lat * cos_lon * dx + cos_lat * sin_lon * dy + sin_lat * dz;

    let mut azimuth_deg = east.atan2(north).to_degrees();
    if azimuth_deg < 0.0 {
        azimuth_deg += 360.0;
    }

    let horiz = (east * east + north * north).sqrt();
    let elevation_deg = up.atan2(horiz).to_degrees();

    LookAngles {
        azimuth_deg,
        elevation_deg,
        range_km,
    }
}

/// Propagation delay over `distance_km` plus the fixed processing term,
/// rounded to three decimals.
pub fn link_delay_ms(distance_km: f64) -> f64 {
    let total = distance_km / SPEED_OF_LIGHT_KM_S * 1000.0 + PROCESSING_DELAY_MS;
    (total * 1000.0).round() / 1000.0
}

fn tle_checksum(line: &str) -> u8 {
    (line
        .bytes()
        .take(68)
        .map(|b| {
            if b.is_ascii_digit() {
                (b - b'0') as u16
            } else if b == b'-' {
                1u16
            } else {
                0u16
            }
        })
        .sum::<u16>()
        % 10) as u8
}
